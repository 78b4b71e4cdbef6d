//! SeatSync demo.
//!
//! Starts an in-process relay and a handful of replicas, then walks through
//! three scenarios on flight `mad-nyc`:
//!
//! 1. **Round trip**: A holds seats 1D and 2B; B sees them Held.
//! 2. **Confirmation**: A's reservation settles; C joins late and syncs
//!    straight to Sold.
//! 3. **Race**: B and C submit the same seat at once.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin seatsync-demo
//! SEATSYNC_SETTLEMENT_DELAY_MS=500 SEATSYNC_METRICS=true cargo run --bin seatsync-demo
//! ```

use seating::{
    Config, Flight, FlightId, ReplicaAction, ReplicaClient, SeatMap, SeatState, SessionId,
    catalog::{self, default_catalog},
};
use seatsync_core::environment::{Clock, SystemClock};
use seatsync_core::message_bus::MessageBus;
use seatsync_relay::Relay;
use seatsync_runtime::metrics::MetricsRecorder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for broadcasts to fan out between steps
const PROPAGATION: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seating=info,seatsync_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        settlement_delay_ms = config.settlement_delay.as_millis(),
        max_selection = config.max_selection,
        replicas = config.replicas,
        metrics = config.metrics_enabled,
        "Configuration loaded"
    );

    let mut recorder = MetricsRecorder::new();
    if config.metrics_enabled {
        recorder.install()?;
    }

    let relay = Relay::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let nyc = FlightId::from("mad-nyc");

    // ========== Round trip ==========
    println!("\n=== Round trip: A holds 1D and 2B ===");
    let a = join(&relay, &clock, &config).await?;
    let b = join(&relay, &clock, &config).await?;
    tokio::time::sleep(PROPAGATION).await;

    let mut a_actions = a.subscribe_actions();
    a.select_flight(&nyc).await?;
    a.toggle_seat(3).await?;
    a.toggle_seat(7).await?;
    a.submit().await?;
    tokio::time::sleep(PROPAGATION).await;

    print_replica("A", &a, &nyc).await;
    print_replica("B", &b, &nyc).await;

    // ========== Confirmation ==========
    println!("\n=== Confirmation: A settles, C joins late ===");
    wait_for_settlement(&mut a_actions, config.settlement_delay * 2).await;
    tokio::time::sleep(PROPAGATION).await;

    let c = join(&relay, &clock, &config).await?;
    tokio::time::sleep(PROPAGATION).await;

    for (name, replica) in [("A", &a), ("B", &b), ("C", &c)] {
        print_replica(name, replica, &nyc).await;
    }

    // ========== Race ==========
    println!("\n=== Race: B and C both submit 2E ===");
    let mut b_actions = b.subscribe_actions();
    let mut c_actions = c.subscribe_actions();
    for replica in [&b, &c] {
        replica.select_flight(&nyc).await?;
        replica.toggle_seat(10).await?;
    }
    let (b_submit, c_submit) = tokio::join!(b.submit(), c.submit());
    b_submit?;
    c_submit?;
    tokio::time::sleep(PROPAGATION).await;

    print_replica("B", &b, &nyc).await;
    print_replica("C", &c, &nyc).await;

    let timeout = config.settlement_delay * 2;
    tokio::join!(
        wait_for_settlement(&mut b_actions, timeout),
        wait_for_settlement(&mut c_actions, timeout),
    );
    tokio::time::sleep(PROPAGATION).await;

    println!("\n=== After both settlements ===");
    let mut replicas = vec![("A".to_string(), a), ("B".to_string(), b), ("C".to_string(), c)];
    for n in replicas.len()..config.replicas {
        let observer = join(&relay, &clock, &config).await?;
        replicas.push((format!("R{}", n + 1), observer));
    }
    tokio::time::sleep(PROPAGATION).await;

    for (name, replica) in &replicas {
        print_replica(name, replica, &nyc).await;
    }

    // ========== Shutdown ==========
    for (name, replica) in &replicas {
        if let Err(error) = replica.shutdown().await {
            warn!(replica = %name, %error, "Replica did not shut down cleanly");
        }
    }
    relay.close();
    info!("Relay closed");

    if let Some(rendered) = recorder.render() {
        println!("\n=== Metrics ===\n{rendered}");
    }

    Ok(())
}

/// Start a replica with a fresh session and connect it to `relay`.
async fn join(
    relay: &Relay,
    clock: &Arc<dyn Clock>,
    config: &Config,
) -> Result<ReplicaClient, Box<dyn std::error::Error>> {
    let session = SessionId::generate();
    let bus: Arc<dyn MessageBus> = Arc::new(relay.bus(session.as_str()));
    let replica = ReplicaClient::new(
        session,
        default_catalog(),
        bus,
        Arc::clone(clock),
        config,
    );
    replica.connect().await?;
    info!(session = %replica.session(), "Replica joined");
    Ok(replica)
}

/// Wait until the replica's settlement timer fires, or `timeout` passes.
async fn wait_for_settlement(actions: &mut broadcast::Receiver<ReplicaAction>, timeout: Duration) {
    let settled = tokio::time::timeout(timeout, async {
        loop {
            match actions.recv().await {
                Ok(ReplicaAction::SettlementElapsed { .. }) => return true,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    })
    .await;

    if !matches!(settled, Ok(true)) {
        warn!("Settlement not observed");
    }
}

async fn print_replica(name: &str, replica: &ReplicaClient, flight: &FlightId) {
    let (route, grid, available, notices) = replica
        .state(|s| {
            let info = catalog::find(s.flights(), flight);
            let route = info.map(Flight::route).unwrap_or_default();
            let per_row = info.map_or(6, |f| f.cabin.seats_per_row());
            let grid = s
                .seat_map(flight)
                .map(|seats| render_grid(seats, per_row))
                .unwrap_or_default();
            let notices: Vec<String> = s
                .notices()
                .iter()
                .take(4)
                .map(|n| format!("[{}] {}", n.level, n.message))
                .collect();
            (route, grid, s.available(flight), notices)
        })
        .await;

    println!(
        "\n{name} ({}) - {available} available on {flight} ({route})",
        replica.session()
    );
    print!("{grid}");
    for notice in notices {
        println!("    {notice}");
    }
}

/// One line per row: `.` available, `h` held, `X` sold.
fn render_grid(seats: &SeatMap, per_row: usize) -> String {
    let mut out = String::new();
    for (row, chunk) in seats.seats().chunks(per_row.max(1)).enumerate() {
        let cells: String = chunk
            .iter()
            .map(|seat| match seat.state {
                SeatState::Available => '.',
                SeatState::Held => 'h',
                SeatState::Sold => 'X',
            })
            .collect();
        out.push_str(&format!("  {:>2} {cells}\n", row + 1));
    }
    out
}
