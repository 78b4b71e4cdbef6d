//! Replicas talking through a real relay.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use seating::catalog::default_catalog;
use seating::{
    ClientError, Config, ConnectionStatus, FlightId, Phase, ReplicaClient, ReplicaState, SeatState,
    SessionId,
};
use seatsync_core::environment::SystemClock;
use seatsync_core::message_bus::MessageBus;
use seatsync_relay::Relay;
use std::sync::Arc;
use std::time::Duration;

const FAST: Duration = Duration::from_millis(20);
const SLOW: Duration = Duration::from_millis(400);

fn nyc() -> FlightId {
    FlightId::from("mad-nyc")
}

async fn join(relay: &Relay, settlement_delay: Duration) -> ReplicaClient {
    let replica = replica(relay, settlement_delay);
    replica.connect().await.unwrap();
    replica
}

fn replica(relay: &Relay, settlement_delay: Duration) -> ReplicaClient {
    let session = SessionId::generate();
    let bus: Arc<dyn MessageBus> = Arc::new(relay.bus(session.as_str()));
    ReplicaClient::new(
        session,
        default_catalog(),
        bus,
        Arc::new(SystemClock),
        &Config::default().with_settlement_delay(settlement_delay),
    )
}

/// Poll `replica` until `check` holds, for up to two seconds.
async fn eventually(replica: &ReplicaClient, what: &str, check: impl Fn(&ReplicaState) -> bool) {
    for _ in 0..200 {
        if replica.state(&check).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn reserve(replica: &ReplicaClient, seats: &[usize]) {
    replica.select_flight(&nyc()).await.unwrap();
    for &index in seats {
        replica.toggle_seat(index).await.unwrap();
    }
    replica.submit().await.unwrap();
}

fn seat(state: &ReplicaState, index: usize) -> Option<(SeatState, Option<SessionId>)> {
    state
        .seat_map(&nyc())
        .and_then(|m| m.get(index))
        .map(|s| (s.state, s.holder.clone()))
}

#[tokio::test]
async fn test_holds_reach_connected_peer() {
    let relay = Relay::new();
    let a = join(&relay, SLOW).await;
    let b = join(&relay, SLOW).await;
    let a_session = a.session().clone();

    reserve(&a, &[3, 7]).await;

    eventually(&b, "B to see both holds", |s| {
        [3, 7]
            .iter()
            .all(|&i| seat(s, i) == Some((SeatState::Held, Some(a_session.clone()))))
    })
    .await;

    assert_eq!(b.state(|s| s.available(&nyc())).await, 28);
    let notices = b
        .state(|s| s.notices().contains("Seat 1D on mad-nyc held by another passenger"))
        .await;
    assert!(notices);
}

#[tokio::test]
async fn test_late_joiner_converges_through_sync() {
    let relay = Relay::new();
    let a = join(&relay, SLOW).await;
    reserve(&a, &[3, 7]).await;
    eventually(&a, "A to hold", |s| s.available(&nyc()) == 28).await;

    let b = join(&relay, SLOW).await;

    eventually(&b, "B to sync", |s| s.sync().is_synced()).await;
    let a_map = a.state(|s| s.seat_map(&nyc()).cloned()).await;
    let b_map = b.state(|s| s.seat_map(&nyc()).cloned()).await;
    assert_eq!(a_map, b_map);
}

#[tokio::test]
async fn test_confirmation_reaches_everyone_and_late_joiner_sees_sold() {
    let relay = Relay::new();
    let a = join(&relay, FAST).await;
    let b = join(&relay, FAST).await;

    reserve(&a, &[3, 7]).await;

    for replica in [&a, &b] {
        eventually(replica, "seats to be sold", |s| {
            s.seat_map(&nyc()).map(|m| m.count(SeatState::Sold)) == Some(2)
        })
        .await;
    }
    eventually(&a, "A to go idle", |s| s.phase() == Phase::Idle).await;
    assert!(a.state(|s| s.notices().contains("Reservation confirmed: 2 seat(s)")).await);

    let c = join(&relay, FAST).await;
    for _ in 0..30 {
        let held = c
            .state(|s| s.seat_map(&nyc()).map(|m| m.count(SeatState::Held)))
            .await;
        assert_eq!(held, Some(0), "late joiner observed a Held seat");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    eventually(&c, "C to sync", |s| {
        seat(s, 3).map(|(state, _)| state) == Some(SeatState::Sold)
            && seat(s, 7).map(|(state, _)| state) == Some(SeatState::Sold)
    })
    .await;
    assert_eq!(c.state(|s| s.available(&nyc())).await, 28);
    assert!(!c.state(|s| s.notices().contains("held by another passenger")).await);
}

#[tokio::test]
async fn test_race_for_one_seat_never_double_counts() {
    let relay = Relay::new();
    let a = join(&relay, FAST).await;
    let b = join(&relay, FAST).await;

    for replica in [&a, &b] {
        replica.select_flight(&nyc()).await.unwrap();
        replica.toggle_seat(10).await.unwrap();
    }
    let (a_submit, b_submit) = tokio::join!(a.submit(), b.submit());
    a_submit.unwrap();
    b_submit.unwrap();

    for replica in [&a, &b] {
        eventually(replica, "seat 2E to be sold", |s| {
            seat(s, 10).map(|(state, _)| state) == Some(SeatState::Sold)
        })
        .await;
        assert_eq!(replica.state(|s| s.available(&nyc())).await, 29);
    }
}

#[tokio::test]
async fn test_own_echo_does_not_double_decrement() {
    let relay = Relay::new();
    let a = join(&relay, SLOW).await;

    reserve(&a, &[3]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (available, echoed) = a
        .state(|s| {
            let notices = s.notices();
            (
                s.available(&nyc()),
                notices.contains("held by another passenger") || notices.contains("ignored"),
            )
        })
        .await;
    assert_eq!(available, 29);
    assert!(!echoed);

    eventually(&a, "own settlement", |s| s.phase() == Phase::Idle).await;
    assert_eq!(a.state(|s| s.available(&nyc())).await, 29);
}

#[tokio::test]
async fn test_selection_is_bounded() {
    let relay = Relay::new();
    let a = join(&relay, SLOW).await;

    a.select_flight(&nyc()).await.unwrap();
    for index in 0..7 {
        a.toggle_seat(index).await.unwrap();
    }

    let (len, price, rejected) = a
        .state(|s| {
            (
                s.selection().len(),
                s.total_price(),
                s.notices().contains("Maximum 6 seats per reservation"),
            )
        })
        .await;
    assert_eq!(len, 6);
    assert_eq!(price, 6 * 450);
    assert!(rejected);
}

#[tokio::test]
async fn test_first_replica_online_is_never_synced() {
    let relay = Relay::new();
    let a = join(&relay, SLOW).await;

    // A's sync_request has been routed once its own echo is back
    eventually(&a, "A's own sync_request echo", |s| s.envelopes_received() >= 1).await;
    let (merged, available, held) = a
        .state(|s| {
            let held = s.seat_map(&nyc()).map(|m| m.count(SeatState::Held));
            (s.sync().responses_merged(), s.available(&nyc()), held)
        })
        .await;
    assert_eq!(merged, 0);
    assert_eq!(available, 30);
    assert_eq!(held, Some(0));

    let b = join(&relay, SLOW).await;
    eventually(&b, "B to sync", |s| s.sync().responses_merged() == 4).await;
    eventually(&a, "A to see B's request", |s| s.envelopes_received() >= 2).await;

    let (merged, synced) = a
        .state(|s| (s.sync().responses_merged(), s.sync().is_synced()))
        .await;
    assert_eq!(merged, 0);
    assert!(!synced);
}

#[tokio::test]
async fn test_closed_relay_refuses_new_replicas() {
    let relay = Relay::new();
    relay.close();

    let late = replica(&relay, SLOW);
    let result = late.connect().await;

    assert!(matches!(result, Err(ClientError::Bus(_))));
    let status = late.state(|s| s.connection().clone()).await;
    assert!(matches!(status, ConnectionStatus::Failed(_)));
}
