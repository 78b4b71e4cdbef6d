//! Prometheus metrics for observability and monitoring.
//!
//! Every replica and the relay record through the `metrics` facade. This
//! module installs a Prometheus recorder behind that facade and describes
//! the metrics SeatSync emits:
//! - Store actions, reducer timing and effect execution
//! - Bus broadcasts (sent and failed, labelled by scope)
//! - Relay connections and deliveries
//! - Replica protocol outcomes (merges, holds, settlements)
//!
//! # Example
//!
//! ```rust,no_run
//! use seatsync_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! // ... run replicas ...
//!
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Process-wide Prometheus recorder.
///
/// Holds the handle used to render the text exposition format.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create a recorder that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder globally.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// Only one global recorder can exist per process. A second install is
    /// logged and treated as success, leaving this recorder without a handle.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.000_01, 0.000_05, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Whether this recorder owns the installed handle.
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        self.handle.is_some()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Store
    describe_counter!("store.actions.total", "Total number of actions sent to stores");
    describe_counter!(
        "store.effects.executed",
        "Total number of effects executed, labelled by effect type"
    );
    describe_histogram!(
        "store.reducer.duration_seconds",
        "Time taken to execute the reducer for one action"
    );
    describe_histogram!("store.effects.count", "Effects returned per reducer call");
    describe_counter!(
        "store.shutdown.rejected_actions",
        "Actions rejected because the store was shutting down"
    );
    describe_counter!("store.shutdown.initiated", "Graceful shutdowns started");
    describe_counter!("store.shutdown.completed", "Graceful shutdowns that drained all effects");
    describe_counter!("store.shutdown.timeout", "Graceful shutdowns that timed out");

    // Bus
    describe_counter!("store.broadcast.sent", "Payloads accepted by the message bus");
    describe_counter!("store.broadcast.failed", "Payloads rejected by the message bus");

    // Relay
    describe_gauge!("relay.connections.active", "Live relay connections");
    describe_counter!("relay.connections.opened", "Relay connections opened");
    describe_counter!("relay.messages.received", "Payloads received by the relay");
    describe_counter!(
        "relay.messages.delivered",
        "Frames delivered to connections, labelled by scope"
    );

    // Replica protocol
    describe_counter!("replica.envelopes.received", "Envelopes decoded by replicas");
    describe_counter!("replica.envelopes.dropped", "Inbound frames that failed to decode");
    describe_counter!("replica.sync.merged", "Sync responses merged into local seat maps");
    describe_counter!("replica.seats.held", "Seats held locally during submission");
    describe_counter!("replica.seats.sold", "Seats confirmed by local settlements");
    describe_counter!("replica.reservations.settled", "Reservations that reached settlement");
}
