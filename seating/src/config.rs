//! Configuration management for SeatSync replicas.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Replica configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Simulated settlement latency between holding and selling seats
    pub settlement_delay: Duration,
    /// Maximum seats in one reservation
    pub max_selection: usize,
    /// Entries kept in the notice log
    pub notice_capacity: usize,
    /// Replicas started by the demo binary
    pub replicas: usize,
    /// Install the Prometheus recorder and print it on exit
    pub metrics_enabled: bool,
    /// How long shutdown waits for pending effects
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settlement_delay: Duration::from_millis(2500),
            max_selection: 6,
            notice_capacity: 15,
            replicas: 3,
            metrics_enabled: false,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to the defaults.
    ///
    /// # Environment Variables
    ///
    /// - `SEATSYNC_SETTLEMENT_DELAY_MS`: settlement delay (default: 2500)
    /// - `SEATSYNC_MAX_SELECTION`: seats per reservation (default: 6)
    /// - `SEATSYNC_NOTICE_CAPACITY`: notice log size (default: 15)
    /// - `SEATSYNC_REPLICAS`: demo replica count (default: 3)
    /// - `SEATSYNC_METRICS`: `true` to enable metrics (default: false)
    /// - `SEATSYNC_SHUTDOWN_TIMEOUT_SECS`: shutdown timeout (default: 5)
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            settlement_delay: env::var("SEATSYNC_SETTLEMENT_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.settlement_delay, Duration::from_millis),
            max_selection: env::var("SEATSYNC_MAX_SELECTION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_selection),
            notice_capacity: env::var("SEATSYNC_NOTICE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.notice_capacity),
            replicas: env::var("SEATSYNC_REPLICAS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.replicas),
            metrics_enabled: env::var("SEATSYNC_METRICS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.metrics_enabled),
            shutdown_timeout: env::var("SEATSYNC_SHUTDOWN_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.shutdown_timeout, Duration::from_secs),
        }
    }

    /// Override the settlement delay
    #[must_use]
    pub const fn with_settlement_delay(mut self, delay: Duration) -> Self {
        self.settlement_delay = delay;
        self
    }

    /// Override the selection limit
    #[must_use]
    pub const fn with_max_selection(mut self, max: usize) -> Self {
        self.max_selection = max;
        self
    }

    /// Override how long shutdown waits for in-flight effects
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
