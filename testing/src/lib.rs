//! # SeatSync Testing
//!
//! Testing utilities and helpers for SeatSync replicas.
//!
//! This crate provides:
//! - Mock implementations of Environment traits (clock, message bus)
//! - A Given-When-Then harness for reducers
//! - Assertion helpers for effects
//!
//! ## Example
//!
//! ```ignore
//! use seatsync_testing::{test_clock, RecordingBus};
//!
//! #[tokio::test]
//! async fn test_submit_broadcasts_holds() {
//!     let bus = Arc::new(RecordingBus::new());
//!     let client = ReplicaClient::new(
//!         session,
//!         default_catalog(),
//!         bus.clone(),
//!         Arc::new(test_clock()),
//!         &config,
//!     );
//!     client.connect().await?;
//!
//!     client.select_flight(&FlightId::from("mad-nyc")).await?;
//!     client.toggle_seat(3).await?;
//!     client.submit().await?;
//!
//!     // sync_request, then the hold
//!     assert_eq!(bus.sent_to(Scope::All).len(), 2);
//! }
//! ```

use chrono::{DateTime, Utc};
use seatsync_core::environment::Clock;


pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use futures::StreamExt;
    use seatsync_core::message_bus::{BusError, BusFuture, MessageBus, MessageStream, Scope};
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use tokio::sync::mpsc;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use seatsync_testing::mocks::FixedClock;
    /// use seatsync_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    #[derive(Default)]
    struct BusState {
        sent: Vec<(Scope, String)>,
        connected: bool,
        fail_connect: Option<String>,
        fail_send: Option<String>,
        inbound_tx: Option<mpsc::UnboundedSender<String>>,
        pending: Vec<String>,
    }

    /// Message bus that records every send and lets tests inject frames.
    ///
    /// Nothing is fanned out: a payload sent to `All` is recorded but not
    /// echoed back. Tests decide what arrives by calling [`deliver`].
    ///
    /// [`deliver`]: RecordingBus::deliver
    #[derive(Default)]
    pub struct RecordingBus {
        state: Mutex<BusState>,
    }

    impl RecordingBus {
        /// A bus that accepts every connect and send
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// A bus whose `connect` always fails with `reason`
        #[must_use]
        pub fn failing_connect(reason: impl Into<String>) -> Self {
            let bus = Self::default();
            bus.lock().fail_connect = Some(reason.into());
            bus
        }

        /// Make every subsequent `send` fail with `reason`
        pub fn fail_sends(&self, reason: impl Into<String>) {
            self.lock().fail_send = Some(reason.into());
        }

        /// Everything sent so far, in send order
        #[must_use]
        pub fn sent(&self) -> Vec<(Scope, String)> {
            self.lock().sent.clone()
        }

        /// Payloads sent to one scope, in send order
        #[must_use]
        pub fn sent_to(&self, scope: Scope) -> Vec<String> {
            self.lock()
                .sent
                .iter()
                .filter(|(s, _)| *s == scope)
                .map(|(_, payload)| payload.clone())
                .collect()
        }

        /// Whether `connect` succeeded and `disconnect` has not been called
        #[must_use]
        pub fn is_connected(&self) -> bool {
            self.lock().connected
        }

        /// Push a frame onto the inbound stream
        ///
        /// Frames delivered before `connect` are queued and yielded first.
        pub fn deliver(&self, frame: impl Into<String>) {
            let frame = frame.into();
            let mut state = self.lock();
            match &state.inbound_tx {
                Some(tx) => {
                    let _ = tx.send(frame);
                },
                None => state.pending.push(frame),
            }
        }

        fn lock(&self) -> MutexGuard<'_, BusState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl MessageBus for RecordingBus {
        fn connect(&self) -> BusFuture<'_, MessageStream> {
            Box::pin(async move {
                let mut state = self.lock();
                if let Some(reason) = &state.fail_connect {
                    return Err(BusError::ConnectionFailed(reason.clone()));
                }

                let (tx, rx) = mpsc::unbounded_channel();
                for frame in state.pending.drain(..) {
                    let _ = tx.send(frame);
                }
                state.inbound_tx = Some(tx);
                state.connected = true;

                let stream = async_stream::stream! {
                    let mut rx = rx;
                    while let Some(frame) = rx.recv().await {
                        yield Ok::<String, BusError>(frame);
                    }
                };
                Ok(stream.boxed())
            })
        }

        fn send(&self, scope: Scope, payload: String) -> BusFuture<'_, ()> {
            Box::pin(async move {
                let mut state = self.lock();
                if !state.connected {
                    return Err(BusError::NotConnected);
                }
                if let Some(reason) = &state.fail_send {
                    return Err(BusError::SendFailed {
                        scope,
                        reason: reason.clone(),
                    });
                }
                state.sent.push((scope, payload));
                Ok(())
            })
        }

        fn disconnect(&self) {
            let mut state = self.lock();
            state.connected = false;
            // Dropping the sender ends the inbound stream
            state.inbound_tx = None;
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, RecordingBus, test_clock};

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use futures::StreamExt;
    use seatsync_core::message_bus::{BusError, MessageBus, Scope};

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[tokio::test]
    async fn test_recording_bus_rejects_send_before_connect() {
        let bus = RecordingBus::new();
        let result = bus.send(Scope::All, "x".to_string()).await;
        assert_eq!(result, Err(BusError::NotConnected));
    }

    #[tokio::test]
    async fn test_recording_bus_records_sends_by_scope() {
        let bus = RecordingBus::new();
        let _stream = bus.connect().await.unwrap();

        bus.send(Scope::All, "a".to_string()).await.unwrap();
        bus.send(Scope::Others, "b".to_string()).await.unwrap();

        assert_eq!(bus.sent().len(), 2);
        assert_eq!(bus.sent_to(Scope::Others), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_recording_bus_delivers_queued_frames_first() {
        let bus = RecordingBus::new();
        bus.deliver("early");
        let mut stream = bus.connect().await.unwrap();
        bus.deliver("late");

        assert_eq!(stream.next().await, Some(Ok("early".to_string())));
        assert_eq!(stream.next().await, Some(Ok("late".to_string())));

        bus.disconnect();
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_recording_bus_failing_connect() {
        let bus = RecordingBus::failing_connect("relay down");
        let result = bus.connect().await;
        assert!(matches!(result, Err(BusError::ConnectionFailed(ref r)) if r == "relay down"));
    }
}
