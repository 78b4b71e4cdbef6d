//! A replica wired to a message bus.
//!
//! [`ReplicaClient`] owns the [`Store`] running a [`ReplicaReducer`] and the
//! inbound pump: a task that decodes every frame the bus delivers and sends
//! it to the store, one at a time, in arrival order.

use crate::config::Config;
use crate::envelope::Envelope;
use crate::replica::{ReplicaAction, ReplicaEnvironment, ReplicaReducer, ReplicaState};
use crate::types::{Flight, FlightId, SessionId};
use futures::StreamExt;
use seatsync_core::environment::Clock;
use seatsync_core::message_bus::{BusError, MessageBus, MessageStream};
use seatsync_runtime::{EffectHandle, Store, StoreConfig, StoreError};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Store type driving one replica
pub type ReplicaStore = Store<ReplicaState, ReplicaAction, ReplicaEnvironment, ReplicaReducer>;

/// Errors from driving a replica.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The bus refused to connect
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// The store rejected an action
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// One replica: state, reducer, bus connection and inbound pump.
pub struct ReplicaClient {
    session: SessionId,
    store: ReplicaStore,
    bus: Arc<dyn MessageBus>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ReplicaClient {
    /// Build a replica for `session` carrying `catalog`.
    ///
    /// Nothing is sent until [`connect`](Self::connect).
    #[must_use]
    pub fn new(
        session: SessionId,
        catalog: Vec<Flight>,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let state = ReplicaState::new(session.clone(), catalog, config);
        let env = ReplicaEnvironment::new(Arc::clone(&bus), clock, config.settlement_delay);
        let store = Store::with_config(
            state,
            ReplicaReducer::new(),
            env,
            StoreConfig::default().with_shutdown_timeout(config.shutdown_timeout),
        );

        Self {
            session,
            store,
            bus,
            pump: Mutex::new(None),
        }
    }

    /// This replica's session
    #[must_use]
    pub const fn session(&self) -> &SessionId {
        &self.session
    }

    /// The underlying store
    #[must_use]
    pub const fn store(&self) -> &ReplicaStore {
        &self.store
    }

    /// Connect to the bus, start the inbound pump and request a sync.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Bus`] if the bus refuses; the failure is also
    ///   reduced as [`ReplicaAction::ConnectionFailed`]
    /// - [`ClientError::Store`] if the store is shutting down
    pub async fn connect(&self) -> Result<(), ClientError> {
        let stream = match self.bus.connect().await {
            Ok(stream) => stream,
            Err(error) => {
                self.store
                    .send(ReplicaAction::ConnectionFailed {
                        reason: error.to_string(),
                    })
                    .await?;
                return Err(error.into());
            },
        };

        let handle = tokio::spawn(pump(self.store.clone(), self.session.clone(), stream));
        let previous = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        self.store.send(ReplicaAction::Connected).await?;
        Ok(())
    }

    /// Start choosing seats on `flight_id`
    ///
    /// # Errors
    ///
    /// [`ClientError::Store`] if the store is shutting down.
    pub async fn select_flight(&self, flight_id: &FlightId) -> Result<EffectHandle, ClientError> {
        self.dispatch(ReplicaAction::SelectFlight {
            flight_id: flight_id.clone(),
        })
        .await
    }

    /// Add or remove a seat from the selection
    ///
    /// # Errors
    ///
    /// [`ClientError::Store`] if the store is shutting down.
    pub async fn toggle_seat(&self, index: usize) -> Result<EffectHandle, ClientError> {
        self.dispatch(ReplicaAction::ToggleSeat { index }).await
    }

    /// Hold the selection and schedule its settlement.
    ///
    /// The returned handle completes once the holds are broadcast; the
    /// settlement timer keeps running after that.
    ///
    /// # Errors
    ///
    /// [`ClientError::Store`] if the store is shutting down.
    pub async fn submit(&self) -> Result<EffectHandle, ClientError> {
        self.dispatch(ReplicaAction::Submit).await
    }

    /// Drop the selection
    ///
    /// # Errors
    ///
    /// [`ClientError::Store`] if the store is shutting down.
    pub async fn cancel(&self) -> Result<EffectHandle, ClientError> {
        self.dispatch(ReplicaAction::Cancel).await
    }

    async fn dispatch(&self, action: ReplicaAction) -> Result<EffectHandle, ClientError> {
        Ok(self.store.send(action).await?)
    }

    /// Read the replica state
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&ReplicaState) -> T,
    {
        self.store.state(f).await
    }

    /// Observe actions produced by effects (settlements, bus failures)
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<ReplicaAction> {
        self.store.subscribe_actions()
    }

    /// Leave the relay. Pending settlements are dropped.
    ///
    /// # Errors
    ///
    /// [`ClientError::Store`] if the store is already shutting down.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.bus.disconnect();

        let handle = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                tracing::debug!(session = %self.session, %error, "Inbound pump ended abnormally");
            }
        }

        self.store.send(ReplicaAction::Disconnected).await?;
        Ok(())
    }

    /// Disconnect, then wait for in-flight effects.
    ///
    /// # Errors
    ///
    /// [`ClientError::Store`] if effects are still running after the
    /// configured shutdown timeout.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        if !self.store.is_shutting_down() {
            self.disconnect().await?;
        }
        self.store.shutdown_default().await?;
        Ok(())
    }
}

/// Decode inbound frames and feed them to the store until the stream ends.
async fn pump(store: ReplicaStore, session: SessionId, mut stream: MessageStream) {
    tracing::debug!(%session, "Inbound pump started");

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(%session, %error, "Inbound stream error");
                continue;
            },
        };

        let envelope = match Envelope::decode(&frame) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(%session, %error, "Dropping undecodable frame");
                metrics::counter!("replica.envelopes.dropped").increment(1);
                continue;
            },
        };

        if let Err(error) = store.send(ReplicaAction::EnvelopeReceived { envelope }).await {
            tracing::debug!(%session, %error, "Store closed, stopping inbound pump");
            break;
        }
    }

    tracing::debug!(%session, "Inbound pump stopped");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::catalog::default_catalog;
    use crate::envelope::Payload;
    use crate::replica::ConnectionStatus;
    use crate::reservation::Phase;
    use crate::seat_map::SeatState;
    use seatsync_core::message_bus::Scope;
    use seatsync_testing::{RecordingBus, test_clock};
    use std::time::Duration;

    fn client(bus: Arc<RecordingBus>) -> ReplicaClient {
        ReplicaClient::new(
            SessionId::from("user_me0000001"),
            default_catalog(),
            bus,
            Arc::new(test_clock()),
            &Config::default().with_settlement_delay(Duration::from_millis(10)),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_connect_sends_sync_request() {
        let bus = Arc::new(RecordingBus::new());
        let replica = client(Arc::clone(&bus));

        replica.connect().await.unwrap();
        settle().await;

        let sent = bus.sent_to(Scope::All);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("sync_request"));
        let status = replica.state(|s| s.connection().clone()).await;
        assert_eq!(status, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reduced() {
        let bus = Arc::new(RecordingBus::failing_connect("refused"));
        let replica = client(bus);

        let result = replica.connect().await;

        assert!(matches!(result, Err(ClientError::Bus(_))));
        let notices = replica.state(|s| s.notices().contains("Connection error")).await;
        assert!(notices);
    }

    #[tokio::test]
    async fn test_pump_applies_frames_and_drops_garbage() {
        let bus = Arc::new(RecordingBus::new());
        let replica = client(Arc::clone(&bus));
        replica.connect().await.unwrap();

        bus.deliver("not json".to_string());
        let frame = Envelope::new(
            SessionId::from("user_peer00001"),
            Scope::All,
            Payload::SeatHeld {
                flight_id: FlightId::from("mad-lon"),
                index: 2,
            },
        )
        .encode()
        .unwrap();
        bus.deliver(frame);
        settle().await;

        let state = replica
            .state(|s| s.seat_map(&FlightId::from("mad-lon")).and_then(|m| m.state(2)))
            .await;
        assert_eq!(state, Some(SeatState::Held));
    }

    #[tokio::test]
    async fn test_disconnect_drops_pending_settlement() {
        let bus = Arc::new(RecordingBus::new());
        let replica = ReplicaClient::new(
            SessionId::from("user_me0000001"),
            default_catalog(),
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            Arc::new(test_clock()),
            &Config::default().with_settlement_delay(Duration::from_millis(100)),
        );
        replica.connect().await.unwrap();

        let nyc = FlightId::from("mad-nyc");
        replica.select_flight(&nyc).await.unwrap();
        replica.toggle_seat(0).await.unwrap();
        let mut handle = replica.submit().await.unwrap();
        handle.wait().await;
        replica.disconnect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let sold = replica
            .state(|s| s.seat_map(&nyc).map(|m| m.count(SeatState::Sold)))
            .await;
        assert_eq!(sold, Some(0));
        assert!(bus.sent().iter().all(|(_, p)| !p.contains("seats_sold")));
        assert!(!bus.is_connected());
    }

    #[tokio::test]
    async fn test_refused_broadcasts_surface_as_notices() {
        let bus = Arc::new(RecordingBus::new());
        let replica = client(Arc::clone(&bus));
        replica.connect().await.unwrap();
        settle().await;

        bus.fail_sends("relay down");
        let nyc = FlightId::from("mad-nyc");
        replica.select_flight(&nyc).await.unwrap();
        replica.toggle_seat(3).await.unwrap();
        replica.submit().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (phase, sold, notice, last_error) = replica
            .state(|s| {
                (
                    s.phase(),
                    s.seat_map(&nyc).map(|m| m.count(SeatState::Sold)),
                    s.notices().contains("Broadcast failed"),
                    s.last_error.clone(),
                )
            })
            .await;
        assert!(notice);
        assert!(last_error.unwrap().contains("relay down"));
        assert_eq!(phase, Phase::Idle);
        assert_eq!(sold, Some(1));
        assert_eq!(bus.sent_to(Scope::All).len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_after_configured_timeout() {
        let bus = Arc::new(RecordingBus::new());
        let replica = ReplicaClient::new(
            SessionId::from("user_me0000001"),
            default_catalog(),
            bus,
            Arc::new(test_clock()),
            &Config::default()
                .with_settlement_delay(Duration::from_secs(5))
                .with_shutdown_timeout(Duration::from_millis(50)),
        );
        replica.connect().await.unwrap();
        replica.select_flight(&FlightId::from("mad-nyc")).await.unwrap();
        replica.toggle_seat(0).await.unwrap();
        replica.submit().await.unwrap();
        settle().await;

        let result = replica.shutdown().await;

        assert!(matches!(
            result,
            Err(ClientError::Store(StoreError::ShutdownTimeout(_)))
        ));
    }
}
