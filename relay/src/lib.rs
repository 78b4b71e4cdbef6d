//! # SeatSync Relay
//!
//! In-process relay gateway for SeatSync replicas.
//!
//! The relay keeps one outbound queue per client connection and fans each
//! payload out according to its [`Scope`]:
//!
//! | Scope        | Delivered to                                      |
//! |--------------|---------------------------------------------------|
//! | `All`        | every live connection, the sender included        |
//! | `Others`     | every live connection except the sending one      |
//! | `OwnSession` | every live connection tagged with the sender's session |
//!
//! Each connection sees frames in the order the relay enqueued them for it.
//! Nothing is ordered across connections.
//!
//! ## Example
//!
//! ```ignore
//! use seatsync_relay::Relay;
//!
//! let relay = Relay::new();
//! let bus = Arc::new(relay.bus("user_abc123xyz"));
//! let inbound = bus.connect().await?;
//! ```

use futures::StreamExt;
use seatsync_core::message_bus::{BusError, BusFuture, MessageBus, MessageStream, Scope};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;

/// Identifier the relay assigns to each accepted connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One live connection: its session tag and its outbound queue.
struct ConnectionEntry {
    session: String,
    outbound: mpsc::UnboundedSender<String>,
}

struct RelayInner {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// The relay hub. Cheap to clone; clones share the same connections.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("connections", &self.connection_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Relay {
    /// Create an open relay with no connections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RelayInner {
                connections: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// A client handle for `session`. Not connected until
    /// [`MessageBus::connect`] is called on it.
    #[must_use]
    pub fn bus(&self, session: impl Into<String>) -> RelayBus {
        RelayBus {
            relay: self.clone(),
            session: session.into(),
            connection: Mutex::new(None),
        }
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.read().len()
    }

    /// Number of live connections tagged with `session`.
    #[must_use]
    pub fn session_connection_count(&self, session: &str) -> usize {
        self.read().values().filter(|c| c.session == session).count()
    }

    /// Whether [`close`](Relay::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Shut the relay down.
    ///
    /// Every inbound stream ends, later `connect` calls fail with
    /// [`BusError::Closed`], and later sends fail the same way.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let dropped = {
            let mut connections = self.write();
            let count = connections.len();
            connections.clear();
            count
        };
        metrics::gauge!("relay.connections.active").set(0.0);
        tracing::info!(dropped, "Relay closed");
    }

    fn register(
        &self,
        session: &str,
    ) -> Result<(ConnectionId, mpsc::UnboundedReceiver<String>), BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();

        let active = {
            let mut connections = self.write();
            connections.insert(
                id,
                ConnectionEntry {
                    session: session.to_string(),
                    outbound: tx,
                },
            );
            connections.len()
        };

        metrics::counter!("relay.connections.opened").increment(1);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("relay.connections.active").set(active as f64);
        tracing::info!(conn_id = %id, session, "Connection registered");

        Ok((id, rx))
    }

    fn unregister(&self, id: ConnectionId) {
        let removed = self.write().remove(&id);
        if let Some(entry) = removed {
            metrics::gauge!("relay.connections.active").decrement(1.0);
            tracing::info!(conn_id = %id, session = %entry.session, "Connection unregistered");
        }
    }

    /// Fan `payload` out from connection `from` to `scope`.
    fn route(&self, from: ConnectionId, scope: Scope, payload: &str) -> Result<usize, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let mut stale = Vec::new();
        let delivered = {
            let connections = self.read();
            let Some(sender) = connections.get(&from) else {
                return Err(BusError::NotConnected);
            };
            let sender_session = sender.session.as_str();

            let mut delivered = 0;
            for (id, entry) in connections.iter() {
                let target = match scope {
                    Scope::All => true,
                    Scope::Others => *id != from,
                    Scope::OwnSession => entry.session == sender_session,
                };
                if !target {
                    continue;
                }
                if entry.outbound.send(payload.to_string()).is_ok() {
                    delivered += 1;
                } else {
                    stale.push(*id);
                }
            }
            delivered
        };

        for id in stale {
            tracing::debug!(conn_id = %id, "Dropping connection with closed stream");
            self.unregister(id);
        }

        metrics::counter!("relay.messages.received").increment(1);
        metrics::counter!("relay.messages.delivered", "scope" => scope.as_str())
            .increment(delivered as u64);
        tracing::trace!(conn_id = %from, %scope, delivered, "Routed payload");

        Ok(delivered)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ConnectionId, ConnectionEntry>> {
        self.inner
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ConnectionId, ConnectionEntry>> {
        self.inner
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A replica's connection to a [`Relay`].
///
/// Connecting again replaces the previous connection; its stream ends.
pub struct RelayBus {
    relay: Relay,
    session: String,
    connection: Mutex<Option<ConnectionId>>,
}

impl fmt::Debug for RelayBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayBus")
            .field("session", &self.session)
            .field("connection", &self.connection_id())
            .finish_non_exhaustive()
    }
}

impl RelayBus {
    /// The session this handle is tagged with.
    #[must_use]
    pub fn session(&self) -> &str {
        &self.session
    }

    /// The live connection, if any.
    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        *self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace_connection(&self, next: Option<ConnectionId>) -> Option<ConnectionId> {
        let mut slot = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, next)
    }
}

impl MessageBus for RelayBus {
    fn connect(&self) -> BusFuture<'_, MessageStream> {
        Box::pin(async move {
            let (id, mut rx) = self.relay.register(&self.session).map_err(|error| match error {
                BusError::Closed => BusError::ConnectionFailed("relay closed".to_string()),
                other => other,
            })?;

            if let Some(previous) = self.replace_connection(Some(id)) {
                self.relay.unregister(previous);
            }

            let stream = async_stream::stream! {
                while let Some(frame) = rx.recv().await {
                    yield Ok::<String, BusError>(frame);
                }
            };
            Ok(stream.boxed())
        })
    }

    fn send(&self, scope: Scope, payload: String) -> BusFuture<'_, ()> {
        Box::pin(async move {
            let Some(id) = self.connection_id() else {
                return Err(BusError::NotConnected);
            };
            self.relay.route(id, scope, &payload).map(|_| ())
        })
    }

    fn disconnect(&self) {
        if let Some(id) = self.replace_connection(None) {
            self.relay.unregister(id);
        }
    }
}

impl Drop for RelayBus {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(7).to_string(), "conn-7");
    }

    #[test]
    fn test_bus_starts_disconnected() {
        let relay = Relay::new();
        let bus = relay.bus("user_a");
        assert_eq!(bus.session(), "user_a");
        assert!(bus.connection_id().is_none());
        assert_eq!(relay.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_previous_connection() {
        let relay = Relay::new();
        let bus = relay.bus("user_a");

        let first = bus.connect().await;
        assert!(first.is_ok());
        let second = bus.connect().await;
        assert!(second.is_ok());

        assert_eq!(relay.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let relay = Relay::new();
        {
            let bus = relay.bus("user_a");
            let _stream = bus.connect().await;
            assert_eq!(relay.connection_count(), 1);
        }
        assert_eq!(relay.connection_count(), 0);
    }
}
