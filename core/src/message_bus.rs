//! Message bus contract between a replica and the relay gateway.
//!
//! The relay accepts client connections, tags each with a session identity
//! and fans a message out to one of three scopes. Replicas only depend on
//! the [`MessageBus`] trait; how the relay moves bytes (sockets, polling,
//! an in-process hub) is its own business.
//!
//! # Delivery Model
//!
//! ```text
//!  replica A ──send(All)──►┌───────┐──► replica A (own echo)
//!                          │ relay │──► replica B
//!                          └───────┘──► replica C
//! ```
//!
//! - **Fire-and-forget**: `send` reports whether the relay accepted the
//!   payload, never whether anyone received it
//! - **No cross-replica ordering**: each replica sees messages in the order
//!   the relay delivers them to it, nothing more
//! - **Echoes**: a sender receives its own `All` and `OwnSession` messages
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use seatsync_core::message_bus::{MessageBus, Scope};
//!
//! async fn example(bus: impl MessageBus) -> Result<(), BusError> {
//!     let mut inbound = bus.connect().await?;
//!     bus.send(Scope::All, r#"{"type":"sync_request"}"#.to_string()).await?;
//!
//!     while let Some(frame) = inbound.next().await {
//!         handle(frame?);
//!     }
//!     Ok(())
//! }
//! ```

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Fan-out target of a broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Every live connection of the sender's own session
    #[serde(rename = "self")]
    OwnSession,
    /// Every live connection except the sending one
    Others,
    /// Every live connection, sender included
    All,
}

impl Scope {
    /// Stable label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OwnSession => "self",
            Self::Others => "others",
            Self::All => "all",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during message bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Failed to connect to the relay
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation requires a live connection
    #[error("Not connected to the relay")]
    NotConnected,

    /// The relay refused the payload
    #[error("Send failed for scope '{scope}': {reason}")]
    SendFailed {
        /// The scope that was targeted
        scope: Scope,
        /// The reason for failure
        reason: String,
    },

    /// The relay has shut down
    #[error("Relay closed")]
    Closed,
}

/// Inbound frames, in the order the relay delivered them to this replica.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<String, BusError>> + Send>>;

/// Boxed future returned by bus operations.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BusError>> + Send + 'a>>;

/// A replica's handle onto the relay.
///
/// One handle represents one client connection with a fixed session
/// identity. The inbound [`MessageStream`] returned by [`connect`] plays
/// the role of an `onMessage` callback: every delivered frame is yielded
/// exactly once, in delivery order.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures instead of `async fn` so reducers can hold
/// the bus as `Arc<dyn MessageBus>` inside effects.
///
/// [`connect`]: MessageBus::connect
pub trait MessageBus: Send + Sync {
    /// Open the connection and start receiving frames.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the relay cannot be reached.
    fn connect(&self) -> BusFuture<'_, MessageStream>;

    /// Fan `payload` out to `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NotConnected`] before `connect` succeeded, or
    /// [`BusError::SendFailed`]/[`BusError::Closed`] if the relay refuses it.
    fn send(&self, scope: Scope, payload: String) -> BusFuture<'_, ()>;

    /// Drop the connection. Terminal: in-flight work is not preserved.
    fn disconnect(&self);
}
