//! Wire format of messages exchanged between replicas.
//!
//! Every envelope is one JSON object:
//!
//! ```json
//! {
//!   "type": "seat_held",
//!   "senderSession": "user_k3j9x0a1b",
//!   "scope": "all",
//!   "flightId": "mad-nyc",
//!   "index": 3
//! }
//! ```

use crate::seat_map::Seat;
use crate::types::{FlightId, SessionId};
use seatsync_core::message_bus::Scope;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Kind of an envelope, as named in its `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A joining replica asks peers for their seat maps
    SyncRequest,
    /// A peer's seat map for one flight
    SyncResponse,
    /// A seat was held
    SeatHeld,
    /// Held seats were sold
    SeatsSold,
}

impl MessageKind {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SyncRequest => "sync_request",
            Self::SyncResponse => "sync_response",
            Self::SeatHeld => "seat_held",
            Self::SeatsSold => "seats_sold",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific fields of an envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Ask every peer for its seat maps
    SyncRequest,

    /// One flight's seat map
    SyncResponse {
        /// Flight the snapshot belongs to
        #[serde(rename = "flightId")]
        flight_id: FlightId,
        /// Every seat of the flight
        snapshot: Vec<Seat>,
    },

    /// The sender holds one seat
    SeatHeld {
        /// Flight of the seat
        #[serde(rename = "flightId")]
        flight_id: FlightId,
        /// Seat index
        index: usize,
    },

    /// The sender's held seats are sold
    SeatsSold {
        /// Flight of the seats
        #[serde(rename = "flightId")]
        flight_id: FlightId,
        /// Seat indices
        indices: Vec<usize>,
    },
}

impl Payload {
    /// Kind of this payload
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::SyncRequest => MessageKind::SyncRequest,
            Self::SyncResponse { .. } => MessageKind::SyncResponse,
            Self::SeatHeld { .. } => MessageKind::SeatHeld,
            Self::SeatsSold { .. } => MessageKind::SeatsSold,
        }
    }
}

/// Errors encoding or decoding envelopes.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// Serializing an envelope failed
    #[error("Failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    /// A frame was not a valid envelope
    #[error("Failed to decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

/// A message between replicas: who sent it, where to, and what it says.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Session of the sending replica
    #[serde(rename = "senderSession")]
    pub sender_session: SessionId,
    /// Fan-out scope the sender chose
    pub scope: Scope,
    /// Kind-specific fields
    #[serde(flatten)]
    pub payload: Payload,
}

impl Envelope {
    /// Build an envelope
    #[must_use]
    pub fn new(sender_session: SessionId, scope: Scope, payload: Payload) -> Self {
        Self {
            sender_session,
            scope,
            payload,
        }
    }

    /// Kind of this envelope
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Whether `session` sent this envelope
    #[must_use]
    pub fn is_from(&self, session: &SessionId) -> bool {
        &self.sender_session == session
    }

    /// Serialize to a JSON frame
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(EnvelopeError::Encode)
    }

    /// Parse a JSON frame
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Decode`] if the frame is not a valid envelope.
    pub fn decode(frame: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(frame).map_err(EnvelopeError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seat_map::SeatState;
    use serde_json::json;

    fn sender() -> SessionId {
        SessionId::from("user_k3j9x0a1b")
    }

    #[test]
    fn test_sync_request_wire_shape() {
        let envelope = Envelope::new(sender(), Scope::All, Payload::SyncRequest);
        let value = serde_json::to_value(&envelope).ok();
        assert_eq!(
            value,
            Some(json!({"type": "sync_request", "senderSession": "user_k3j9x0a1b", "scope": "all"}))
        );
    }

    #[test]
    fn test_seat_held_wire_shape() {
        let envelope = Envelope::new(
            sender(),
            Scope::All,
            Payload::SeatHeld {
                flight_id: FlightId::from("mad-nyc"),
                index: 3,
            },
        );
        let value = serde_json::to_value(&envelope).ok();
        assert_eq!(
            value,
            Some(json!({
                "type": "seat_held",
                "senderSession": "user_k3j9x0a1b",
                "scope": "all",
                "flightId": "mad-nyc",
                "index": 3
            }))
        );
    }

    #[test]
    fn test_decode_sync_response() {
        let frame = r#"{
            "type": "sync_response",
            "senderSession": "user_peer00001",
            "scope": "others",
            "flightId": "mad-lon",
            "snapshot": [
                {"index": 0, "state": "available", "holder": null},
                {"index": 1, "state": "sold", "holder": "user_peer00001"}
            ]
        }"#;

        let envelope = Envelope::decode(frame);
        let Ok(envelope) = envelope else {
            unreachable!("valid frame failed to decode: {envelope:?}");
        };

        assert_eq!(envelope.kind(), MessageKind::SyncResponse);
        assert_eq!(envelope.scope, Scope::Others);
        let Payload::SyncResponse { flight_id, snapshot } = envelope.payload else {
            unreachable!("wrong payload");
        };
        assert_eq!(flight_id, FlightId::from("mad-lon"));
        assert_eq!(snapshot[1].state, SeatState::Sold);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let frame = r#"{"type": "seat_teleported", "senderSession": "u", "scope": "all"}"#;
        assert!(matches!(Envelope::decode(frame), Err(EnvelopeError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_missing_sender() {
        let frame = r#"{"type": "sync_request", "scope": "all"}"#;
        assert!(Envelope::decode(frame).is_err());
    }

    #[test]
    fn test_is_from() {
        let envelope = Envelope::new(sender(), Scope::All, Payload::SyncRequest);
        assert!(envelope.is_from(&sender()));
        assert!(!envelope.is_from(&SessionId::from("user_other0000")));
    }
}
