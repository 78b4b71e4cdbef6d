//! # Seating
//!
//! Replicated flight seat maps kept consistent by broadcasting every change
//! through a fan-out relay.
//!
//! Each client is a full replica. There is no server-side seat store: a
//! replica joining late asks its peers for their seat maps and merges the
//! answers, and from then on applies every `seat_held` / `seats_sold`
//! envelope it receives, its own echoes included.
//!
//! ## Layout
//!
//! - [`types`] and [`catalog`]: sessions, flights, seat labels
//! - [`seat_map`]: the per-seat state machine and merge rule
//! - [`envelope`]: the JSON wire format
//! - [`reservation`]: select, submit, settle
//! - [`sync`]: join-time state transfer
//! - [`replica`]: the reducer tying the above to the runtime
//! - [`client`]: a replica wired to a message bus
//!
//! ## Example
//!
//! ```ignore
//! let relay = Relay::new();
//! let session = SessionId::generate();
//! let replica = ReplicaClient::new(
//!     session.clone(),
//!     default_catalog(),
//!     Arc::new(relay.bus(session.as_str())),
//!     Arc::new(SystemClock),
//!     &Config::from_env(),
//! );
//! replica.connect().await?;
//! replica.select_flight(&FlightId::from("mad-nyc")).await?;
//! replica.toggle_seat(3).await?;
//! replica.submit().await?;
//! ```

pub mod catalog;
pub mod client;
pub mod config;
pub mod envelope;
pub mod notices;
pub mod replica;
pub mod reservation;
pub mod seat_map;
pub mod sync;
pub mod types;

pub use client::{ClientError, ReplicaClient, ReplicaStore};
pub use config::Config;
pub use envelope::{Envelope, EnvelopeError, MessageKind, Payload};
pub use notices::{Notice, NoticeLevel, NoticeLog};
pub use replica::{
    ConnectionStatus, ReplicaAction, ReplicaEnvironment, ReplicaReducer, ReplicaState,
};
pub use reservation::{Phase, ReservationWorkflow, WorkflowError};
pub use seat_map::{MergeReport, Seat, SeatError, SeatMap, SeatState};
pub use sync::SyncCoordinator;
pub use types::{Cabin, Flight, FlightId, SessionId, seat_label, seat_labels};
