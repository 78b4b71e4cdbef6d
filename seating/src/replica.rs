//! The replica reducer: one client's view of every seat map.
//!
//! Local intents (select, toggle, submit) and envelopes received from the
//! relay are both [`ReplicaAction`]s. The reducer applies them to
//! [`ReplicaState`] one at a time and describes the broadcasts and timers
//! the runtime must perform.
//!
//! # Dispatch
//!
//! | Envelope        | Handling                                   |
//! |-----------------|--------------------------------------------|
//! | `sync_request`  | answer with every seat map (peers only)    |
//! | `sync_response` | merge into the flight's seat map           |
//! | `seat_held`     | `try_hold` for the sender                  |
//! | `seats_sold`    | `confirm_sold` for the sender              |
//!
//! The replica's own envelopes come back as echoes. They go through the
//! same handlers, where they are no-ops: the seat is already Held (or Sold)
//! locally, so the echo is dropped silently instead of being reported as a
//! peer update.

use crate::catalog;
use crate::config::Config;
use crate::envelope::{Envelope, Payload};
use crate::notices::{NoticeLevel, NoticeLog};
use crate::reservation::{Phase, ReservationWorkflow, Selection, Toggled, WorkflowError};
use crate::seat_map::{Seat, SeatError, SeatMap, SeatState};
use crate::sync::SyncCoordinator;
use crate::types::{Flight, FlightId, SessionId, seat_label, seat_labels};
use seatsync_core::{
    async_effect, broadcast, delay,
    effect::Effect,
    environment::Clock,
    message_bus::{BusError, MessageBus, Scope},
    reducer::Reducer,
};
use smallvec::{SmallVec, smallvec};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// State
// ============================================================================

/// Connection status as last reported to the reducer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// `connect` has not completed
    Connecting,
    /// Connected to the relay
    Connected,
    /// `connect` failed
    Failed(String),
    /// Disconnected for good
    Closed,
}

/// Everything one replica knows.
#[derive(Clone, Debug)]
pub struct ReplicaState {
    session: SessionId,
    catalog: Vec<Flight>,
    seat_maps: BTreeMap<FlightId, SeatMap>,
    workflow: ReservationWorkflow,
    sync: SyncCoordinator,
    notices: NoticeLog,
    connection: ConnectionStatus,
    envelopes_received: u64,
    /// Last rejected request or failure, for callers that need the reason
    pub last_error: Option<String>,
}

impl ReplicaState {
    /// Fresh state: every seat of every catalog flight Available.
    #[must_use]
    pub fn new(session: SessionId, catalog: Vec<Flight>, config: &Config) -> Self {
        let seat_maps = catalog
            .iter()
            .map(|f| (f.id.clone(), SeatMap::new(f.seats)))
            .collect();

        Self {
            session,
            catalog,
            seat_maps,
            workflow: ReservationWorkflow::new(config.max_selection),
            sync: SyncCoordinator::new(),
            notices: NoticeLog::new(config.notice_capacity),
            connection: ConnectionStatus::Connecting,
            envelopes_received: 0,
            last_error: None,
        }
    }

    /// This replica's session
    #[must_use]
    pub const fn session(&self) -> &SessionId {
        &self.session
    }

    /// Flights carried by this replica
    #[must_use]
    pub fn flights(&self) -> &[Flight] {
        &self.catalog
    }

    /// Seat map of one flight
    #[must_use]
    pub fn seat_map(&self, flight: &FlightId) -> Option<&SeatMap> {
        self.seat_maps.get(flight)
    }

    /// Available seats on `flight`, 0 for unknown flights
    #[must_use]
    pub fn available(&self, flight: &FlightId) -> usize {
        self.seat_map(flight).map_or(0, SeatMap::available_count)
    }

    /// The reservation workflow
    #[must_use]
    pub const fn workflow(&self) -> &ReservationWorkflow {
        &self.workflow
    }

    /// Current workflow phase
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.workflow.phase()
    }

    /// Current selection
    #[must_use]
    pub const fn selection(&self) -> &Selection {
        self.workflow.selection()
    }

    /// Price of the current selection
    #[must_use]
    pub fn total_price(&self) -> u64 {
        self.workflow.total_price()
    }

    /// Sync bookkeeping
    #[must_use]
    pub const fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    /// User-visible notices, newest first
    #[must_use]
    pub const fn notices(&self) -> &NoticeLog {
        &self.notices
    }

    /// Connection status
    #[must_use]
    pub const fn connection(&self) -> &ConnectionStatus {
        &self.connection
    }

    /// Envelopes reduced so far, own echoes included
    #[must_use]
    pub const fn envelopes_received(&self) -> u64 {
        self.envelopes_received
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Every input to a replica.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplicaAction {
    // Connection lifecycle
    /// The bus connected; ask peers for their state
    Connected,
    /// The bus could not connect
    ConnectionFailed {
        /// Why
        reason: String,
    },
    /// The bus was disconnected; terminal
    Disconnected,

    // User intents
    /// Start choosing seats on a flight
    SelectFlight {
        /// Flight to view
        flight_id: FlightId,
    },
    /// Add or remove a seat from the selection
    ToggleSeat {
        /// Seat index
        index: usize,
    },
    /// Hold the selected seats
    Submit,
    /// Drop the selection
    Cancel,

    // Effect feedback
    /// Every hold of a reservation has been broadcast
    HoldsSent {
        /// Reservation
        reservation_id: Uuid,
    },
    /// The settlement delay of a reservation elapsed
    SettlementElapsed {
        /// Reservation
        reservation_id: Uuid,
    },
    /// The bus refused a broadcast
    BroadcastFailed {
        /// Why
        reason: String,
    },

    // Inbound
    /// An envelope arrived from the relay
    EnvelopeReceived {
        /// The decoded envelope
        envelope: Envelope,
    },
}

impl ReplicaAction {
    fn broadcast_failed(error: &BusError) -> Self {
        Self::BroadcastFailed {
            reason: error.to_string(),
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies injected into the reducer.
#[derive(Clone)]
pub struct ReplicaEnvironment {
    /// Relay connection
    pub bus: Arc<dyn MessageBus>,
    /// Timestamps for notices
    pub clock: Arc<dyn Clock>,
    /// Delay between holding and selling seats
    pub settlement_delay: Duration,
}

impl ReplicaEnvironment {
    /// Build an environment
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        settlement_delay: Duration,
    ) -> Self {
        Self {
            bus,
            clock,
            settlement_delay,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for one replica.
#[derive(Clone, Debug, Default)]
pub struct ReplicaReducer;

impl ReplicaReducer {
    /// Creates a new `ReplicaReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn notice(
        state: &mut ReplicaState,
        env: &ReplicaEnvironment,
        level: NoticeLevel,
        message: impl Into<String>,
    ) {
        state.notices.push(env.clock.now(), level, message);
    }

    /// Record a refused request: notice plus `last_error`.
    fn reject(state: &mut ReplicaState, env: &ReplicaEnvironment, error: &WorkflowError) {
        tracing::debug!(session = %state.session, %error, "Request rejected");
        state.last_error = Some(error.to_string());
        Self::notice(state, env, NoticeLevel::Warning, error.to_string());
    }

    /// Encode `envelope` and describe sending it.
    fn send(
        state: &mut ReplicaState,
        env: &ReplicaEnvironment,
        envelope: &Envelope,
    ) -> Effect<ReplicaAction> {
        match envelope.encode() {
            Ok(payload) => broadcast! {
                bus: env.bus,
                scope: envelope.scope,
                payload: payload,
                on_success: || None,
                on_error: |error| Some(ReplicaAction::broadcast_failed(&error))
            },
            Err(error) => {
                tracing::error!(%error, kind = %envelope.kind(), "Failed to encode envelope");
                state.last_error = Some(error.to_string());
                let message = format!("Could not send {}", envelope.kind());
                Self::notice(state, env, NoticeLevel::Error, message);
                Effect::None
            },
        }
    }

    // ========== Connection ==========

    fn connected(
        state: &mut ReplicaState,
        env: &ReplicaEnvironment,
    ) -> SmallVec<[Effect<ReplicaAction>; 4]> {
        state.connection = ConnectionStatus::Connected;
        tracing::info!(session = %state.session, "Replica connected, requesting sync");
        Self::notice(state, env, NoticeLevel::Success, "Connected to the reservation system");

        let request = SyncCoordinator::request(state.session.clone());
        smallvec![Self::send(state, env, &request)]
    }

    // ========== User intents ==========

    fn select_flight(
        state: &mut ReplicaState,
        env: &ReplicaEnvironment,
        flight_id: &FlightId,
    ) -> SmallVec<[Effect<ReplicaAction>; 4]> {
        let Some(flight) = catalog::find(&state.catalog, flight_id).cloned() else {
            Self::reject(state, env, &WorkflowError::UnknownFlight(flight_id.clone()));
            return SmallVec::new();
        };

        match state.workflow.select_flight(&flight) {
            Ok(()) => {
                tracing::debug!(session = %state.session, flight = %flight.id, "Flight selected");
                state.last_error = None;
            },
            Err(error) => Self::reject(state, env, &error),
        }
        SmallVec::new()
    }

    fn toggle_seat(
        state: &mut ReplicaState,
        env: &ReplicaEnvironment,
        index: usize,
    ) -> SmallVec<[Effect<ReplicaAction>; 4]> {
        let Some(flight_id) = state.workflow.flight().map(|f| f.id.clone()) else {
            Self::reject(state, env, &WorkflowError::NoFlightSelected);
            return SmallVec::new();
        };
        let result = match state.seat_maps.get(&flight_id) {
            Some(seats) => state.workflow.toggle_seat(index, seats),
            None => Err(WorkflowError::UnknownFlight(flight_id)),
        };

        match result {
            Ok(Toggled::Added | Toggled::Removed) => state.last_error = None,
            Err(error) => Self::reject(state, env, &error),
        }
        SmallVec::new()
    }

    fn submit(
        state: &mut ReplicaState,
        env: &ReplicaEnvironment,
    ) -> SmallVec<[Effect<ReplicaAction>; 4]> {
        let Some(flight_id) = state.workflow.flight().map(|f| f.id.clone()) else {
            Self::reject(state, env, &WorkflowError::NoFlightSelected);
            return SmallVec::new();
        };
        let Some(seats) = state.seat_maps.get_mut(&flight_id) else {
            Self::reject(state, env, &WorkflowError::UnknownFlight(flight_id));
            return SmallVec::new();
        };

        let outcome = match state.workflow.submit(seats, &state.session, Uuid::new_v4()) {
            Ok(outcome) => outcome,
            Err(error) => {
                Self::reject(state, env, &error);
                return SmallVec::new();
            },
        };

        for (index, error) in &outcome.rejected {
            tracing::info!(
                session = %state.session,
                index,
                %error,
                "Seat lost to a concurrent hold"
            );
            Self::notice(
                state,
                env,
                NoticeLevel::Warning,
                format!("Seat {} was taken by another passenger", seat_label(*index)),
            );
        }

        let Some(reservation_id) = outcome.reservation_id else {
            let message = "None of the selected seats could be held";
            state.last_error = Some(message.to_string());
            Self::notice(state, env, NoticeLevel::Warning, message);
            return SmallVec::new();
        };

        metrics::counter!("replica.seats.held").increment(outcome.held.len() as u64);
        tracing::info!(
            session = %state.session,
            flight = %flight_id,
            %reservation_id,
            seats = ?outcome.held,
            "Seats held, broadcasting"
        );
        state.last_error = None;
        Self::notice(
            state,
            env,
            NoticeLevel::Info,
            format!(
                "Reserving {} seat(s) on {}: {}",
                outcome.held.len(),
                flight_id,
                seat_labels(&outcome.held)
            ),
        );

        let mut effects: Vec<Effect<ReplicaAction>> = outcome
            .held
            .iter()
            .map(|&index| {
                let envelope = Envelope::new(
                    state.session.clone(),
                    Scope::All,
                    Payload::SeatHeld {
                        flight_id: flight_id.clone(),
                        index,
                    },
                );
                Self::send(state, env, &envelope)
            })
            .collect();
        effects.push(async_effect! {
            Some(ReplicaAction::HoldsSent { reservation_id })
        });

        smallvec![Effect::Sequential(effects)]
    }

    fn cancel(
        state: &mut ReplicaState,
        env: &ReplicaEnvironment,
    ) -> SmallVec<[Effect<ReplicaAction>; 4]> {
        match state.workflow.cancel() {
            Ok(()) => state.last_error = None,
            Err(error) => Self::reject(state, env, &error),
        }
        SmallVec::new()
    }

    // ========== Settlement ==========

    fn holds_sent(
        state: &mut ReplicaState,
        env: &ReplicaEnvironment,
        reservation_id: Uuid,
    ) -> SmallVec<[Effect<ReplicaAction>; 4]> {
        if !state.workflow.holds_sent(reservation_id) {
            tracing::debug!(%reservation_id, "Stale HoldsSent ignored");
            return SmallVec::new();
        }

        tracing::debug!(
            %reservation_id,
            delay_ms = env.settlement_delay.as_millis(),
            "Awaiting settlement"
        );
        smallvec![delay! {
            duration: env.settlement_delay,
            action: ReplicaAction::SettlementElapsed { reservation_id }
        }]
    }

    fn settlement_elapsed(
        state: &mut ReplicaState,
        env: &ReplicaEnvironment,
        reservation_id: Uuid,
    ) -> SmallVec<[Effect<ReplicaAction>; 4]> {
        if state.connection == ConnectionStatus::Closed {
            tracing::debug!(%reservation_id, "Replica closed, settlement dropped");
            return SmallVec::new();
        }

        let Some(reservation) = state.workflow.settle(reservation_id) else {
            tracing::debug!(%reservation_id, "Stale settlement ignored");
            return SmallVec::new();
        };

        if let Some(seats) = state.seat_maps.get_mut(&reservation.flight_id) {
            let results = seats.confirm_sold(&reservation.indices, &state.session);
            for error in results.into_iter().filter_map(Result::err) {
                tracing::warn!(%reservation_id, %error, "Local confirmation failed");
            }
        }

        metrics::counter!("replica.seats.sold").increment(reservation.indices.len() as u64);
        metrics::counter!("replica.reservations.settled").increment(1);
        tracing::info!(
            session = %state.session,
            flight = %reservation.flight_id,
            %reservation_id,
            seats = ?reservation.indices,
            "Reservation settled"
        );
        Self::notice(
            state,
            env,
            NoticeLevel::Success,
            format!(
                "Reservation confirmed: {} seat(s) on {}",
                reservation.indices.len(),
                reservation.flight_id
            ),
        );

        let envelope = Envelope::new(
            state.session.clone(),
            Scope::All,
            Payload::SeatsSold {
                flight_id: reservation.flight_id,
                indices: reservation.indices,
            },
        );
        smallvec![Self::send(state, env, &envelope)]
    }

    // ========== Inbound dispatch ==========

    fn envelope_received(
        state: &mut ReplicaState,
        env: &ReplicaEnvironment,
        envelope: &Envelope,
    ) -> SmallVec<[Effect<ReplicaAction>; 4]> {
        let own = envelope.is_from(&state.session);
        state.envelopes_received += 1;
        metrics::counter!("replica.envelopes.received", "type" => envelope.kind().as_str())
            .increment(1);
        tracing::trace!(
            session = %state.session,
            kind = %envelope.kind(),
            own,
            "Envelope received"
        );

        match &envelope.payload {
            Payload::SyncRequest => {
                let responses =
                    SyncCoordinator::respond(&state.session, envelope, &state.seat_maps);
                if responses.is_empty() {
                    return SmallVec::new();
                }
                tracing::debug!(
                    session = %state.session,
                    requester = %envelope.sender_session,
                    flights = responses.len(),
                    "Answering sync request"
                );
                let effects = responses
                    .iter()
                    .map(|response| Self::send(state, env, response))
                    .collect();
                smallvec![Effect::Sequential(effects)]
            },
            Payload::SyncResponse { flight_id, snapshot } => {
                let sender = &envelope.sender_session;
                Self::sync_response(state, env, sender, flight_id, snapshot);
                SmallVec::new()
            },
            Payload::SeatHeld { flight_id, index } => {
                Self::seat_held(state, env, &envelope.sender_session, own, flight_id, *index);
                SmallVec::new()
            },
            Payload::SeatsSold { flight_id, indices } => {
                let sender = &envelope.sender_session;
                Self::seats_sold(state, env, sender, own, flight_id, indices);
                SmallVec::new()
            },
        }
    }

    fn sync_response(
        state: &mut ReplicaState,
        env: &ReplicaEnvironment,
        sender: &SessionId,
        flight_id: &FlightId,
        snapshot: &[Seat],
    ) {
        let applied = state
            .sync
            .apply_response(&mut state.seat_maps, flight_id, snapshot);
        let Some(outcome) = applied else {
            tracing::warn!(
                %sender,
                flight = %flight_id,
                "Sync response for unknown flight ignored"
            );
            return;
        };

        metrics::counter!("replica.sync.merged").increment(1);
        tracing::debug!(
            session = %state.session,
            %sender,
            flight = %flight_id,
            adopted = outcome.report.adopted.len(),
            promoted = outcome.report.promoted.len(),
            skipped = outcome.report.skipped,
            "Merged sync response"
        );

        if outcome.first {
            Self::notice(state, env, NoticeLevel::Info, "State synchronized with peers");
        }
    }

    fn seat_held(
        state: &mut ReplicaState,
        env: &ReplicaEnvironment,
        sender: &SessionId,
        own: bool,
        flight_id: &FlightId,
        index: usize,
    ) {
        let Some(seats) = state.seat_maps.get_mut(flight_id) else {
            tracing::warn!(%sender, flight = %flight_id, "Hold for unknown flight ignored");
            return;
        };

        match seats.try_hold(index, sender) {
            Ok(()) if own => {
                tracing::debug!(
                    index,
                    flight = %flight_id,
                    "Own hold applied from another connection"
                );
            },
            Ok(()) => {
                Self::notice(
                    state,
                    env,
                    NoticeLevel::Info,
                    format!(
                        "Seat {} on {} held by another passenger",
                        seat_label(index),
                        flight_id
                    ),
                );
            },
            Err(SeatError::SeatUnavailable { .. })
                if seats.get(index).and_then(|s| s.holder.as_ref()) == Some(sender) =>
            {
                // Own echo, or a peer's hold already learned through sync
                tracing::trace!(index, flight = %flight_id, own, "Duplicate hold ignored");
            },
            Err(error) => {
                tracing::info!(%sender, flight = %flight_id, %error, "Conflicting hold dropped");
                Self::notice(
                    state,
                    env,
                    NoticeLevel::Warning,
                    format!("Hold on seat {} ignored: {}", seat_label(index), error),
                );
            },
        }
    }

    fn seats_sold(
        state: &mut ReplicaState,
        env: &ReplicaEnvironment,
        sender: &SessionId,
        own: bool,
        flight_id: &FlightId,
        indices: &[usize],
    ) {
        let Some(seats) = state.seat_maps.get_mut(flight_id) else {
            tracing::warn!(%sender, flight = %flight_id, "Sale for unknown flight ignored");
            return;
        };

        let results = seats.confirm_sold(indices, sender);
        let sold = results.iter().filter(|r| r.is_ok()).count();
        let unexpected: Vec<SeatError> = results
            .into_iter()
            .filter_map(Result::err)
            .filter(|e| !matches!(e, SeatError::InvalidTransition { state: SeatState::Sold, .. }))
            .collect();

        for error in &unexpected {
            tracing::warn!(%sender, flight = %flight_id, %error, "Sale could not be applied");
            Self::notice(state, env, NoticeLevel::Warning, format!("Sale not applied: {error}"));
        }

        if !own && sold > 0 {
            Self::notice(
                state,
                env,
                NoticeLevel::Success,
                format!("Another passenger confirmed {sold} seat(s) on {flight_id}"),
            );
        }
    }
}

impl Reducer for ReplicaReducer {
    type State = ReplicaState;
    type Action = ReplicaAction;
    type Environment = ReplicaEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Connection ==========
            ReplicaAction::Connected => Self::connected(state, env),
            ReplicaAction::ConnectionFailed { reason } => {
                tracing::warn!(session = %state.session, %reason, "Connection failed");
                let message = format!("Connection error: {reason}");
                Self::notice(state, env, NoticeLevel::Error, message);
                state.last_error = Some(reason.clone());
                state.connection = ConnectionStatus::Failed(reason);
                SmallVec::new()
            },
            ReplicaAction::Disconnected => {
                tracing::info!(session = %state.session, "Replica disconnected");
                state.connection = ConnectionStatus::Closed;
                Self::notice(state, env, NoticeLevel::Info, "Disconnected");
                SmallVec::new()
            },

            // ========== User intents ==========
            ReplicaAction::SelectFlight { flight_id } => {
                Self::select_flight(state, env, &flight_id)
            },
            ReplicaAction::ToggleSeat { index } => Self::toggle_seat(state, env, index),
            ReplicaAction::Submit => Self::submit(state, env),
            ReplicaAction::Cancel => Self::cancel(state, env),

            // ========== Effect feedback ==========
            ReplicaAction::HoldsSent { reservation_id } => {
                Self::holds_sent(state, env, reservation_id)
            },
            ReplicaAction::SettlementElapsed { reservation_id } => {
                Self::settlement_elapsed(state, env, reservation_id)
            },
            ReplicaAction::BroadcastFailed { reason } => {
                tracing::warn!(session = %state.session, %reason, "Broadcast failed");
                let message = format!("Broadcast failed: {reason}");
                Self::notice(state, env, NoticeLevel::Error, message);
                state.last_error = Some(reason);
                SmallVec::new()
            },

            // ========== Inbound ==========
            ReplicaAction::EnvelopeReceived { envelope } => {
                Self::envelope_received(state, env, &envelope)
            },
        }
    }
}
