//! Reservation workflow: choose seats, hold them, settle them.
//!
//! ```text
//!      select flight        submit                 holds sent
//! Idle ─────────────► Selecting ───► Submitting ────────────► AwaitingConfirmation
//!   ▲                   │  ▲             │                          │
//!   ├──── cancel ───────┘  └─ all holds ─┘                          │
//!   │                          failed                               │
//!   └──────────────────────────── settled ──────────────────────────┘
//! ```
//!
//! The workflow owns the local selection and the one pending reservation.
//! Seat state itself lives in the [`SeatMap`]; the workflow only calls its
//! transitions.

use crate::seat_map::{SeatError, SeatMap, SeatState};
use crate::types::{Flight, FlightId, SessionId, seat_labels};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Errors
// ============================================================================

/// Requests the workflow refuses. None of them are fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// The selection is full
    #[error("Maximum {limit} seats per reservation")]
    SelectionLimitExceeded {
        /// Configured limit
        limit: usize,
    },

    /// The seat is not Available locally
    #[error("Seat {label} is not available")]
    SeatNotAvailable {
        /// Seat index
        index: usize,
        /// Seat label, e.g. `2B`
        label: String,
    },

    /// A seat was toggled or a reservation submitted with no flight chosen
    #[error("No flight selected")]
    NoFlightSelected,

    /// The flight is not in the catalog
    #[error("Unknown flight '{0}'")]
    UnknownFlight(FlightId),

    /// A reservation is being submitted or settled
    #[error("A reservation is already in progress")]
    ReservationInProgress,

    /// Submit with nothing selected
    #[error("No seats selected")]
    EmptySelection,
}

// ============================================================================
// Phase and Selection
// ============================================================================

/// Where the workflow is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No flight chosen
    Idle,
    /// Choosing seats on a flight
    Selecting,
    /// Holds taken locally, broadcasts in flight
    Submitting,
    /// Waiting for settlement
    AwaitingConfirmation,
}

/// Seats the user intends to reserve. Local only; never broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    indices: Vec<usize>,
    limit: usize,
}

/// Effect of a toggle on the selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toggled {
    /// The seat joined the selection
    Added,
    /// The seat left the selection
    Removed,
}

impl Selection {
    /// Empty selection bounded by `limit`
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            indices: Vec::new(),
            limit,
        }
    }

    /// Selected indices, in the order they were added
    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Whether `index` is selected
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.indices.contains(&index)
    }

    /// Number of selected seats
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether nothing is selected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Maximum number of seats
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    fn clear(&mut self) {
        self.indices.clear();
    }

    fn take(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.indices)
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// A submitted reservation waiting for settlement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingReservation {
    /// Identifies the settlement timer
    pub id: Uuid,
    /// Flight of the seats
    pub flight_id: FlightId,
    /// Seats held locally
    pub indices: Vec<usize>,
}

/// Result of a submit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Reservation id; `None` when no hold succeeded
    pub reservation_id: Option<Uuid>,
    /// Flight of the seats
    pub flight_id: FlightId,
    /// Seats held, to broadcast
    pub held: Vec<usize>,
    /// Seats lost to a race
    pub rejected: Vec<(usize, SeatError)>,
}

// ============================================================================
// Workflow
// ============================================================================

/// The workflow state machine.
#[derive(Clone, Debug)]
pub struct ReservationWorkflow {
    phase: Phase,
    flight: Option<Flight>,
    selection: Selection,
    pending: Option<PendingReservation>,
}

impl ReservationWorkflow {
    /// Idle workflow whose selections hold at most `max_selection` seats
    #[must_use]
    pub const fn new(max_selection: usize) -> Self {
        Self {
            phase: Phase::Idle,
            flight: None,
            selection: Selection::new(max_selection),
            pending: None,
        }
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// The flight being viewed
    #[must_use]
    pub const fn flight(&self) -> Option<&Flight> {
        self.flight.as_ref()
    }

    /// The current selection
    #[must_use]
    pub const fn selection(&self) -> &Selection {
        &self.selection
    }

    /// The reservation waiting for settlement
    #[must_use]
    pub const fn pending(&self) -> Option<&PendingReservation> {
        self.pending.as_ref()
    }

    /// Selected seats × flight price
    #[must_use]
    pub fn total_price(&self) -> u64 {
        let price = self.flight.as_ref().map_or(0, |f| u64::from(f.price));
        self.selection.len() as u64 * price
    }

    /// Labels of the selected seats, e.g. `1D, 2B`
    #[must_use]
    pub fn selection_labels(&self) -> String {
        seat_labels(self.selection.indices())
    }

    fn ensure_not_busy(&self) -> Result<(), WorkflowError> {
        match self.phase {
            Phase::Submitting | Phase::AwaitingConfirmation => {
                Err(WorkflowError::ReservationInProgress)
            },
            Phase::Idle | Phase::Selecting => Ok(()),
        }
    }

    /// `Idle | Selecting → Selecting` on `flight`, with an empty selection.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::ReservationInProgress`] while a reservation is
    /// being submitted or settled.
    pub fn select_flight(&mut self, flight: &Flight) -> Result<(), WorkflowError> {
        self.ensure_not_busy()?;
        self.flight = Some(flight.clone());
        self.selection.clear();
        self.phase = Phase::Selecting;
        Ok(())
    }

    /// Add or remove seat `index` from the selection.
    ///
    /// Removing is always allowed. Adding requires the seat to be
    /// Available in `seats` and the selection to have room.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::NoFlightSelected`] while Idle
    /// - [`WorkflowError::ReservationInProgress`] while submitting or settling
    /// - [`WorkflowError::SeatNotAvailable`] if the seat is not Available
    /// - [`WorkflowError::SelectionLimitExceeded`] if the selection is full
    pub fn toggle_seat(&mut self, index: usize, seats: &SeatMap) -> Result<Toggled, WorkflowError> {
        self.ensure_not_busy()?;
        if self.phase == Phase::Idle {
            return Err(WorkflowError::NoFlightSelected);
        }

        if let Some(position) = self.selection.indices.iter().position(|&i| i == index) {
            self.selection.indices.remove(position);
            return Ok(Toggled::Removed);
        }

        if seats.state(index) != Some(SeatState::Available) {
            return Err(WorkflowError::SeatNotAvailable {
                index,
                label: crate::types::seat_label(index),
            });
        }

        if self.selection.len() >= self.selection.limit {
            return Err(WorkflowError::SelectionLimitExceeded {
                limit: self.selection.limit,
            });
        }

        self.selection.indices.push(index);
        Ok(Toggled::Added)
    }

    /// Drop the selection and return to Idle.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::ReservationInProgress`] once holds were taken;
    /// they cannot be released.
    pub fn cancel(&mut self) -> Result<(), WorkflowError> {
        self.ensure_not_busy()?;
        self.selection.clear();
        self.flight = None;
        self.phase = Phase::Idle;
        Ok(())
    }

    /// `Selecting → Submitting`: hold every selected seat for `me`.
    ///
    /// The selection is consumed. Seats lost to a race are reported in
    /// [`SubmitOutcome::rejected`]. If none could be held the workflow
    /// goes back to Selecting on the same flight.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::NoFlightSelected`] while Idle
    /// - [`WorkflowError::ReservationInProgress`] while submitting or settling
    /// - [`WorkflowError::EmptySelection`] with nothing selected
    pub fn submit(
        &mut self,
        seats: &mut SeatMap,
        me: &SessionId,
        reservation_id: Uuid,
    ) -> Result<SubmitOutcome, WorkflowError> {
        self.ensure_not_busy()?;
        let flight_id = match (&self.phase, &self.flight) {
            (Phase::Selecting, Some(flight)) => flight.id.clone(),
            _ => return Err(WorkflowError::NoFlightSelected),
        };
        if self.selection.is_empty() {
            return Err(WorkflowError::EmptySelection);
        }

        let mut held = Vec::new();
        let mut rejected = Vec::new();
        for index in self.selection.take() {
            match seats.try_hold(index, me) {
                Ok(()) => held.push(index),
                Err(error) => rejected.push((index, error)),
            }
        }

        if held.is_empty() {
            self.phase = Phase::Selecting;
            return Ok(SubmitOutcome {
                reservation_id: None,
                flight_id,
                held,
                rejected,
            });
        }

        self.phase = Phase::Submitting;
        self.pending = Some(PendingReservation {
            id: reservation_id,
            flight_id: flight_id.clone(),
            indices: held.clone(),
        });

        Ok(SubmitOutcome {
            reservation_id: Some(reservation_id),
            flight_id,
            held,
            rejected,
        })
    }

    /// `Submitting → AwaitingConfirmation` once holds were broadcast.
    ///
    /// Returns `false` if `reservation_id` is not the pending reservation.
    pub fn holds_sent(&mut self, reservation_id: Uuid) -> bool {
        match &self.pending {
            Some(pending) if pending.id == reservation_id && self.phase == Phase::Submitting => {
                self.phase = Phase::AwaitingConfirmation;
                true
            },
            _ => false,
        }
    }

    /// `AwaitingConfirmation → Idle`: hand back the reservation to settle.
    ///
    /// Returns `None` if `reservation_id` is not the one awaiting
    /// confirmation.
    pub fn settle(&mut self, reservation_id: Uuid) -> Option<PendingReservation> {
        let matches = self.phase == Phase::AwaitingConfirmation
            && self.pending.as_ref().is_some_and(|p| p.id == reservation_id);
        if !matches {
            return None;
        }

        self.phase = Phase::Idle;
        self.flight = None;
        self.selection.clear();
        self.pending.take()
    }
}
