//! Per-flight seat map and the seat lifecycle `Available → Held → Sold`.
//!
//! The map is the only place seat state changes. Transitions only move
//! forward, which is what lets replicas converge without coordination:
//!
//! - [`SeatMap::try_hold`]: first valid hold wins, later attempts fail
//! - [`SeatMap::confirm_sold`]: each Held seat becomes Sold independently
//! - [`SeatMap::merge`]: adopt whatever a peer knows that is further along

use crate::types::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Seat
// ============================================================================

/// Lifecycle state of a seat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatState {
    /// Free to hold
    Available,
    /// Held by a session, awaiting settlement
    Held,
    /// Sold (terminal)
    Sold,
}

impl SeatState {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Held => "held",
            Self::Sold => "sold",
        }
    }
}

impl fmt::Display for SeatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One seat. `holder` is set exactly when the seat is Held or Sold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    /// Position in the map; the seat's identity on the wire
    pub index: usize,
    /// Current state
    pub state: SeatState,
    /// Session that holds or bought the seat
    pub holder: Option<SessionId>,
}

impl Seat {
    /// An available seat at `index`
    #[must_use]
    pub const fn available(index: usize) -> Self {
        Self {
            index,
            state: SeatState::Available,
            holder: None,
        }
    }

    /// Whether `holder` agrees with `state`
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        match self.state {
            SeatState::Available => self.holder.is_none(),
            SeatState::Held | SeatState::Sold => self.holder.is_some(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Rejected seat transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeatError {
    /// The seat is already Held or Sold
    #[error("Seat {index} is unavailable ({state})")]
    SeatUnavailable {
        /// Seat index
        index: usize,
        /// State that blocked the hold
        state: SeatState,
    },

    /// Only Held seats can be sold
    #[error("Seat {index} cannot be sold while {state}")]
    InvalidTransition {
        /// Seat index
        index: usize,
        /// State that blocked the sale
        state: SeatState,
    },

    /// Index beyond the end of the map
    #[error("Seat {index} is out of range (map has {len} seats)")]
    OutOfRange {
        /// Seat index
        index: usize,
        /// Number of seats in the map
        len: usize,
    },
}

// ============================================================================
// SeatMap
// ============================================================================

/// What a [`SeatMap::merge`] changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Local Available seats that took the remote state
    pub adopted: Vec<usize>,
    /// Local Held seats promoted to Sold
    pub promoted: Vec<usize>,
    /// Remote entries ignored (out of range or inconsistent)
    pub skipped: usize,
}

impl MergeReport {
    /// Whether the merge changed anything
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.adopted.is_empty() || !self.promoted.is_empty()
    }
}

/// Ordered seats of one flight instance, indexed `0..len`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeatMap {
    seats: Vec<Seat>,
}

impl SeatMap {
    /// A map of `len` Available seats
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            seats: (0..len).map(Seat::available).collect(),
        }
    }

    /// Number of seats
    #[must_use]
    pub fn len(&self) -> usize {
        self.seats.len()
    }

    /// Whether the map has no seats
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    /// All seats in index order
    #[must_use]
    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    /// The seat at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Seat> {
        self.seats.get(index)
    }

    /// State of the seat at `index`
    #[must_use]
    pub fn state(&self, index: usize) -> Option<SeatState> {
        self.get(index).map(|s| s.state)
    }

    /// Number of seats in `state`
    #[must_use]
    pub fn count(&self, state: SeatState) -> usize {
        self.seats.iter().filter(|s| s.state == state).count()
    }

    /// Number of Available seats
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.count(SeatState::Available)
    }

    /// Read-only copy of every seat, as sent in a sync response
    #[must_use]
    pub fn snapshot(&self) -> Vec<Seat> {
        self.seats.clone()
    }

    /// Hold an Available seat for `by`.
    ///
    /// # Errors
    ///
    /// - [`SeatError::SeatUnavailable`] if the seat is Held or Sold. The
    ///   existing holder is kept.
    /// - [`SeatError::OutOfRange`] if `index` is not in the map.
    pub fn try_hold(&mut self, index: usize, by: &SessionId) -> Result<(), SeatError> {
        let len = self.seats.len();
        let seat = self
            .seats
            .get_mut(index)
            .ok_or(SeatError::OutOfRange { index, len })?;

        if seat.state != SeatState::Available {
            return Err(SeatError::SeatUnavailable {
                index,
                state: seat.state,
            });
        }

        seat.state = SeatState::Held;
        seat.holder = Some(by.clone());
        Ok(())
    }

    /// Sell every Held seat among `indices`.
    ///
    /// Each index succeeds or fails on its own; one failure does not stop
    /// the rest. Sold seats keep the holder that held them. The holder is
    /// not compared against `by`.
    pub fn confirm_sold(
        &mut self,
        indices: &[usize],
        by: &SessionId,
    ) -> Vec<Result<(), SeatError>> {
        let len = self.seats.len();
        indices
            .iter()
            .map(|&index| {
                let seat = self
                    .seats
                    .get_mut(index)
                    .ok_or(SeatError::OutOfRange { index, len })?;

                if seat.state != SeatState::Held {
                    return Err(SeatError::InvalidTransition {
                        index,
                        state: seat.state,
                    });
                }

                if seat.holder.as_ref() != Some(by) {
                    tracing::debug!(
                        index,
                        holder = ?seat.holder,
                        confirmed_by = %by,
                        "Selling seat held by another session"
                    );
                }

                seat.state = SeatState::Sold;
                Ok(())
            })
            .collect()
    }

    /// Fold a peer's snapshot into this map without ever moving a seat
    /// backwards.
    ///
    /// Per index:
    /// - local Available, remote Held or Sold: adopt remote state and holder
    /// - local Held, remote Sold: promote to Sold with the remote holder
    /// - anything else: keep local
    ///
    /// Entries whose index is out of range or whose holder disagrees with
    /// their state are skipped.
    pub fn merge(&mut self, remote: &[Seat]) -> MergeReport {
        let mut report = MergeReport::default();

        for entry in remote {
            let Some(local) = self.seats.get_mut(entry.index) else {
                report.skipped += 1;
                continue;
            };
            if !entry.is_consistent() {
                report.skipped += 1;
                continue;
            }

            match (local.state, entry.state) {
                (SeatState::Available, SeatState::Held | SeatState::Sold) => {
                    local.state = entry.state;
                    local.holder.clone_from(&entry.holder);
                    report.adopted.push(entry.index);
                },
                (SeatState::Held, SeatState::Sold) => {
                    local.state = SeatState::Sold;
                    local.holder.clone_from(&entry.holder);
                    report.promoted.push(entry.index);
                },
                _ => {},
            }
        }

        if report.skipped > 0 {
            tracing::warn!(
                skipped = report.skipped,
                remote_len = remote.len(),
                local_len = self.seats.len(),
                "Skipped malformed snapshot entries"
            );
        }

        report
    }
}
