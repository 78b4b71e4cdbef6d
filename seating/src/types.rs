//! Identifier and flight types shared across the seating crate.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// SessionId
// ============================================================================

/// Stable identity of one client instance.
///
/// Used both as the sender identity on outgoing envelopes and as the
/// holder recorded on Held and Sold seats. Comparing it against an
/// envelope's sender is how a replica tells its own echo from a peer's
/// update.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

const SESSION_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SESSION_SUFFIX_LEN: usize = 9;

impl SessionId {
    /// Wrap an existing identifier (restored from storage, or fixed in tests).
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier of the form `user_xxxxxxxxx`.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SESSION_SUFFIX_LEN)
            .map(|_| char::from(SESSION_ALPHABET[rng.gen_range(0..SESSION_ALPHABET.len())]))
            .collect();
        Self(format!("user_{suffix}"))
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ============================================================================
// FlightId
// ============================================================================

/// Identifier of a flight instance, e.g. `mad-nyc`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlightId(String);

impl FlightId {
    /// Creates a new `FlightId`
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlightId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlightId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ============================================================================
// Flight
// ============================================================================

/// Cabin class of a flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cabin {
    /// Economy cabin
    Economy,
    /// Business cabin
    Business,
    /// First class cabin
    First,
}

impl Cabin {
    /// Seats drawn per row when rendering the cabin.
    #[must_use]
    pub const fn seats_per_row(self) -> usize {
        match self {
            Self::First => 4,
            Self::Economy | Self::Business => 6,
        }
    }
}

/// A bookable flight with a fixed number of seats.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flight {
    /// Flight identifier
    pub id: FlightId,
    /// Departure airport
    pub origin: String,
    /// Arrival airport
    pub destination: String,
    /// Local departure time, `HH:MM`
    pub departure: String,
    /// Price per seat in whole currency units
    pub price: u32,
    /// Number of seats
    pub seats: usize,
    /// Cabin class
    pub cabin: Cabin,
}

impl Flight {
    /// `origin → destination` for notices and rendering.
    #[must_use]
    pub fn route(&self) -> String {
        format!("{} → {}", self.origin, self.destination)
    }
}

/// Human label of seat `index`: row number then column letter (`0` → `1A`).
#[must_use]
pub fn seat_label(index: usize) -> String {
    const COLUMNS: [char; 6] = ['A', 'B', 'C', 'D', 'E', 'F'];
    format!("{}{}", index / 6 + 1, COLUMNS[index % 6])
}

/// Comma-separated labels for a set of seats, or `none`.
#[must_use]
pub fn seat_labels(indices: &[usize]) -> String {
    if indices.is_empty() {
        return "none".to_string();
    }
    indices
        .iter()
        .map(|&i| seat_label(i))
        .collect::<Vec<_>>()
        .join(", ")
}
