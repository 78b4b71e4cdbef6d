//! The flights a replica carries seat maps for.

use crate::types::{Cabin, Flight, FlightId};

/// The demo route catalog.
///
/// Every replica must be built from the same catalog: seat indices only
/// line up across replicas when seat counts agree.
#[must_use]
pub fn default_catalog() -> Vec<Flight> {
    vec![
        flight("mad-nyc", "Madrid (MAD)", "New York (JFK)", "08:30", 450, 30, Cabin::Economy),
        flight("mad-lon", "Madrid (MAD)", "London (LHR)", "10:15", 180, 30, Cabin::Economy),
        flight("bcn-par", "Barcelona (BCN)", "Paris (CDG)", "12:00", 120, 30, Cabin::Economy),
        flight("mad-tok", "Madrid (MAD)", "Tokyo (NRT)", "14:45", 890, 24, Cabin::Business),
    ]
}

/// Look a flight up by id.
#[must_use]
pub fn find<'a>(catalog: &'a [Flight], id: &FlightId) -> Option<&'a Flight> {
    catalog.iter().find(|f| &f.id == id)
}

fn flight(
    id: &str,
    origin: &str,
    destination: &str,
    departure: &str,
    price: u32,
    seats: usize,
    cabin: Cabin,
) -> Flight {
    Flight {
        id: FlightId::new(id),
        origin: origin.to_string(),
        destination: destination.to_string(),
        departure: departure.to_string(),
        price,
        seats,
        cabin,
    }
}
