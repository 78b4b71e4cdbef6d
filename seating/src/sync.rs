//! Join-time synchronization between replicas.
//!
//! A joining replica broadcasts one `sync_request` to everyone. Every other
//! replica answers with one `sync_response` per flight, addressed to
//! `Others` so nobody answers itself. Every response is merged; there is
//! no quorum and no authoritative peer, so zero responses (first replica
//! online) and many responses (busy system) both work.

use crate::envelope::{Envelope, Payload};
use crate::seat_map::{MergeReport, Seat, SeatMap};
use crate::types::{FlightId, SessionId};
use seatsync_core::message_bus::Scope;
use std::collections::BTreeMap;

/// Result of merging one sync response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncOutcome {
    /// What the merge changed
    pub report: MergeReport,
    /// Whether this was the first response merged
    pub first: bool,
}

/// Tracks sync responses for one replica.
#[derive(Clone, Debug, Default)]
pub struct SyncCoordinator {
    responses_merged: u64,
}

impl SyncCoordinator {
    /// A coordinator that has merged nothing yet
    #[must_use]
    pub const fn new() -> Self {
        Self { responses_merged: 0 }
    }

    /// Number of sync responses merged so far
    #[must_use]
    pub const fn responses_merged(&self) -> u64 {
        self.responses_merged
    }

    /// Whether at least one peer answered
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        self.responses_merged > 0
    }

    /// The request broadcast on connect.
    #[must_use]
    pub fn request(me: SessionId) -> Envelope {
        Envelope::new(me, Scope::All, Payload::SyncRequest)
    }

    /// Answer `request` with one snapshot per flight.
    ///
    /// Returns nothing for the replica's own request echo.
    #[must_use]
    pub fn respond(
        me: &SessionId,
        request: &Envelope,
        seat_maps: &BTreeMap<FlightId, SeatMap>,
    ) -> Vec<Envelope> {
        if request.is_from(me) {
            return Vec::new();
        }

        seat_maps
            .iter()
            .map(|(flight_id, seats)| {
                Envelope::new(
                    me.clone(),
                    Scope::Others,
                    Payload::SyncResponse {
                        flight_id: flight_id.clone(),
                        snapshot: seats.snapshot(),
                    },
                )
            })
            .collect()
    }

    /// Merge a peer's snapshot of `flight_id`.
    ///
    /// Returns `None` for flights this replica does not carry.
    pub fn apply_response(
        &mut self,
        seat_maps: &mut BTreeMap<FlightId, SeatMap>,
        flight_id: &FlightId,
        snapshot: &[Seat],
    ) -> Option<SyncOutcome> {
        let seats = seat_maps.get_mut(flight_id)?;
        let report = seats.merge(snapshot);

        self.responses_merged += 1;
        Some(SyncOutcome {
            report,
            first: self.responses_merged == 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maps() -> BTreeMap<FlightId, SeatMap> {
        let mut maps = BTreeMap::new();
        maps.insert(FlightId::from("mad-nyc"), SeatMap::new(30));
        maps.insert(FlightId::from("mad-tok"), SeatMap::new(24));
        maps
    }

    #[test]
    fn test_request_goes_to_all() {
        let request = SyncCoordinator::request(SessionId::from("user_a"));
        assert_eq!(request.scope, Scope::All);
        assert_eq!(request.payload, Payload::SyncRequest);
    }

    #[test]
    fn test_own_request_is_not_answered() {
        let me = SessionId::from("user_a");
        let request = SyncCoordinator::request(me.clone());
        assert!(SyncCoordinator::respond(&me, &request, &maps()).is_empty());
    }

    #[test]
    fn test_peer_request_gets_one_response_per_flight() {
        let me = SessionId::from("user_a");
        let request = SyncCoordinator::request(SessionId::from("user_b"));

        let responses = SyncCoordinator::respond(&me, &request, &maps());

        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| r.scope == Scope::Others && r.is_from(&me)));
    }

    #[test]
    fn test_apply_response_counts_and_flags_first() {
        let mut coordinator = SyncCoordinator::new();
        let mut local = maps();

        let mut remote = SeatMap::new(30);
        let _ = remote.try_hold(3, &SessionId::from("user_b"));
        let nyc = FlightId::from("mad-nyc");

        let first = coordinator.apply_response(&mut local, &nyc, &remote.snapshot());
        assert!(matches!(first, Some(ref o) if o.first && o.report.adopted == vec![3]));

        let second = coordinator.apply_response(&mut local, &nyc, &remote.snapshot());
        assert!(matches!(second, Some(ref o) if !o.first && !o.report.changed()));
        assert_eq!(coordinator.responses_merged(), 2);
    }

    #[test]
    fn test_unknown_flight_is_ignored() {
        let mut coordinator = SyncCoordinator::new();
        let mut local = maps();
        let outcome = coordinator.apply_response(&mut local, &FlightId::from("mad-sfo"), &[]);
        assert!(outcome.is_none());
        assert!(!coordinator.is_synced());
    }
}
