//! Properties of `SeatMap::merge` over arbitrary peer histories.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use proptest::prelude::*;
use seating::{SeatMap, SeatState, SessionId};

const SEATS: usize = 12;

/// One step of a peer's history: `holder` holds `index`, then maybe sells it.
#[derive(Clone, Debug)]
struct Op {
    index: usize,
    holder: u8,
    sell: bool,
}

fn op(indices: impl Strategy<Value = usize>) -> impl Strategy<Value = Op> {
    (indices, 0u8..3, any::<bool>()).prop_map(|(index, holder, sell)| Op { index, holder, sell })
}

fn session(holder: u8) -> SessionId {
    SessionId::new(format!("user_peer{holder:05}"))
}

/// Replay `ops` on a fresh map. Failed transitions are ignored, exactly as
/// a replica ignores a losing hold.
fn replay(ops: &[Op]) -> SeatMap {
    let mut map = SeatMap::new(SEATS);
    for op in ops {
        let by = session(op.holder);
        if map.try_hold(op.index, &by).is_ok() && op.sell {
            let _ = map.confirm_sold(&[op.index], &by);
        }
    }
    map
}

fn history() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op(0..SEATS), 0..20)
}

fn history_on(parity: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op((0..SEATS / 2).prop_map(move |i| i * 2 + parity)), 0..10)
}

proptest! {
    #[test]
    fn merge_is_idempotent(local in history(), remote in history()) {
        let remote = replay(&remote).snapshot();
        let mut map = replay(&local);

        map.merge(&remote);
        let once = map.clone();
        let report = map.merge(&remote);

        prop_assert_eq!(map, once);
        prop_assert!(!report.changed());
    }

    #[test]
    fn merge_never_moves_a_seat_backwards(local in history(), remote in history()) {
        let remote = replay(&remote).snapshot();
        let mut map = replay(&local);
        let before = map.clone();

        map.merge(&remote);

        for (old, new) in before.seats().iter().zip(map.seats()) {
            prop_assert!(new.state >= old.state);
            prop_assert!(new.is_consistent());
            if old.state == SeatState::Sold {
                prop_assert_eq!(old, new);
            }
        }
    }

    #[test]
    fn merge_commutes_for_disjoint_histories(even in history_on(0), odd in history_on(1)) {
        let even = replay(&even).snapshot();
        let odd = replay(&odd).snapshot();

        let mut forward = SeatMap::new(SEATS);
        forward.merge(&even);
        forward.merge(&odd);

        let mut backward = SeatMap::new(SEATS);
        backward.merge(&odd);
        backward.merge(&even);

        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn merge_keeps_local_holder_of_held_seats(local in history(), remote in history()) {
        let remote_map = replay(&remote);
        let mut map = replay(&local);
        let before = map.clone();

        map.merge(&remote_map.snapshot());

        for (old, new) in before.seats().iter().zip(map.seats()) {
            if old.state == SeatState::Held && new.state == SeatState::Held {
                prop_assert_eq!(&old.holder, &new.holder);
            }
        }
    }
}
