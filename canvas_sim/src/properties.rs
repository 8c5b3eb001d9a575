//! Property tests over random membership, election and tick inputs.

use canvas_core::{assume_role, elect, MembershipTracker, Role, SharedState, SimulationAuthority};
use canvas_env::NodeId;
use proptest::prelude::*;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(3500);

fn ids() -> impl Strategy<Value = Vec<NodeId>> {
    prop::collection::vec(0u32..64, 1..12).prop_map(|raw| raw.into_iter().map(NodeId).collect())
}

fn state() -> impl Strategy<Value = (SharedState, Vec<NodeId>)> {
    (ids(), 0i32..500, 0i32..16, -3i32..=3, -3i32..=3).prop_map(|(live, x, y, vx, vy)| {
        let state = SharedState {
            position: [x, y],
            velocity: [vx, vy],
            total_size: [16, 8 * live.len() as u32],
            order: live.clone(),
        };
        (state, live)
    })
}

proptest! {
    /// A member heard within the timeout survives any prune.
    #[test]
    fn prop_recent_members_survive(
        beats in prop::collection::vec((0u32..16, 0u64..20_000), 1..40),
        lag in 0u64..=3500,
    ) {
        let mut tracker = MembershipTracker::new();
        for (id, at) in &beats {
            tracker.record_heartbeat(NodeId(*id), Duration::from_millis(*at));
        }
        let latest = beats.iter().map(|(_, at)| *at).max().unwrap_or(0);
        let now = Duration::from_millis(latest + lag);

        let evicted = tracker.prune(now, TIMEOUT);

        for (id, _) in &beats {
            let seen = tracker.last_seen(NodeId(*id));
            match seen {
                Some(at) => prop_assert!(now - at <= TIMEOUT),
                None => prop_assert!(evicted.contains(&NodeId(*id))),
            }
        }
        let live = tracker.live_ids();
        prop_assert!(live.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(!live.is_empty());
    }

    /// Every node computing over the same set reaches the same leader.
    #[test]
    fn prop_election_is_order_independent(mut live in ids(), rotate in 0usize..12) {
        let expected = live.iter().copied().min();
        prop_assert_eq!(elect(&live), expected);

        let len = live.len();
        live.rotate_left(rotate % len);
        live.reverse();
        prop_assert_eq!(elect(&live), expected);

        for id in &live {
            let role = assume_role(*id, &live);
            prop_assert_eq!(role.leader(), expected);
            prop_assert_eq!(role.is_leader(), Some(*id) == expected);
        }
    }

    /// Ticking is a pure function and keeps the object on the canvas.
    #[test]
    fn prop_tick_is_reproducible((current, live) in state()) {
        let authority = SimulationAuthority::new(8, 16, [1, 1]);
        let Some(leader) = elect(&live) else {
            return Ok(());
        };

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let Role::Leader(grant) = assume_role(leader, &live) else {
                panic!("min id must lead");
            };
            outputs.push(authority.tick(grant, Some(&current)));
        }
        prop_assert_eq!(&outputs[0], &outputs[1]);

        let next = &outputs[0];
        let mut sorted = live.clone();
        sorted.sort_unstable();
        sorted.dedup();
        prop_assert_eq!(&next.order, &sorted);
        prop_assert!(next.x() >= 0 && (next.x() as u32) < next.width());
        prop_assert!(next.y() >= 0 && (next.y() as u32) < next.height());
    }
}
