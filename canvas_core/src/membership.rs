//! Membership Tracker - the set of currently live nodes.
//!
//! Liveness is inferred from heartbeats only. There is no "leave" message: a
//! node drops out of the table once it has been silent for longer than the
//! membership timeout, and absence from the table means "not live".

use canvas_env::NodeId;
use std::collections::BTreeMap;
use std::time::Duration;

/// Mapping from node id to the time its last heartbeat was observed.
///
/// Owned by exactly one event loop; mutated only by heartbeat arrival and
/// by [`prune`](Self::prune).
#[derive(Debug, Clone, Default)]
pub struct MembershipTracker {
    last_seen: BTreeMap<NodeId, Duration>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or refreshes the entry for `id`.
    ///
    /// A heartbeat stamped earlier than the one already recorded never moves
    /// the entry backwards.
    pub fn record_heartbeat(&mut self, id: NodeId, now: Duration) {
        self.last_seen
            .entry(id)
            .and_modify(|seen| *seen = (*seen).max(now))
            .or_insert(now);
    }

    /// Removes every entry silent for longer than `timeout` and returns the
    /// removed ids in ascending order.
    pub fn prune(&mut self, now: Duration, timeout: Duration) -> Vec<NodeId> {
        let stale: Vec<NodeId> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.saturating_sub(**seen) > timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            self.last_seen.remove(id);
        }
        stale
    }

    /// Sorted ids of the members currently in the table.
    pub fn live_ids(&self) -> Vec<NodeId> {
        self.last_seen.keys().copied().collect()
    }

    /// Prunes, then returns the sorted live ids.
    pub fn live_ids_at(&mut self, now: Duration, timeout: Duration) -> Vec<NodeId> {
        self.prune(now, timeout);
        self.live_ids()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.last_seen.contains_key(&id)
    }

    /// Time of the last heartbeat recorded for `id`.
    pub fn last_seen(&self, id: NodeId) -> Option<Duration> {
        self.last_seen.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_all_members_expire_without_heartbeats() {
        let mut tracker = MembershipTracker::new();
        for id in 0..3 {
            tracker.record_heartbeat(NodeId(id), secs(0.0));
        }

        let removed = tracker.prune(secs(4.0), secs(3.5));

        assert_eq!(removed, vec![NodeId(0), NodeId(1), NodeId(2)]);
        assert!(tracker.live_ids().is_empty());
    }

    #[test]
    fn test_recent_heartbeat_keeps_member() {
        let mut tracker = MembershipTracker::new();
        tracker.record_heartbeat(NodeId(1), secs(0.0));
        tracker.record_heartbeat(NodeId(2), secs(0.0));
        tracker.record_heartbeat(NodeId(2), secs(3.0));

        let live = tracker.live_ids_at(secs(4.0), secs(3.5));

        assert_eq!(live, vec![NodeId(2)]);
    }

    #[test]
    fn test_entry_at_exact_timeout_is_kept() {
        let mut tracker = MembershipTracker::new();
        tracker.record_heartbeat(NodeId(5), secs(1.0));

        assert!(tracker.prune(secs(4.5), secs(3.5)).is_empty());
        assert!(tracker.contains(NodeId(5)));
    }

    #[test]
    fn test_live_ids_are_sorted() {
        let mut tracker = MembershipTracker::new();
        for id in [7, 3, 9, 0] {
            tracker.record_heartbeat(NodeId(id), secs(1.0));
        }
        assert_eq!(
            tracker.live_ids(),
            vec![NodeId(0), NodeId(3), NodeId(7), NodeId(9)]
        );
    }

    #[test]
    fn test_stale_heartbeat_does_not_rewind() {
        let mut tracker = MembershipTracker::new();
        tracker.record_heartbeat(NodeId(1), secs(5.0));
        tracker.record_heartbeat(NodeId(1), secs(2.0));
        assert_eq!(tracker.last_seen(NodeId(1)), Some(secs(5.0)));
    }
}
