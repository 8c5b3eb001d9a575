//! Leader Selector - deterministic election over the live membership set.
//!
//! Every node evaluates the same pure function over (nearly) the same live
//! set, so nodes converge on one leader without a voting round trip. The
//! price is a short window with zero or two leaders while a membership change
//! propagates; that window is tolerated, not prevented.
//!
//! Leadership is also a capability: the only way to advance the shared state
//! is to hold the [`SimulationGrant`] that [`assume_role`] hands to the
//! elected node for the current cycle.

use canvas_env::NodeId;

/// Returns the leader for a live set: its minimum id.
///
/// `None` for an empty set ("no leader, no simulation").
pub fn elect(live_ids: &[NodeId]) -> Option<NodeId> {
    live_ids.iter().min().copied()
}

/// Right to run one simulation tick.
///
/// Cannot be constructed outside this crate and is not `Clone`; it is
/// consumed by [`SimulationAuthority::tick`](crate::SimulationAuthority::tick).
#[derive(Debug)]
pub struct SimulationGrant {
    pub(crate) holder: NodeId,
    pub(crate) live_ids: Vec<NodeId>,
}

impl SimulationGrant {
    /// The node allowed to tick (always the elected leader).
    pub fn holder(&self) -> NodeId {
        self.holder
    }

    /// Sorted live ids at election time; becomes the tick's `order`.
    pub fn live_ids(&self) -> &[NodeId] {
        &self.live_ids
    }
}

/// Outcome of this cycle's election, from one node's point of view.
#[derive(Debug)]
pub enum Role {
    /// Membership is empty: no election, no simulation
    Idle,

    /// Another node leads
    Follower { leader: NodeId },

    /// This node leads and holds the tick capability
    Leader(SimulationGrant),
}

/// Copyable summary of a [`Role`], for reporting and rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Idle,
    Follower,
    Leader,
}

impl Role {
    pub fn kind(&self) -> RoleKind {
        match self {
            Role::Idle => RoleKind::Idle,
            Role::Follower { .. } => RoleKind::Follower,
            Role::Leader(_) => RoleKind::Leader,
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader(_))
    }

    /// The elected leader, if any.
    pub fn leader(&self) -> Option<NodeId> {
        match self {
            Role::Idle => None,
            Role::Follower { leader } => Some(*leader),
            Role::Leader(grant) => Some(grant.holder),
        }
    }
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoleKind::Idle => "Idle",
            RoleKind::Follower => "Follower",
            RoleKind::Leader => "Leader",
        };
        write!(f, "{}", name)
    }
}

/// Runs the election for `self_id` over `live_ids`.
///
/// The live ids are sorted and de-duplicated before use, so the grant's
/// order is canonical whatever the caller passed.
pub fn assume_role(self_id: NodeId, live_ids: &[NodeId]) -> Role {
    let mut live = live_ids.to_vec();
    live.sort_unstable();
    live.dedup();

    match elect(&live) {
        None => Role::Idle,
        Some(leader) if leader == self_id => Role::Leader(SimulationGrant {
            holder: self_id,
            live_ids: live,
        }),
        Some(leader) => Role::Follower { leader },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u32]) -> Vec<NodeId> {
        raw.iter().map(|&r| NodeId(r)).collect()
    }

    #[test]
    fn test_elect_minimum() {
        assert_eq!(elect(&ids(&[0, 1, 2])), Some(NodeId(0)));
        assert_eq!(elect(&ids(&[1, 2])), Some(NodeId(1)));
        assert_eq!(elect(&[]), None);
    }

    #[test]
    fn test_leader_removal_promotes_next_minimum() {
        let mut live = ids(&[0, 1, 2]);
        assert_eq!(elect(&live), Some(NodeId(0)));

        live.retain(|id| *id != NodeId(0));
        assert_eq!(elect(&live), Some(NodeId(1)));
        assert_eq!(live, ids(&[1, 2]));
    }

    #[test]
    fn test_assume_role() {
        let live = ids(&[2, 0, 1]);

        let role = assume_role(NodeId(0), &live);
        assert!(role.is_leader());
        match role {
            Role::Leader(grant) => {
                assert_eq!(grant.holder(), NodeId(0));
                assert_eq!(grant.live_ids(), &ids(&[0, 1, 2])[..]);
            }
            other => panic!("expected leader, got {:?}", other),
        }

        let role = assume_role(NodeId(2), &live);
        assert_eq!(role.kind(), RoleKind::Follower);
        assert_eq!(role.leader(), Some(NodeId(0)));

        let role = assume_role(NodeId(2), &[]);
        assert_eq!(role.kind(), RoleKind::Idle);
        assert_eq!(role.leader(), None);
    }

    #[test]
    fn test_node_absent_from_live_set_is_never_leader() {
        // Before its own heartbeat lands, a node only sees its peers.
        let role = assume_role(NodeId(0), &ids(&[3, 4]));
        assert_eq!(role.leader(), Some(NodeId(3)));
        assert!(!role.is_leader());
    }
}
