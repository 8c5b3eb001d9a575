//! Simulation Authority - the only place the shared object moves.
//!
//! Physics, generalized from a two-axis bounce:
//! - Horizontal axis wraps around the canvas (`x' = (x + vx) mod width`)
//! - Vertical axis reflects: a step that would leave `[0, height - 1]` clamps
//!   to the boundary and negates `vy`
//!
//! The canvas is re-tiled every tick: width is `slice_width * live count` and
//! `order` becomes the live set the leader saw, so membership changes show up
//! on the very next leader tick.

use crate::leader::SimulationGrant;
use crate::state::SharedState;
use canvas_env::NodeId;

/// Advances the shared state. Reachable only through a [`SimulationGrant`].
#[derive(Debug, Clone)]
pub struct SimulationAuthority {
    slice_width: u32,
    height: u32,
    initial_velocity: [i32; 2],
}

impl SimulationAuthority {
    pub fn new(slice_width: u32, height: u32, initial_velocity: [i32; 2]) -> Self {
        Self {
            slice_width,
            height,
            initial_velocity,
        }
    }

    pub fn slice_width(&self) -> u32 {
        self.slice_width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Runs one tick for the grant holder.
    ///
    /// `current` is the state this node last produced or received. With none
    /// cached (first election ever) a fresh object is created at the origin
    /// and advanced from there.
    pub fn tick(&self, grant: SimulationGrant, current: Option<&SharedState>) -> SharedState {
        match current {
            Some(state) => step(state, &grant.live_ids, self.slice_width, self.height),
            None => {
                let fresh = SharedState::initial(
                    self.initial_velocity,
                    self.slice_width,
                    self.height,
                    grant.live_ids.clone(),
                );
                step(&fresh, &grant.live_ids, self.slice_width, self.height)
            }
        }
    }
}

/// Pure physics step. Deterministic in `(state, live_ids)`.
pub(crate) fn step(state: &SharedState, live_ids: &[NodeId], slice_width: u32, height: u32) -> SharedState {
    let width = i64::from(slice_width) * live_ids.len() as i64;
    let max_y = i64::from(height) - 1;

    let [x, y] = state.position.map(i64::from);
    let [vx, mut vy] = state.velocity.map(i64::from);

    let next_x = if width > 0 { (x + vx).rem_euclid(width) } else { 0 };

    let mut next_y = y + vy;
    if next_y < 0 {
        next_y = 0;
        vy = -vy;
    } else if next_y > max_y {
        next_y = max_y.max(0);
        vy = -vy;
    }

    SharedState {
        position: [saturate(next_x), saturate(next_y)],
        velocity: [saturate(vx), saturate(vy)],
        total_size: [height, u32::try_from(width).unwrap_or(u32::MAX)],
        order: live_ids.to_vec(),
    }
}

fn saturate(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::{assume_role, Role};

    fn ids(raw: &[u32]) -> Vec<NodeId> {
        raw.iter().map(|&r| NodeId(r)).collect()
    }

    fn state(position: [i32; 2], velocity: [i32; 2], order: &[u32]) -> SharedState {
        SharedState {
            position,
            velocity,
            total_size: [16, 8 * order.len() as u32],
            order: ids(order),
        }
    }

    fn grant_for(self_id: u32, live: &[u32]) -> SimulationGrant {
        match assume_role(NodeId(self_id), &ids(live)) {
            Role::Leader(grant) => grant,
            other => panic!("node {} is not leader: {:?}", self_id, other),
        }
    }

    #[test]
    fn test_horizontal_wrap() {
        let next = step(&state([15, 5], [1, 1], &[0, 1]), &ids(&[0, 1]), 8, 16);
        assert_eq!(next.position, [0, 6]);
        assert_eq!(next.velocity, [1, 1]);
    }

    #[test]
    fn test_negative_velocity_wraps_left() {
        let next = step(&state([0, 5], [-1, 0], &[0, 1]), &ids(&[0, 1]), 8, 16);
        assert_eq!(next.position[0], 15);
    }

    #[test]
    fn test_vertical_bounce() {
        let live = ids(&[0]);
        let first = step(&state([0, 15], [0, 1], &[0]), &live, 8, 16);
        assert_eq!(first.position[1], 15);
        assert_eq!(first.velocity[1], -1);

        let second = step(&first, &live, 8, 16);
        assert_eq!(second.position[1], 14);
        assert_eq!(second.velocity[1], -1);
    }

    #[test]
    fn test_top_bounce() {
        let next = step(&state([0, 0], [0, -1], &[0]), &ids(&[0]), 8, 16);
        assert_eq!(next.position[1], 0);
        assert_eq!(next.velocity[1], 1);
    }

    #[test]
    fn test_retiles_to_live_set() {
        // Node 2 timed out; the canvas shrinks and x wraps into the smaller width.
        let prev = state([20, 3], [1, 0], &[0, 1, 2]);
        let next = step(&prev, &ids(&[0, 1]), 8, 16);

        assert_eq!(next.order, ids(&[0, 1]));
        assert_eq!(next.total_size, [16, 16]);
        assert_eq!(next.position[0], 5);
    }

    #[test]
    fn test_tick_is_reproducible() {
        let authority = SimulationAuthority::new(8, 16, [1, 1]);
        let start = state([3, 7], [2, 3], &[0, 1, 2]);

        let a1 = authority.tick(grant_for(0, &[0, 1, 2]), Some(&start));
        let a2 = authority.tick(grant_for(0, &[0, 1, 2]), Some(&a1));
        let b1 = authority.tick(grant_for(0, &[0, 1, 2]), Some(&start));
        let b2 = authority.tick(grant_for(0, &[0, 1, 2]), Some(&b1));

        assert_eq!(a2, b2);
        assert_eq!(a2.position, [7, 13]);
    }

    #[test]
    fn test_first_tick_creates_state() {
        let authority = SimulationAuthority::new(8, 16, [1, 1]);
        let created = authority.tick(grant_for(1, &[1, 3]), None);

        assert_eq!(created.position, [1, 1]);
        assert_eq!(created.velocity, [1, 1]);
        assert_eq!(created.total_size, [16, 16]);
        assert_eq!(created.order, ids(&[1, 3]));
    }
}
