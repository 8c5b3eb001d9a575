//! Viewport Projector - global canvas coordinates to one node's slice.

use crate::state::SharedState;
use canvas_env::NodeId;
use std::ops::RangeInclusive;

/// Where the shared object sits inside this node's slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub local_x: i32,
    pub local_y: i32,
}

/// Global columns owned by the node at `slot` in `order`.
pub fn column_range(slot: usize, slice_width: u32) -> RangeInclusive<i64> {
    let start = slot as i64 * i64::from(slice_width);
    start..=start + i64::from(slice_width) - 1
}

/// Projects the shared object onto `self_id`'s slice.
///
/// `None` ("nothing visible") when `self_id` is not yet in `order` or the
/// object's column belongs to another node. Pure; callers re-evaluate every
/// render pass.
pub fn project(state: &SharedState, self_id: NodeId, slice_width: u32) -> Option<Viewport> {
    let slot = state.slot_of(self_id)?;
    let columns = column_range(slot, slice_width);
    let x = i64::from(state.x());

    if !columns.contains(&x) {
        return None;
    }

    Some(Viewport {
        local_x: (x - columns.start()) as i32,
        local_y: state.y(),
    })
}
