//! Canonical shared state - the one simulated object every node renders.

use canvas_env::NodeId;
use serde::{Deserialize, Serialize};

/// The single source of truth for the shared object.
///
/// Wire shape on the `shared-state` topic:
///
/// ```text
/// { "position": [x, y], "velocity": [vx, vy], "totalSize": [h, w], "order": [id, ...] }
/// ```
///
/// `order` is sorted and equals the live membership the producing leader saw
/// when it ticked. Index `i` in `order` owns canvas columns
/// `[i * slice_width, (i + 1) * slice_width - 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedState {
    /// Global canvas coordinate `[x, y]`
    #[serde(alias = "pos")]
    pub position: [i32; 2],

    /// Units per simulation tick `[vx, vy]`
    #[serde(alias = "vel")]
    pub velocity: [i32; 2],

    /// Canvas extent `[height, width]`
    #[serde(alias = "total_size")]
    pub total_size: [u32; 2],

    /// Left-to-right slice owners
    pub order: Vec<NodeId>,
}

impl SharedState {
    /// A fresh object at the canvas origin, tiled over `order`.
    pub fn initial(velocity: [i32; 2], slice_width: u32, slice_height: u32, order: Vec<NodeId>) -> Self {
        let width = slice_width.saturating_mul(order.len() as u32);
        Self {
            position: [0, 0],
            velocity,
            total_size: [slice_height, width],
            order,
        }
    }

    pub fn x(&self) -> i32 {
        self.position[0]
    }

    pub fn y(&self) -> i32 {
        self.position[1]
    }

    pub fn height(&self) -> u32 {
        self.total_size[0]
    }

    pub fn width(&self) -> u32 {
        self.total_size[1]
    }

    /// Position of `id` in the tiling, if it has been admitted.
    pub fn slot_of(&self, id: NodeId) -> Option<usize> {
        self.order.iter().position(|member| *member == id)
    }
}
