//! Common types for the canvas environment abstraction.

use serde::{Deserialize, Serialize};

/// Identifier of a canvas node.
///
/// Configured per node at startup and stable for the node's lifetime.
/// The total order matters: the live node with the smallest id leads, and
/// ids sorted ascending define the left-to-right tiling of the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl From<u32> for NodeId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message drained from a subscribed topic.
///
/// The payload is opaque bytes; decoding belongs to the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message arrived on
    pub topic: String,

    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Creates a new inbound message.
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}
