//! State Replicator - wire codec and dissemination of the shared state.
//!
//! The leader publishes every tick on a **retained** topic so a node that
//! (re)subscribes after a gap gets the last state at once. Inbound payloads
//! come from peers; anything malformed is reported as a [`PayloadError`]
//! and dropped, never propagated as a crash.

use crate::state::SharedState;
use canvas_env::{NodeId, PubSubTransport, TransportError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A peer-supplied payload that failed to decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("Malformed {kind} payload: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("Failed to encode {kind} payload: {reason}")]
    Encode { kind: &'static str, reason: String },
}

/// Error from [`StateReplicator::publish`].
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Heartbeat wire record: `{ "id": <NodeId> }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub id: NodeId,
}

pub fn encode_heartbeat(id: NodeId) -> Result<Vec<u8>, PayloadError> {
    serde_json::to_vec(&Heartbeat { id }).map_err(|e| PayloadError::Encode {
        kind: "heartbeat",
        reason: e.to_string(),
    })
}

pub fn decode_heartbeat(payload: &[u8]) -> Result<Heartbeat, PayloadError> {
    serde_json::from_slice(payload).map_err(|e| PayloadError::Malformed {
        kind: "heartbeat",
        reason: e.to_string(),
    })
}

/// Publishes and decodes the canonical shared state on one topic.
#[derive(Debug, Clone)]
pub struct StateReplicator {
    topic: String,
}

impl StateReplicator {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn encode(&self, state: &SharedState) -> Result<Vec<u8>, PayloadError> {
        serde_json::to_vec(state).map_err(|e| PayloadError::Encode {
            kind: "shared-state",
            reason: e.to_string(),
        })
    }

    /// Serializes `state` and publishes it with retain semantics.
    pub async fn publish<T: PubSubTransport>(
        &self,
        transport: &mut T,
        state: &SharedState,
    ) -> Result<(), PublishError> {
        let payload = self.encode(state)?;
        transport.publish(&self.topic, payload, true).await?;
        Ok(())
    }

    /// Decodes a received payload. The caller keeps its previous state on error.
    pub fn on_receive(&self, payload: &[u8]) -> Result<SharedState, PayloadError> {
        serde_json::from_slice(payload).map_err(|e| PayloadError::Malformed {
            kind: "shared-state",
            reason: e.to_string(),
        })
    }
}
