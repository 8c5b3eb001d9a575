//! Error types for the canvas environment abstraction.

use thiserror::Error;

/// Errors surfaced by a [`PubSubTransport`](crate::PubSubTransport).
///
/// Every variant is treated as transient by the node supervisor: it logs,
/// backs off, and reruns the whole connection sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Initial connection (or reconnection) to the bus failed
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// An established connection dropped
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Publishing a message failed
    #[error("Publish to '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// Subscribing to a topic failed
    #[error("Subscribe to '{topic}' failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// Operation attempted before `connect()` succeeded
    #[error("Transport not connected")]
    NotConnected,
}

impl TransportError {
    /// Creates a connect error.
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::ConnectFailed(msg.into())
    }

    /// Creates a connection-lost error.
    pub fn lost(msg: impl Into<String>) -> Self {
        Self::ConnectionLost(msg.into())
    }

    /// Creates a publish error.
    pub fn publish(topic: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::PublishFailed {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a subscribe error.
    pub fn subscribe(topic: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::SubscribeFailed {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the underlying connection is gone (as opposed to a single
    /// failed operation on a live connection).
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::ConnectionLost(_) | Self::NotConnected)
    }
}
