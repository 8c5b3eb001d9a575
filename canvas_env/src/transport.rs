//! Publish/subscribe transport abstraction for canvas nodes.

use async_trait::async_trait;
use crate::error::TransportError;
use crate::types::{InboundMessage, NodeId};

/// Abstraction over a topic-based publish/subscribe bus.
///
/// # Implementations
///
/// - **Production**: zenoh session (see the `canvas-node` binary)
/// - **Simulation**: in-memory broker with latency/loss/partitions
///
/// # Delivery model
///
/// ```text
/// Node A                      Bus                        Node B
///   |                          |                           |
///   |-- publish(t, p, retain)->|                           |
///   |                          |-- [latency / loss] ------>| queue
///   |                          |                           |-- try_recv() -> (t, p)
///   |                          |                           |
///   |                          |<-- subscribe(t) ----------| (late joiner)
///   |                          |-- retained (t, p) ------->| immediately
/// ```
///
/// Delivery is at-least-once and unordered across topics. A subscriber that
/// is also a publisher on the same topic receives its own messages.
#[async_trait]
pub trait PubSubTransport: Send + 'static {
    /// Establishes the connection to the bus.
    ///
    /// # Returns
    /// * `Ok(())` - Ready for `subscribe` / `publish`
    /// * `Err(TransportError::ConnectFailed)` - Bus unreachable; caller retries later
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Publishes a payload on a topic.
    ///
    /// # Arguments
    /// * `topic` - Destination topic
    /// * `payload` - Opaque payload bytes
    /// * `retain` - Keep as the topic's last message for future subscribers
    ///
    /// # Note
    /// Success means the bus accepted the message, not that anyone received it.
    async fn publish(&mut self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), TransportError>;

    /// Subscribes to a topic.
    ///
    /// If the topic has a retained message, it is delivered to this
    /// subscriber without waiting for the next publish.
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Returns the next pending inbound message without blocking.
    ///
    /// # Returns
    /// * `Ok(Some(msg))` - A message was waiting
    /// * `Ok(None)` - Nothing pending right now
    /// * `Err(TransportError::ConnectionLost)` - The connection dropped
    async fn try_recv(&mut self) -> Result<Option<InboundMessage>, TransportError>;

    /// Tears the connection down. Idempotent.
    async fn disconnect(&mut self);
}

/// Fault injection over a simulated bus.
///
/// Lets scenarios reproduce churn: partitions, lossy links and dropped
/// connections.
pub trait FaultController: Send + Sync {
    /// Creates a network partition between two node sets.
    fn partition(&self, group_a: &[NodeId], group_b: &[NodeId]);

    /// Heals all partitions.
    fn heal_all(&self);

    /// Sets the delivery latency applied to every message.
    fn set_latency(&self, latency_ms: u64);

    /// Sets the message loss probability (0.0 - 1.0).
    fn set_loss(&self, loss_rate: f64);

    /// Drops a node's connection; its next transport call fails.
    fn disconnect(&self, node: NodeId);
}
