//! Simulated publish/subscribe bus with retain and fault injection.

use crate::context::SimContext;

use async_trait::async_trait;
use canvas_env::{CanvasContext, FaultController, InboundMessage, NodeId, PubSubTransport, TransportError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Connection state of one client as the broker sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connection {
    /// Never connected, or disconnected cleanly
    Idle,
    Connected,
    /// Dropped by fault injection; every call fails until reconnect
    Dropped,
}

#[derive(Debug)]
struct Pending {
    deliver_at: Duration,
    message: InboundMessage,
}

#[derive(Debug)]
struct ClientState {
    connection: Connection,
    /// Whether the broker is reachable for this client at all
    online: bool,
    subscriptions: HashSet<String>,
    inbox: VecDeque<Pending>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            connection: Connection::Idle,
            online: true,
            subscriptions: HashSet::new(),
            inbox: VecDeque::new(),
        }
    }

    fn check(&self) -> Result<(), TransportError> {
        match self.connection {
            Connection::Connected => Ok(()),
            Connection::Idle => Err(TransportError::NotConnected),
            Connection::Dropped => Err(TransportError::lost("connection dropped by broker")),
        }
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped_loss: u64,
    pub dropped_partition: u64,
}

struct BrokerInner {
    clients: HashMap<NodeId, ClientState>,

    /// Last retained payload per topic, with its publisher
    retained: HashMap<String, (Option<NodeId>, Vec<u8>)>,

    /// Active partitions (nodes that cannot communicate)
    partitions: Vec<(Vec<NodeId>, Vec<NodeId>)>,

    latency: Duration,
    loss_rate: f64,
    rng: ChaCha8Rng,
    stats: BrokerStats,
}

impl BrokerInner {
    fn can_communicate(&self, from: NodeId, to: NodeId) -> bool {
        for (group_a, group_b) in &self.partitions {
            let from_in_a = group_a.contains(&from);
            let from_in_b = group_b.contains(&from);
            let to_in_a = group_a.contains(&to);
            let to_in_b = group_b.contains(&to);

            // Partitioned if one is in A and other in B (or vice versa)
            if (from_in_a && to_in_b) || (from_in_b && to_in_a) {
                return false;
            }
        }
        true
    }

    fn route(&mut self, from: Option<NodeId>, topic: &str, payload: &[u8], now: Duration) {
        self.stats.published += 1;

        let mut targets: Vec<NodeId> = self
            .clients
            .iter()
            .filter(|(_, c)| c.connection == Connection::Connected && c.subscriptions.contains(topic))
            .map(|(id, _)| *id)
            .collect();
        // Stable order keeps the loss RNG draws reproducible.
        targets.sort_unstable();

        for target in targets {
            let is_self = from == Some(target);

            if let Some(sender) = from {
                if !self.can_communicate(sender, target) {
                    self.stats.dropped_partition += 1;
                    continue;
                }
            }

            // Local loopback is never lost or delayed.
            let deliver_at = if is_self {
                now
            } else {
                if self.loss_rate > 0.0 && self.rng.gen::<f64>() < self.loss_rate {
                    self.stats.dropped_loss += 1;
                    continue;
                }
                now + self.latency
            };

            if let Some(client) = self.clients.get_mut(&target) {
                client.inbox.push_back(Pending {
                    deliver_at,
                    message: InboundMessage::new(topic, payload.to_vec()),
                });
                self.stats.delivered += 1;
            }
        }
    }
}

/// In-memory broker shared by every node of a simulated world.
///
/// Clone handles share the same broker.
#[derive(Clone)]
pub struct SimBroker {
    inner: Arc<Mutex<BrokerInner>>,
    context: Arc<SimContext>,
}

impl SimBroker {
    /// Creates a broker whose loss decisions are drawn from `seed`.
    pub fn new(context: Arc<SimContext>, seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BrokerInner {
                clients: HashMap::new(),
                retained: HashMap::new(),
                partitions: Vec::new(),
                latency: Duration::ZERO,
                loss_rate: 0.0,
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: BrokerStats::default(),
            })),
            context,
        }
    }

    /// Returns a fresh, unconnected transport for `node`.
    ///
    /// Any previous session of that node is discarded.
    pub fn transport(&self, node: NodeId) -> SimTransport {
        let mut inner = self.lock();
        let online = inner.clients.get(&node).map_or(true, |c| c.online);
        let mut client = ClientState::new();
        client.online = online;
        inner.clients.insert(node, client);

        SimTransport {
            node,
            broker: self.clone(),
        }
    }

    /// Makes the broker reachable (or not) for `node`; affects `connect()` only.
    pub fn set_online(&self, node: NodeId, online: bool) {
        let mut inner = self.lock();
        inner
            .clients
            .entry(node)
            .or_insert_with(ClientState::new)
            .online = online;
    }

    /// Publishes from outside any node (e.g. a misbehaving device).
    pub fn inject(&self, topic: &str, payload: Vec<u8>, retain: bool) {
        let now = self.context.now();
        let mut inner = self.lock();
        if retain {
            inner.retained.insert(topic.to_string(), (None, payload.clone()));
        }
        inner.route(None, topic, &payload, now);
    }

    /// Current retained payload of `topic`.
    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.lock().retained.get(topic).map(|(_, payload)| payload.clone())
    }

    pub fn stats(&self) -> BrokerStats {
        self.lock().stats
    }

    /// Checks if two nodes can communicate (not partitioned).
    pub fn can_communicate(&self, from: NodeId, to: NodeId) -> bool {
        self.lock().can_communicate(from, to)
    }

    fn lock(&self) -> MutexGuard<'_, BrokerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FaultController for SimBroker {
    fn partition(&self, group_a: &[NodeId], group_b: &[NodeId]) {
        self.lock()
            .partitions
            .push((group_a.to_vec(), group_b.to_vec()));
    }

    fn heal_all(&self) {
        self.lock().partitions.clear();
    }

    fn set_latency(&self, latency_ms: u64) {
        self.lock().latency = Duration::from_millis(latency_ms);
    }

    fn set_loss(&self, loss_rate: f64) {
        self.lock().loss_rate = loss_rate.clamp(0.0, 1.0);
    }

    fn disconnect(&self, node: NodeId) {
        let mut inner = self.lock();
        if let Some(client) = inner.clients.get_mut(&node) {
            client.connection = Connection::Dropped;
            client.subscriptions.clear();
            client.inbox.clear();
        }
    }
}

/// One node's handle onto the [`SimBroker`].
pub struct SimTransport {
    node: NodeId,
    broker: SimBroker,
}

impl SimTransport {
    pub fn node(&self) -> NodeId {
        self.node
    }
}

#[async_trait]
impl PubSubTransport for SimTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut inner = self.broker.lock();
        let client = inner.clients.entry(self.node).or_insert_with(ClientState::new);
        if !client.online {
            return Err(TransportError::connect("broker unreachable"));
        }
        client.connection = Connection::Connected;
        client.subscriptions.clear();
        client.inbox.clear();
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), TransportError> {
        let now = self.broker.context.now();
        let mut inner = self.broker.lock();
        inner
            .clients
            .get(&self.node)
            .ok_or(TransportError::NotConnected)?
            .check()?;

        if retain {
            inner
                .retained
                .insert(topic.to_string(), (Some(self.node), payload.clone()));
        }
        inner.route(Some(self.node), topic, &payload, now);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let now = self.broker.context.now();
        let mut inner = self.broker.lock();

        let retained = inner.retained.get(topic).and_then(|(origin, payload)| {
            let reachable = origin.map_or(true, |o| inner.can_communicate(o, self.node));
            reachable.then(|| payload.clone())
        });

        let client = inner
            .clients
            .get_mut(&self.node)
            .ok_or(TransportError::NotConnected)?;
        client.check()?;
        client.subscriptions.insert(topic.to_string());

        // Retained message goes straight to the new subscriber
        if let Some(payload) = retained {
            client.inbox.push_back(Pending {
                deliver_at: now,
                message: InboundMessage::new(topic, payload),
            });
        }
        Ok(())
    }

    async fn try_recv(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        let now = self.broker.context.now();
        let mut inner = self.broker.lock();
        let client = inner
            .clients
            .get_mut(&self.node)
            .ok_or(TransportError::NotConnected)?;
        client.check()?;

        let ready = client.inbox.iter().position(|p| p.deliver_at <= now);
        Ok(ready
            .and_then(|index| client.inbox.remove(index))
            .map(|pending| pending.message))
    }

    async fn disconnect(&mut self) {
        let mut inner = self.broker.lock();
        if let Some(client) = inner.clients.get_mut(&self.node) {
            if client.connection == Connection::Connected {
                client.connection = Connection::Idle;
            }
            client.subscriptions.clear();
            client.inbox.clear();
        }
    }
}
