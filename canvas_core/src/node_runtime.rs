//! Node Runtime - one node's single-threaded event loop.
//!
//! # Pass structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        run_pass()                           │
//! │  1. drain inbound  ──► MembershipTracker / cached state     │
//! │  2. heartbeat      ──► publish { id } (every interval)      │
//! │  3. prune          ──► evict silent members                 │
//! │  4. elect          ──► Role (Leader carries SimulationGrant)│
//! │  5. leader only    ──► tick + publish retained state        │
//! │  6. every node     ──► project + render                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Inbound handlers only record what arrived; they never simulate or
//! publish, so "receive" and "decide to lead" stay separated in time.
//!
//! The node owns its membership table and cached state outright. Several
//! nodes can run in one process (each with its own transport handle), which
//! is how the simulation harness tests churn.

use crate::config::{ConfigError, NodeConfig};
use crate::leader::{assume_role, Role, RoleKind};
use crate::membership::MembershipTracker;
use crate::renderer::{RenderError, Renderer};
use crate::replication::{decode_heartbeat, encode_heartbeat, PayloadError, PublishError, StateReplicator};
use crate::simulation::SimulationAuthority;
use crate::state::SharedState;
use crate::viewport::{project, Viewport};

use canvas_env::{CanvasContext, InboundMessage, NodeId, PubSubTransport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Upper bound on messages drained in one pass.
const MAX_DRAIN_PER_PASS: usize = 1024;

/// Faults a pass can propagate. The supervisor treats all of them as transient.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl NodeError {
    /// True when the transport connection itself is gone.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, NodeError::Transport(e) if e.is_connection_loss())
    }
}

impl From<PublishError> for NodeError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Payload(e) => NodeError::Payload(e),
            PublishError::Transport(e) => NodeError::Transport(e),
        }
    }
}

/// What one pass observed and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub role: RoleKind,
    pub leader: Option<NodeId>,
    pub live_ids: Vec<NodeId>,
    pub evicted: Vec<NodeId>,
    pub heartbeat_sent: bool,
    pub published: bool,
    pub viewport: Option<Viewport>,
}

/// Running counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub passes: u64,
    pub heartbeats_sent: u64,
    pub states_published: u64,
    pub states_received: u64,
    pub payloads_rejected: u64,
    pub evictions: u64,
}

/// A canvas node: membership, election, simulation, replication, rendering.
///
/// Generic over the clock, the bus and the renderer so the same loop runs in
/// production (tokio + zenoh) or under the simulation harness.
pub struct CanvasNode<Ctx, T, R>
where
    Ctx: CanvasContext,
    T: PubSubTransport,
    R: Renderer,
{
    config: NodeConfig,
    context: Arc<Ctx>,
    transport: T,
    renderer: R,

    membership: MembershipTracker,
    replicator: StateReplicator,
    authority: SimulationAuthority,
    heartbeat_topic: String,

    /// Local cached copy of the canonical state
    cached: Option<SharedState>,

    last_heartbeat: Option<Duration>,
    last_tick: Option<Duration>,
    last_leader: Option<NodeId>,
    stats: NodeStats,
}

impl<Ctx, T, R> CanvasNode<Ctx, T, R>
where
    Ctx: CanvasContext,
    T: PubSubTransport,
    R: Renderer,
{
    /// Creates a node. The transport is not connected until [`start`](Self::start).
    pub fn new(config: NodeConfig, context: Arc<Ctx>, transport: T, renderer: R) -> Result<Self, ConfigError> {
        config.validate()?;

        let replicator = StateReplicator::new(config.shared_state_topic());
        let authority = SimulationAuthority::new(
            config.slice_width,
            config.slice_height,
            config.initial_velocity,
        );
        let heartbeat_topic = config.heartbeat_topic();

        Ok(Self {
            config,
            context,
            transport,
            renderer,
            membership: MembershipTracker::new(),
            replicator,
            authority,
            heartbeat_topic,
            cached: None,
            last_heartbeat: None,
            last_tick: None,
            last_leader: None,
            stats: NodeStats::default(),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn cached_state(&self) -> Option<&SharedState> {
        self.cached.as_ref()
    }

    /// Seeds the cached state, e.g. with what survived a restart.
    pub fn restore_state(&mut self, state: Option<SharedState>) {
        self.cached = state;
    }

    pub fn membership(&self) -> &MembershipTracker {
        &self.membership
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    /// Leader seen by the most recent pass.
    pub fn current_leader(&self) -> Option<NodeId> {
        self.last_leader
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Connects and subscribes to both protocol topics.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        self.transport.connect().await?;
        self.transport.subscribe(&self.heartbeat_topic).await?;
        self.transport.subscribe(self.replicator.topic()).await?;

        info!(
            node = %self.config.node_id,
            heartbeat = %self.heartbeat_topic,
            state = %self.replicator.topic(),
            "node connected and subscribed"
        );
        Ok(())
    }

    /// Runs one loop pass.
    pub async fn run_pass(&mut self) -> Result<PassReport, NodeError> {
        let now = self.context.now();
        let self_id = self.config.node_id;
        self.stats.passes += 1;

        // 1. Drain inbound messages
        for _ in 0..MAX_DRAIN_PER_PASS {
            match self.transport.try_recv().await? {
                Some(message) => self.handle_message(message, now),
                None => break,
            }
        }

        // 2. Heartbeat (self is recorded directly, whatever the bus echoes)
        let heartbeat_sent = is_due(self.last_heartbeat, self.config.heartbeat_interval(), now);
        if heartbeat_sent {
            self.membership.record_heartbeat(self_id, now);
            let payload = encode_heartbeat(self_id)?;
            self.transport.publish(&self.heartbeat_topic, payload, false).await?;
            self.last_heartbeat = Some(now);
            self.stats.heartbeats_sent += 1;
        }

        // 3. Prune
        let evicted = self.membership.prune(now, self.config.membership_timeout());
        for id in &evicted {
            warn!(node = %self_id, peer = %id, "peer timed out, removing from membership");
        }
        self.stats.evictions += evicted.len() as u64;

        // 4. Elect
        let live_ids = self.membership.live_ids();
        let role = assume_role(self_id, &live_ids);
        let role_kind = role.kind();
        let leader = role.leader();
        if leader != self.last_leader {
            match leader {
                Some(id) if id == self_id => info!(node = %self_id, live = ?live_ids, "assumed leadership"),
                Some(id) => info!(node = %self_id, leader = %id, live = ?live_ids, "following new leader"),
                None => warn!(node = %self_id, "membership empty, no leader"),
            }
            self.last_leader = leader;
        }

        // 5. Simulate (leader only)
        let mut published = false;
        if let Role::Leader(grant) = role {
            if is_due(self.last_tick, self.config.tick_interval(), now) {
                let next = self.authority.tick(grant, self.cached.as_ref());
                self.replicator.publish(&mut self.transport, &next).await?;
                if self.cached.is_none() {
                    info!(node = %self_id, order = ?next.order, "created shared state");
                }
                // Adopted only once the bus has accepted it.
                self.cached = Some(next);
                self.last_tick = Some(now);
                self.stats.states_published += 1;
                published = true;
            }
        }

        // 6. Render (every node, every pass)
        let (viewport, local_y) = visible_frame(role_kind, self.cached.as_ref(), self_id, self.config.slice_width);
        self.renderer.render(
            viewport.map(|view| view.local_x),
            local_y,
            role_kind == RoleKind::Leader,
        )?;

        Ok(PassReport {
            role: role_kind,
            leader,
            live_ids,
            evicted,
            heartbeat_sent,
            published,
            viewport,
        })
    }

    /// Runs passes until `shutdown` flips to `true` or a pass fails.
    pub async fn run(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), NodeError> {
        let poll = self.config.poll_interval();
        loop {
            if *shutdown.borrow() {
                info!(node = %self.config.node_id, "shutdown requested");
                return Ok(());
            }
            self.run_pass().await?;
            self.context.sleep(poll).await;
        }
    }

    /// Disconnects from the bus.
    pub async fn shutdown(&mut self) {
        self.transport.disconnect().await;
    }

    /// Dismantles the node, handing back what outlives a connection.
    pub fn into_parts(self) -> (T, R, Option<SharedState>) {
        (self.transport, self.renderer, self.cached)
    }

    fn handle_message(&mut self, message: InboundMessage, now: Duration) {
        if message.topic == self.heartbeat_topic {
            match decode_heartbeat(&message.payload) {
                Ok(heartbeat) => self.membership.record_heartbeat(heartbeat.id, now),
                Err(e) => {
                    self.stats.payloads_rejected += 1;
                    debug!(node = %self.config.node_id, error = %e, "discarding heartbeat");
                }
            }
        } else if message.topic == self.replicator.topic() {
            match self.replicator.on_receive(&message.payload) {
                Ok(state) => {
                    self.stats.states_received += 1;
                    self.cached = Some(state);
                }
                Err(e) => {
                    self.stats.payloads_rejected += 1;
                    warn!(node = %self.config.node_id, error = %e, "discarding shared state");
                }
            }
        } else {
            debug!(node = %self.config.node_id, topic = %message.topic, "ignoring message on unknown topic");
        }
    }
}

/// What a pass draws: the projected object, or nothing while idle.
fn visible_frame(
    role: RoleKind,
    cached: Option<&SharedState>,
    self_id: NodeId,
    slice_width: u32,
) -> (Option<Viewport>, i32) {
    let Some(state) = cached.filter(|_| role != RoleKind::Idle) else {
        return (None, 0);
    };
    match project(state, self_id, slice_width) {
        Some(view) => (Some(view), view.local_y),
        None => (None, state.y()),
    }
}

fn is_due(last: Option<Duration>, interval: Duration, now: Duration) -> bool {
    last.map_or(true, |at| now.saturating_sub(at) >= interval)
}
