//! SimWorld - N canvas nodes sharing one simulated broker and clock.
//!
//! The world drives every node's `run_pass` itself, in ascending id order,
//! then advances the virtual clock by one step. Nodes never sleep, so the
//! shared clock moves exactly once per step no matter how many nodes run.
//! A node whose pass fails is parked for its restart backoff and then
//! rebuilt around a fresh transport, keeping its cached state and renderer.

use crate::context::SimContext;
use crate::network::{SimBroker, SimTransport};

use canvas_core::{
    project, CanvasNode, ConfigError, NodeConfig, NodeError, RenderError, Renderer, SharedState, Viewport,
};
use canvas_env::{CanvasContext, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of nodes spawned by [`SimWorld::spawn_nodes`]
    pub num_nodes: usize,

    /// Virtual time between two passes of the same node
    pub step_ms: u64,

    /// Template every node's configuration is derived from
    pub node: NodeConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_nodes: 3,
            step_ms: 10,
            node: NodeConfig::default(),
        }
    }
}

/// One drawn frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub local_x: Option<i32>,
    pub local_y: i32,
    pub is_leader: bool,
}

/// Renderer that remembers the last frame instead of drawing it.
#[derive(Debug, Default)]
pub struct FrameLog {
    last: Option<Frame>,
}

impl FrameLog {
    pub fn last(&self) -> Option<Frame> {
        self.last
    }
}

impl Renderer for FrameLog {
    fn render(&mut self, local_x: Option<i32>, local_y: i32, is_leader: bool) -> Result<(), RenderError> {
        self.last = Some(Frame {
            local_x,
            local_y,
            is_leader,
        });
        Ok(())
    }
}

pub type SimNode = CanvasNode<SimContext, SimTransport, FrameLog>;

enum Slot {
    Running(SimNode),
    Restarting {
        renderer: FrameLog,
        state: Option<SharedState>,
        resume_at: Duration,
    },
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    context: Arc<SimContext>,

    broker: SimBroker,
    nodes: BTreeMap<NodeId, Slot>,
    restarts: BTreeMap<NodeId, u32>,
    step_count: u64,
}

impl SimWorld {
    /// Creates an empty world.
    pub fn new(config: SimConfig) -> Self {
        // Derive separate seeds for different subsystems
        let context = SimContext::shared(config.seed);
        let broker_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let broker = SimBroker::new(context.clone(), broker_seed);

        Self {
            config,
            context,
            broker,
            nodes: BTreeMap::new(),
            restarts: BTreeMap::new(),
            step_count: 0,
        }
    }

    /// Adds nodes `0..num_nodes` and returns their ids.
    pub async fn spawn_nodes(&mut self) -> Result<Vec<NodeId>, ConfigError> {
        let ids: Vec<NodeId> = (0..self.config.num_nodes as u32).map(NodeId).collect();
        for id in &ids {
            self.add_node(*id).await?;
        }
        Ok(ids)
    }

    /// Starts a node with the template configuration.
    ///
    /// A node that cannot connect is parked and retried after its backoff.
    pub async fn add_node(&mut self, id: NodeId) -> Result<(), ConfigError> {
        let config = self.node_config(id);
        config.validate()?;
        let slot = self.launch(config, FrameLog::default(), None).await?;
        self.nodes.insert(id, slot);
        Ok(())
    }

    /// Crashes a node: it leaves the bus and falls silent.
    ///
    /// Returns what it had cached.
    pub async fn remove_node(&mut self, id: NodeId) -> Option<SharedState> {
        match self.nodes.remove(&id)? {
            Slot::Running(mut node) => {
                node.shutdown().await;
                node.into_parts().2
            }
            Slot::Restarting { state, .. } => state,
        }
    }

    /// Runs one pass of every node, then advances the clock by one step.
    pub async fn step(&mut self) -> Result<(), ConfigError> {
        let now = self.context.now();
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();

        for id in ids {
            let Some(slot) = self.nodes.remove(&id) else {
                continue;
            };
            let slot = match slot {
                Slot::Running(mut node) => match node.run_pass().await {
                    Ok(_) => Slot::Running(node),
                    Err(err) => self.park(node, err).await,
                },
                Slot::Restarting {
                    renderer,
                    state,
                    resume_at,
                } if now >= resume_at => {
                    *self.restarts.entry(id).or_default() += 1;
                    self.launch(self.node_config(id), renderer, state).await?
                }
                parked => parked,
            };
            self.nodes.insert(id, slot);
        }

        self.context.advance_time(self.step_duration());
        self.step_count += 1;
        Ok(())
    }

    /// Steps until `duration` of virtual time has passed.
    pub async fn run_for(&mut self, duration: Duration) -> Result<(), ConfigError> {
        let until = self.context.now() + duration;
        while self.context.now() < until {
            self.step().await?;
        }
        Ok(())
    }

    /// Leader each running node followed in its latest pass.
    pub fn leaders(&self) -> BTreeMap<NodeId, Option<NodeId>> {
        self.running()
            .map(|node| (node.node_id(), node.current_leader()))
            .collect()
    }

    /// Running nodes that currently consider themselves leader.
    pub fn self_elected(&self) -> BTreeSet<NodeId> {
        self.running()
            .filter(|node| node.current_leader() == Some(node.node_id()))
            .map(|node| node.node_id())
            .collect()
    }

    /// The leader every running node agrees on, if they all agree.
    pub fn agreed_leader(&self) -> Option<NodeId> {
        let leaders: BTreeSet<Option<NodeId>> = self.leaders().into_values().collect();
        match leaders.into_iter().collect::<Vec<_>>().as_slice() {
            [Some(leader)] => Some(*leader),
            _ => None,
        }
    }

    /// What each running node would draw from its cached state.
    pub fn viewports(&self) -> BTreeMap<NodeId, Option<Viewport>> {
        self.running()
            .map(|node| {
                let view = node
                    .cached_state()
                    .and_then(|state| project(state, node.node_id(), node.config().slice_width));
                (node.node_id(), view)
            })
            .collect()
    }

    /// Number of running nodes that see the object.
    pub fn visible_count(&self) -> usize {
        self.viewports().values().filter(|view| view.is_some()).count()
    }

    pub fn cached_state(&self, id: NodeId) -> Option<&SharedState> {
        match self.nodes.get(&id)? {
            Slot::Running(node) => node.cached_state(),
            Slot::Restarting { state, .. } => state.as_ref(),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&SimNode> {
        match self.nodes.get(&id)? {
            Slot::Running(node) => Some(node),
            Slot::Restarting { .. } => None,
        }
    }

    pub fn is_running(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Sessions rebuilt for `id` so far.
    pub fn restarts(&self, id: NodeId) -> u32 {
        self.restarts.get(&id).copied().unwrap_or(0)
    }

    pub fn total_restarts(&self) -> u32 {
        self.restarts.values().sum()
    }

    pub fn broker(&self) -> &SimBroker {
        &self.broker
    }

    pub fn context(&self) -> &Arc<SimContext> {
        &self.context
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.context.now()
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    fn running(&self) -> impl Iterator<Item = &SimNode> {
        self.nodes.values().filter_map(|slot| match slot {
            Slot::Running(node) => Some(node),
            Slot::Restarting { .. } => None,
        })
    }

    fn step_duration(&self) -> Duration {
        Duration::from_millis(self.config.step_ms)
    }

    fn node_config(&self, id: NodeId) -> NodeConfig {
        NodeConfig {
            node_id: id,
            ..self.config.node.clone()
        }
    }

    async fn launch(
        &self,
        config: NodeConfig,
        renderer: FrameLog,
        state: Option<SharedState>,
    ) -> Result<Slot, ConfigError> {
        let id = config.node_id;
        let mut node = CanvasNode::new(config, self.context.clone(), self.broker.transport(id), renderer)?;
        node.restore_state(state);

        match node.start().await {
            Ok(()) => Ok(Slot::Running(node)),
            Err(err) => Ok(self.park(node, err).await),
        }
    }

    async fn park(&self, mut node: SimNode, err: NodeError) -> Slot {
        let backoff = node.config().restart_backoff();
        warn!(
            node = %node.node_id(),
            error = %err,
            backoff_ms = backoff.as_millis() as u64,
            "simulated node failed, parking until backoff expires"
        );
        node.shutdown().await;
        let (_, renderer, state) = node.into_parts();
        debug!(preserved = state.is_some(), "cached state carried across restart");

        Slot::Restarting {
            renderer,
            state,
            resume_at: self.context.now() + backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_env::FaultController;

    fn world(nodes: usize) -> SimWorld {
        SimWorld::new(SimConfig {
            num_nodes: nodes,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_three_nodes_converge() {
        let mut world = world(3);
        let ids = world.spawn_nodes().await.unwrap();
        assert_eq!(ids.len(), 3);

        world.run_for(Duration::from_secs(2)).await.unwrap();

        assert_eq!(world.agreed_leader(), Some(NodeId(0)));
        assert_eq!(world.self_elected(), BTreeSet::from([NodeId(0)]));
        for id in &ids {
            assert_eq!(world.cached_state(*id).unwrap().order, ids);
        }
        assert_eq!(world.visible_count(), 1);
    }

    #[tokio::test]
    async fn test_step_advances_clock_once() {
        let mut world = world(4);
        world.spawn_nodes().await.unwrap();

        world.step().await.unwrap();
        world.step().await.unwrap();

        assert_eq!(world.now(), Duration::from_millis(20));
        assert_eq!(world.step_count(), 2);
    }

    #[tokio::test]
    async fn test_crashed_leader_is_replaced() {
        let mut world = world(3);
        world.spawn_nodes().await.unwrap();
        world.run_for(Duration::from_secs(2)).await.unwrap();

        assert!(world.remove_node(NodeId(0)).await.is_some());
        world.run_for(Duration::from_secs(5)).await.unwrap();

        assert_eq!(world.agreed_leader(), Some(NodeId(1)));
        assert_eq!(
            world.cached_state(NodeId(2)).unwrap().order,
            vec![NodeId(1), NodeId(2)]
        );
    }

    #[tokio::test]
    async fn test_dropped_connection_restarts_after_backoff() {
        let mut world = world(2);
        world.spawn_nodes().await.unwrap();
        world.run_for(Duration::from_secs(1)).await.unwrap();

        world.broker().disconnect(NodeId(1));
        world.step().await.unwrap();
        assert!(!world.is_running(NodeId(1)));
        assert!(world.cached_state(NodeId(1)).is_some());

        world.run_for(Duration::from_secs(6)).await.unwrap();
        assert!(world.is_running(NodeId(1)));
        assert_eq!(world.restarts(NodeId(1)), 1);
    }

    #[tokio::test]
    async fn test_frames_reach_renderer() {
        let mut world = world(1);
        world.spawn_nodes().await.unwrap();
        world.step().await.unwrap();

        let frame = world.node(NodeId(0)).unwrap().renderer().last().unwrap();
        assert!(frame.is_leader);
        assert_eq!(frame.local_x, Some(1));
    }
}
