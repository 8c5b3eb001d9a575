//! Scenario runner - executes chaos scenarios against a SimWorld.

use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use canvas_core::{assume_role, NodeConfig, Role, SharedState, SimulationAuthority};
use canvas_env::{FaultController, NodeId};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total world steps executed
    pub total_steps: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Messages accepted by the broker
    pub messages_published: u64,

    /// Messages queued for a subscriber
    pub messages_delivered: u64,

    /// Messages dropped by random loss
    pub dropped_loss: u64,

    /// Messages dropped due to partition
    pub dropped_partition: u64,

    /// States published by all running nodes
    pub states_published: u64,

    /// Inbound payloads discarded as malformed
    pub payloads_rejected: u64,

    /// Node sessions rebuilt after a failure
    pub restarts: u32,

    /// Most nodes that considered themselves leader at the same time
    pub max_concurrent_leaders: usize,

    /// Steps in which more than one node saw the object
    pub overlap_steps: u64,
}

type Check = Result<(), String>;

fn ensure(condition: bool, reason: impl FnOnce() -> String) -> Check {
    if condition {
        Ok(())
    } else {
        Err(reason())
    }
}

/// Runs chaos scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of nodes (at least two)
    num_nodes: usize,

    /// Length of the open-ended phases in seconds
    duration_secs: f64,

    /// Template for every node
    node: NodeConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_nodes: usize) -> Self {
        Self {
            seed,
            num_nodes: num_nodes.max(2),
            duration_secs: 10.0,
            node: NodeConfig::default(),
        }
    }

    /// Sets the duration of the open-ended phases.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = secs.max(0.0);
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!(
            "Starting scenario: {} (seed={}): {}",
            scenario.name(),
            self.seed,
            scenario.description()
        );

        let mut world = SimWorld::new(SimConfig {
            seed: self.seed,
            num_nodes: self.num_nodes,
            step_ms: self.node.poll_interval_ms,
            node: self.node.clone(),
        });
        let mut metrics = ScenarioMetrics::default();

        let outcome = match scenario {
            ScenarioId::SteadyState => self.run_steady_state(&mut world, &mut metrics).await,
            ScenarioId::LeaderFailover => self.run_leader_failover(&mut world, &mut metrics).await,
            ScenarioId::LateJoin => self.run_late_join(&mut world, &mut metrics).await,
            ScenarioId::SplitBrain => self.run_split_brain(&mut world, &mut metrics).await,
            ScenarioId::MalformedPayload => self.run_malformed_payload(&mut world, &mut metrics).await,
            ScenarioId::FlakyTransport => self.run_flaky_transport(&mut world, &mut metrics).await,
            ScenarioId::LossyBus => self.run_lossy_bus(&mut world, &mut metrics).await,
        };

        collect_metrics(&world, &mut metrics);

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: outcome.is_ok(),
            total_steps: world.step_count(),
            final_time_secs: world.now().as_secs_f64(),
            failure_reason: outcome.err(),
            metrics,
        }
    }

    fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs)
    }

    fn all_ids(&self) -> Vec<NodeId> {
        (0..self.num_nodes as u32).map(NodeId).collect()
    }

    /// CAN-001: SteadyState - a healthy bus.
    ///
    /// **Assertion**: all nodes follow node 0, share the same order, and the
    /// object is visible on exactly one slice in every step.
    async fn run_steady_state(&self, world: &mut SimWorld, metrics: &mut ScenarioMetrics) -> Check {
        info!("CAN-001: SteadyState");
        let ids = spawn(world).await?;

        advance(world, Duration::from_secs(2), metrics).await?;
        metrics.overlap_steps = 0;
        advance(world, self.duration(), metrics).await?;

        ensure(world.agreed_leader() == Some(NodeId(0)), || {
            format!("nodes disagree on leader: {:?}", world.leaders())
        })?;
        ensure_order(world, &ids)?;
        ensure(metrics.overlap_steps == 0, || {
            format!("object visible on several slices in {} steps", metrics.overlap_steps)
        })?;
        ensure(world.visible_count() == 1, || {
            format!("object visible on {} slices", world.visible_count())
        })?;

        let published = world
            .node(NodeId(0))
            .map_or(0, |node| node.stats().states_published);
        let expected = (self.duration_secs * 10.0 * 0.9) as u64;
        ensure(published >= expected, || {
            format!("leader published {} states, expected at least {}", published, expected)
        })
    }

    /// CAN-002: LeaderFailover - the leader crashes.
    ///
    /// **Assertion**: node 1 leads within the membership timeout and the
    /// order no longer contains node 0.
    async fn run_leader_failover(&self, world: &mut SimWorld, metrics: &mut ScenarioMetrics) -> Check {
        info!("CAN-002: LeaderFailover");
        let ids = spawn(world).await?;
        advance(world, Duration::from_secs(2), metrics).await?;

        world.remove_node(NodeId(0)).await;
        info!("  t={:.1}s crashed node 0", world.now().as_secs_f64());

        let timeout = world.config.node.membership_timeout() + world.config.node.heartbeat_interval();
        advance(world, timeout + Duration::from_millis(500), metrics).await?;

        ensure(world.agreed_leader() == Some(NodeId(1)), || {
            format!("expected node 1 to lead, got {:?}", world.leaders())
        })?;
        ensure_order(world, &ids[1..])?;
        ensure(world.visible_count() == 1, || {
            format!("object visible on {} slices after failover", world.visible_count())
        })
    }

    /// CAN-003: LateJoin - the lowest id arrives after the canvas is running.
    ///
    /// **Assertion**: the newcomer continues from the retained state rather
    /// than recreating the object, then everyone follows it.
    async fn run_late_join(&self, world: &mut SimWorld, metrics: &mut ScenarioMetrics) -> Check {
        info!("CAN-003: LateJoin");
        let ids = self.all_ids();
        for id in &ids[1..] {
            world.add_node(*id).await.map_err(|e| e.to_string())?;
        }
        advance(world, Duration::from_secs(3), metrics).await?;

        let topic = world.config.node.shared_state_topic();
        let retained: SharedState = world
            .broker()
            .retained(&topic)
            .ok_or_else(|| "no retained state before join".to_string())
            .and_then(|payload| serde_json::from_slice(&payload).map_err(|e| e.to_string()))?;

        world.add_node(NodeId(0)).await.map_err(|e| e.to_string())?;
        world.step().await.map_err(|e| e.to_string())?;

        let node = &world.config.node;
        let authority = SimulationAuthority::new(node.slice_width, node.slice_height, node.initial_velocity);
        let Role::Leader(grant) = assume_role(NodeId(0), &[NodeId(0)]) else {
            return Err("node 0 cannot lead alone".to_string());
        };
        let expected = authority.tick(grant, Some(&retained));
        let joined = world.cached_state(NodeId(0));
        ensure(joined == Some(&expected), || {
            format!("joiner did not continue from retained state: {:?}", joined)
        })?;

        advance(world, Duration::from_secs(3), metrics).await?;
        ensure(world.agreed_leader() == Some(NodeId(0)), || {
            format!("joiner did not take over: {:?}", world.leaders())
        })?;
        ensure_order(world, &ids)
    }

    /// CAN-004: SplitBrain - the bus is cut in two for 5s.
    ///
    /// **Assertion**: each side elects its own minimum while cut off, then
    /// everyone converges on node 0 after the heal.
    async fn run_split_brain(&self, world: &mut SimWorld, metrics: &mut ScenarioMetrics) -> Check {
        info!("CAN-004: SplitBrain");
        let ids = spawn(world).await?;
        advance(world, Duration::from_secs(2), metrics).await?;

        let (group_a, group_b) = ids.split_at((ids.len() + 1) / 2);
        world.broker().partition(group_a, group_b);
        info!("  partition {:?} | {:?}", group_a, group_b);
        advance(world, Duration::from_secs(5), metrics).await?;

        let expected = BTreeSet::from([group_a[0], group_b[0]]);
        ensure(world.self_elected() == expected, || {
            format!("expected leaders {:?} while split, got {:?}", expected, world.self_elected())
        })?;

        world.broker().heal_all();
        info!("  t={:.1}s partition healed", world.now().as_secs_f64());
        advance(world, Duration::from_secs(5), metrics).await?;

        ensure(world.self_elected() == BTreeSet::from([NodeId(0)]), || {
            format!("split brain persisted after heal: {:?}", world.self_elected())
        })?;
        ensure(world.agreed_leader() == Some(NodeId(0)), || {
            format!("nodes disagree after heal: {:?}", world.leaders())
        })?;
        ensure_order(world, &ids)
    }

    /// CAN-005: MalformedPayload - garbage published on both topics.
    ///
    /// **Assertion**: every node discards it and keeps its last good state.
    async fn run_malformed_payload(&self, world: &mut SimWorld, metrics: &mut ScenarioMetrics) -> Check {
        info!("CAN-005: MalformedPayload");
        let ids = spawn(world).await?;
        advance(world, Duration::from_secs(2), metrics).await?;

        let heartbeat = world.config.node.heartbeat_topic();
        let state = world.config.node.shared_state_topic();
        let broker = world.broker().clone();
        broker.inject(&state, b"{garbage".to_vec(), true);
        broker.inject(&state, br#"{"position":[1],"velocity":[1,1]}"#.to_vec(), true);
        broker.inject(&heartbeat, br#"{"id":"zero"}"#.to_vec(), false);
        broker.inject(&heartbeat, b"not json".to_vec(), false);

        world.step().await.map_err(|e| e.to_string())?;
        for id in &ids {
            let rejected = world.node(*id).map_or(0, |node| node.stats().payloads_rejected);
            ensure(rejected >= 4, || format!("node {} rejected only {} payloads", id, rejected))?;
            ensure(world.cached_state(*id).is_some(), || format!("node {} lost its state", id))?;
        }

        advance(world, Duration::from_secs(1), metrics).await?;
        ensure(world.agreed_leader() == Some(NodeId(0)), || {
            format!("garbage disturbed leadership: {:?}", world.leaders())
        })?;
        ensure_order(world, &ids)?;

        let retained = broker.retained(&state).unwrap_or_default();
        ensure(serde_json::from_slice::<SharedState>(&retained).is_ok(), || {
            "retained garbage was never replaced".to_string()
        })
    }

    /// CAN-006: FlakyTransport - the leader loses the broker for 6s.
    ///
    /// **Assertion**: node 1 covers while node 0 is away; node 0 reconnects
    /// after its backoff with its cached state and resumes leadership.
    async fn run_flaky_transport(&self, world: &mut SimWorld, metrics: &mut ScenarioMetrics) -> Check {
        info!("CAN-006: FlakyTransport");
        let ids = spawn(world).await?;
        advance(world, Duration::from_secs(2), metrics).await?;

        let broker = world.broker().clone();
        broker.set_online(NodeId(0), false);
        broker.disconnect(NodeId(0));
        advance(world, Duration::from_secs(6), metrics).await?;

        ensure(!world.is_running(NodeId(0)), || "node 0 kept running offline".to_string())?;
        ensure(world.cached_state(NodeId(0)).is_some(), || {
            "node 0 lost its cached state".to_string()
        })?;
        ensure(world.agreed_leader() == Some(NodeId(1)), || {
            format!("no takeover while node 0 was away: {:?}", world.leaders())
        })?;

        broker.set_online(NodeId(0), true);
        let backoff = world.config.node.restart_backoff();
        advance(world, backoff + Duration::from_secs(3), metrics).await?;

        ensure(world.is_running(NodeId(0)), || "node 0 never reconnected".to_string())?;
        ensure(world.restarts(NodeId(0)) >= 1, || "no restart recorded".to_string())?;
        ensure(world.agreed_leader() == Some(NodeId(0)), || {
            format!("node 0 did not resume leadership: {:?}", world.leaders())
        })?;
        ensure_order(world, &ids)
    }

    /// CAN-007: LossyBus - 30% loss and 20ms latency.
    ///
    /// **Assertion**: the object keeps moving under loss and every node
    /// converges once the bus is clean again.
    async fn run_lossy_bus(&self, world: &mut SimWorld, metrics: &mut ScenarioMetrics) -> Check {
        info!("CAN-007: LossyBus");
        let ids = spawn(world).await?;

        let broker = world.broker().clone();
        broker.set_loss(0.3);
        broker.set_latency(20);
        advance(world, self.duration(), metrics).await?;

        ensure(world.self_elected().contains(&NodeId(0)), || {
            "node 0 stopped leading under loss".to_string()
        })?;
        ensure(broker.stats().dropped_loss > 0, || "loss never triggered".to_string())?;

        broker.set_loss(0.0);
        broker.set_latency(0);
        let settle = world.config.node.membership_timeout() + world.config.node.heartbeat_interval();
        advance(world, settle, metrics).await?;

        ensure(world.agreed_leader() == Some(NodeId(0)), || {
            format!("no convergence after loss: {:?}", world.leaders())
        })?;
        ensure_order(world, &ids)?;
        ensure(world.visible_count() == 1, || {
            format!("object visible on {} slices", world.visible_count())
        })
    }
}

async fn spawn(world: &mut SimWorld) -> Result<Vec<NodeId>, String> {
    world.spawn_nodes().await.map_err(|e| e.to_string())
}

/// Steps the world for `duration`, tracking leader and visibility overlaps.
async fn advance(world: &mut SimWorld, duration: Duration, metrics: &mut ScenarioMetrics) -> Check {
    let until = world.now() + duration;
    while world.now() < until {
        world.step().await.map_err(|e| e.to_string())?;

        let leaders = world.self_elected().len();
        metrics.max_concurrent_leaders = metrics.max_concurrent_leaders.max(leaders);
        if world.visible_count() > 1 {
            metrics.overlap_steps += 1;
        }

        if world.step_count() % 100 == 0 {
            debug!(
                "  t={:.1}s | leaders={:?} | visible={}",
                world.now().as_secs_f64(),
                world.self_elected(),
                world.visible_count()
            );
        }
    }
    Ok(())
}

fn ensure_order(world: &SimWorld, expected: &[NodeId]) -> Check {
    for id in world.node_ids() {
        if !world.is_running(id) {
            continue;
        }
        let order = world.cached_state(id).map(|state| state.order.as_slice());
        ensure(order == Some(expected), || {
            format!("node {} has order {:?}, expected {:?}", id, order, expected)
        })?;
    }
    Ok(())
}

fn collect_metrics(world: &SimWorld, metrics: &mut ScenarioMetrics) {
    let broker = world.broker().stats();
    metrics.messages_published = broker.published;
    metrics.messages_delivered = broker.delivered;
    metrics.dropped_loss = broker.dropped_loss;
    metrics.dropped_partition = broker.dropped_partition;
    metrics.restarts = world.total_restarts();

    for id in world.node_ids() {
        if let Some(node) = world.node(id) {
            let stats = node.stats();
            metrics.states_published += stats.states_published;
            metrics.payloads_rejected += stats.payloads_rejected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_scenario_passes() {
        let runner = ScenarioRunner::new(42, 3).with_duration(3.0);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario).await;
            assert!(
                result.passed,
                "{} failed: {:?}",
                scenario,
                result.failure_reason
            );
        }
    }

    #[tokio::test]
    async fn test_split_brain_reports_two_leaders() {
        let result = ScenarioRunner::new(7, 4).run(ScenarioId::SplitBrain).await;

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.max_concurrent_leaders, 2);
        assert!(result.metrics.dropped_partition > 0);
    }

    #[tokio::test]
    async fn test_same_seed_same_metrics() {
        let runner = ScenarioRunner::new(1234, 3).with_duration(4.0);
        let a = runner.run(ScenarioId::LossyBus).await;
        let b = runner.run(ScenarioId::LossyBus).await;

        assert_eq!(a.total_steps, b.total_steps);
        assert_eq!(a.metrics.dropped_loss, b.metrics.dropped_loss);
        assert_eq!(a.metrics.messages_delivered, b.metrics.messages_delivered);
    }

    #[tokio::test]
    async fn test_flaky_transport_counts_restarts() {
        let result = ScenarioRunner::new(42, 3).run(ScenarioId::FlakyTransport).await;

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.restarts >= 1);
    }
}
