//! Supervisor - keeps a node running across transport faults.
//!
//! Every fault a loop pass propagates is treated as transient: log it, wait
//! a fixed backoff, then rebuild the node around a fresh transport. The
//! membership table starts empty again (it refills from heartbeats within one
//! interval); the cached shared state is carried over so the slice does not
//! blank out during the reconnect.

use crate::config::{ConfigError, NodeConfig};
use crate::node_runtime::{CanvasNode, NodeError};
use crate::renderer::Renderer;
use crate::state::SharedState;

use canvas_env::{CanvasContext, PubSubTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Builds an unconnected transport for each (re)connection attempt.
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: PubSubTransport;

    fn create(&self) -> Self::Transport;
}

impl<F, T> TransportFactory for F
where
    F: Fn() -> T + Send + Sync + 'static,
    T: PubSubTransport,
{
    type Transport = T;

    fn create(&self) -> T {
        self()
    }
}

/// How the supervisor reacts to a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Pause before reconnecting
    pub backoff: Duration,

    /// Give up after this many restarts (`None` = never)
    pub max_restarts: Option<u32>,
}

impl RestartPolicy {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            backoff: config.restart_backoff(),
            max_restarts: None,
        }
    }
}

/// Outcome of a supervised run that ended in shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    pub restarts: u32,
    pub final_state: Option<SharedState>,
}

/// Runs a node, restarting it on faults until shutdown.
pub struct Supervisor<Ctx, F, R>
where
    Ctx: CanvasContext,
    F: TransportFactory,
    R: Renderer,
{
    config: NodeConfig,
    context: Arc<Ctx>,
    factory: F,
    renderer: R,
    policy: RestartPolicy,
    preserved: Option<SharedState>,
}

impl<Ctx, F, R> Supervisor<Ctx, F, R>
where
    Ctx: CanvasContext,
    F: TransportFactory,
    R: Renderer,
{
    pub fn new(config: NodeConfig, context: Arc<Ctx>, factory: F, renderer: R) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = RestartPolicy::from_config(&config);
        Ok(Self {
            config,
            context,
            factory,
            renderer,
            policy,
            preserved: None,
        })
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Seeds the state the first session starts from.
    pub fn with_state(mut self, state: Option<SharedState>) -> Self {
        self.preserved = state;
        self
    }

    /// Runs sessions until `shutdown` is `true`.
    ///
    /// Returns `Err` only when the restart limit in the policy is exceeded.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<SupervisorReport, NodeError> {
        let Supervisor {
            config,
            context,
            factory,
            mut renderer,
            policy,
            mut preserved,
        } = self;
        let mut restarts = 0u32;

        loop {
            if *shutdown.borrow() {
                return Ok(SupervisorReport {
                    restarts,
                    final_state: preserved,
                });
            }

            let mut node = CanvasNode::new(config.clone(), context.clone(), factory.create(), renderer)?;
            node.restore_state(preserved.take());

            let outcome = match node.start().await {
                Ok(()) => node.run(&mut shutdown).await,
                Err(e) => Err(e),
            };
            node.shutdown().await;

            let (_, returned_renderer, state) = node.into_parts();
            renderer = returned_renderer;
            preserved = state;

            let err = match outcome {
                Ok(()) => {
                    info!(node = %config.node_id, restarts, "node stopped");
                    return Ok(SupervisorReport {
                        restarts,
                        final_state: preserved,
                    });
                }
                Err(err) => err,
            };

            restarts += 1;
            if policy.max_restarts.is_some_and(|max| restarts > max) {
                error!(node = %config.node_id, restarts, error = %err, "restart limit reached, giving up");
                return Err(err);
            }

            if err.is_connection_loss() {
                warn!(
                    node = %config.node_id,
                    error = %err,
                    backoff_ms = policy.backoff.as_millis() as u64,
                    restarts,
                    "connection lost, reconnecting after backoff"
                );
            } else {
                warn!(
                    node = %config.node_id,
                    error = %err,
                    backoff_ms = policy.backoff.as_millis() as u64,
                    restarts,
                    "node loop failed, restarting after backoff"
                );
            }
            context.sleep(policy.backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_runtime::tests::{LoopbackTransport, ManualClock};
    use crate::renderer::RenderError;
    use canvas_env::{NodeId, TransportError};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Stops the supervisor after a fixed number of frames.
    struct StopAfter {
        remaining: u32,
        shutdown: watch::Sender<bool>,
    }

    impl Renderer for StopAfter {
        fn render(&mut self, _x: Option<i32>, _y: i32, _leader: bool) -> Result<(), RenderError> {
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                let _ = self.shutdown.send(true);
            }
            Ok(())
        }
    }

    fn config() -> NodeConfig {
        NodeConfig {
            restart_backoff_ms: 250,
            ..NodeConfig::for_node(NodeId(0))
        }
    }

    #[tokio::test]
    async fn test_runs_until_shutdown() {
        let (tx, rx) = watch::channel(false);
        let clock = Arc::new(ManualClock::default());
        let renderer = StopAfter {
            remaining: 5,
            shutdown: tx,
        };

        let supervisor =
            Supervisor::new(config(), clock, LoopbackTransport::default, renderer).unwrap();
        let report = supervisor.run(rx).await.unwrap();

        assert_eq!(report.restarts, 0);
        assert!(report.final_state.is_some());
    }

    #[tokio::test]
    async fn test_restarts_after_failed_connections() {
        let (tx, rx) = watch::channel(false);
        let clock = Arc::new(ManualClock::default());
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        // The first two transports die on their first publish.
        let factory = move || LoopbackTransport {
            fail_publish: counter.fetch_add(1, Ordering::SeqCst) < 2,
            ..LoopbackTransport::default()
        };
        let renderer = StopAfter {
            remaining: 3,
            shutdown: tx,
        };

        let supervisor = Supervisor::new(config(), clock.clone(), factory, renderer).unwrap();
        let report = supervisor.run(rx).await.unwrap();

        assert_eq!(report.restarts, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(clock.now() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_gives_up_past_restart_limit() {
        let (_tx, rx) = watch::channel(false);
        let factory = || LoopbackTransport {
            fail_publish: true,
            ..LoopbackTransport::default()
        };

        let supervisor = Supervisor::new(
            config(),
            Arc::new(ManualClock::default()),
            factory,
            crate::renderer::NullRenderer,
        )
        .unwrap()
        .with_policy(RestartPolicy {
            backoff: Duration::from_millis(10),
            max_restarts: Some(1),
        });

        let err = supervisor.run(rx).await.unwrap_err();
        assert!(matches!(err, NodeError::Transport(TransportError::ConnectionLost(_))));
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let (tx, rx) = watch::channel(false);
        let seed = SharedState::initial([1, 0], 8, 16, vec![NodeId(0)]);
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let factory = move || LoopbackTransport {
            fail_publish: counter.fetch_add(1, Ordering::SeqCst) == 0,
            ..LoopbackTransport::default()
        };
        let renderer = StopAfter {
            remaining: 1,
            shutdown: tx,
        };

        let supervisor = Supervisor::new(config(), Arc::new(ManualClock::default()), factory, renderer)
            .unwrap()
            .with_state(Some(seed));
        let report = supervisor.run(rx).await.unwrap();

        // Continued from the preserved object instead of recreating it.
        assert_eq!(report.restarts, 1);
        assert_eq!(report.final_state.unwrap().position, [1, 0]);
    }
}
