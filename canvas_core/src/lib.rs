//! Shared Canvas Core - leader-driven coordination of a tiled display
//!
//! A set of nodes, each owning one fixed-size slice of a wide logical canvas,
//! cooperate over a publish/subscribe bus:
//! 1. **Membership**: heartbeats keep a table of live nodes; silence evicts
//! 2. **Leadership**: the live node with the smallest id drives the simulation
//! 3. **Simulation**: the leader alone advances the shared object each tick
//! 4. **Replication**: the leader publishes the state retained; everyone caches it
//! 5. **Projection**: each node renders the part of the canvas it owns

pub mod config;
pub mod membership;
pub mod leader;
pub mod state;
pub mod simulation;
pub mod replication;
pub mod viewport;
pub mod renderer;
pub mod node_runtime;
pub mod supervisor;

#[cfg(feature = "dashboard")]
pub mod dashboard;

// Re-export key types for convenience
pub use config::{ConfigError, NodeConfig};
pub use membership::MembershipTracker;
pub use leader::{assume_role, elect, Role, RoleKind, SimulationGrant};
pub use state::SharedState;
pub use simulation::SimulationAuthority;
pub use replication::{Heartbeat, PayloadError, PublishError, StateReplicator};
pub use viewport::{project, Viewport};
pub use renderer::{NullRenderer, RenderError, Renderer, TerminalRenderer};
pub use node_runtime::{CanvasNode, NodeError, NodeStats, PassReport};
pub use supervisor::{RestartPolicy, Supervisor, SupervisorReport, TransportFactory};
