//! Shared Canvas Deterministic Simulation Harness
//!
//! Runs many canvas nodes in one process against an in-memory broker, so
//! membership churn, leader failover and bus faults can be replayed exactly.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: a virtual clock that moves only when the world steps
//! - **Bus**: an in-memory broker with retain, latency, loss and partitions
//! - **Randomness**: loss decisions drawn from a ChaCha stream seeded per run
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (virtual clock, one advance per step)     │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │  ┌─────────┐   ┌─────────┐   ┌─────────┐                    │
//! │  │ Node #0 │   │ Node #1 │   │ Node #2 │   ...              │
//! │  └────┬────┘   └────┬────┘   └────┬────┘                    │
//! │       └─────────────┼─────────────┘                         │
//! │              ┌──────▼──────┐                                │
//! │              │  SimBroker  │  retain + fault injection      │
//! │              └─────────────┘                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use canvas_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 3).run(ScenarioId::SplitBrain).await;
//! assert!(result.passed);
//! ```

mod context;
mod network;
mod world;
mod runner;
pub mod scenarios;

#[cfg(test)]
mod properties;

pub use context::SimContext;
pub use network::{BrokerStats, SimBroker, SimTransport};
pub use world::{Frame, FrameLog, SimConfig, SimNode, SimWorld};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
