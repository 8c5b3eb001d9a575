//! Shared Canvas Environment Abstraction Layer
//!
//! This crate isolates everything a canvas node needs from the outside world
//! so the same protocol code runs against a **real** pub/sub bus (tokio +
//! zenoh) and a **simulated** one (virtual clock + in-memory broker).
//!
//! # What is intercepted
//!
//! - Time (`now()`, `sleep()`) via [`CanvasContext`]
//! - Publish/subscribe I/O via [`PubSubTransport`]
//! - Fault injection (partitions, loss, disconnects) via [`FaultController`]
//!
//! # Example
//!
//! ```ignore
//! use canvas_env::{CanvasContext, PubSubTransport};
//!
//! async fn drain<Ctx: CanvasContext, T: PubSubTransport>(ctx: &Ctx, bus: &mut T) {
//!     while let Ok(Some(msg)) = bus.try_recv().await {
//!         handle(msg, ctx.now());
//!     }
//!     ctx.sleep(Duration::from_millis(10)).await;
//! }
//! ```

mod context;
mod transport;
mod types;
mod error;
mod tokio_impl;

pub use context::CanvasContext;
pub use transport::{FaultController, PubSubTransport};
pub use types::{InboundMessage, NodeId};
pub use error::TransportError;
pub use tokio_impl::TokioContext;
