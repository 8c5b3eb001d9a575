//! Clock abstraction for canvas nodes.

use async_trait::async_trait;
use std::time::Duration;

/// The node's view of time.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `Instant`
/// - **Simulation**: `SimContext` - a virtual clock advanced by the harness
///
/// All cadences of the event loop (heartbeat, pruning, simulation tick) are
/// measured against `now()`, so a simulated clock makes every run reproducible.
#[async_trait]
pub trait CanvasContext: Send + Sync + 'static {
    /// Returns the monotonic time elapsed since the context was created.
    fn now(&self) -> Duration;

    /// Suspends the caller for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);
}
