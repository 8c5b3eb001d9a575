//! Simulation context implementing CanvasContext over a virtual clock.

use async_trait::async_trait;
use canvas_env::CanvasContext;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Virtual clock shared by every node in a simulated world.
///
/// Time only moves when the harness advances it (or a caller sleeps), so a
/// run is a pure function of its seed and the scenario script.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.lock_time();
        *time = time.saturating_add(duration.as_nanos() as u64);
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.lock_time()
    }

    /// Returns the master seed (for logging).
    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn lock_time(&self) -> std::sync::MutexGuard<'_, u64> {
        // A poisoned clock still holds a valid u64.
        self.virtual_time_ns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
        }
    }
}

#[async_trait]
impl CanvasContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    async fn sleep(&self, duration: Duration) {
        // Sleeping only advances the virtual clock
        self.advance_time(duration);
    }
}
