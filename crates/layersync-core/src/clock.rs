//! Time source and timer abstraction.
//!
//! Every timed wait in the crate (poll intervals, retry backoff, debounce
//! windows) goes through a [`Clock`], so a host can substitute its own timer
//! and tests can run on tokio's paused clock:
//!
//! ```ignore
//! #[tokio::test(start_paused = true)]
//! async fn converges() {
//!     let clock = TokioClock::shared();
//!     // sleeps auto-advance virtual time; no real waiting
//! }
//! ```
//!
//! Suspension happens only at [`Clock::sleep`]; renderer calls never yield.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
pub use tokio::time::Instant;

/// Injectable time source.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Time elapsed since `earlier`, saturating at zero.
    fn elapsed_since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

/// Shared clock handle passed between services.
pub type SharedClock = Arc<dyn Clock>;

/// [`Clock`] backed by the tokio timer.
///
/// Under `tokio::time::pause()` (or `start_paused = true`) this becomes a
/// deterministic virtual clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl TokioClock {
    /// A ready-to-share handle.
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Whole milliseconds of `duration`, saturating at `u64::MAX`.
#[must_use]
pub fn as_millis_u64(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
