//! Temporal control primitives: debounce, throttle and batch.
//!
//! All three read time from a [`Clock`], so they behave identically under
//! tokio's paused test clock.
//!
//! - [`Debouncer`]: trailing edge, only the last value of a burst is delivered.
//! - [`Throttle`]: leading edge, at most one pass per interval.
//! - [`Batcher`]: accumulates items until a size or age limit is hit.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

use crate::clock::{Instant, SharedClock};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// =============================================================================
// Debouncer
// =============================================================================

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

struct DebounceSlot<T> {
    value: Option<T>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// Trailing-edge debouncer.
///
/// Each [`call`](Self::call) re-arms the timer; the callback receives only
/// the value from the last call once `wait` passes without another call.
/// Requires a tokio runtime.
pub struct Debouncer<T> {
    clock: SharedClock,
    wait: Duration,
    callback: Callback<T>,
    slot: Arc<Mutex<DebounceSlot<T>>>,
}

impl<T> std::fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("wait", &self.wait)
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl<T> Debouncer<T> {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        lock(&self.slot).value.is_some()
    }
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(clock: SharedClock, wait: Duration, callback: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            clock,
            wait,
            callback: Arc::new(callback),
            slot: Arc::new(Mutex::new(DebounceSlot {
                value: None,
                generation: 0,
                timer: None,
            })),
        }
    }

    /// Replace the pending value and restart the quiet window.
    pub fn call(&self, value: T) {
        let mut slot = lock(&self.slot);
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.generation += 1;
        slot.value = Some(value);

        let generation = slot.generation;
        let sleep = self.clock.sleep(self.wait);
        let shared = Arc::clone(&self.slot);
        let callback = Arc::clone(&self.callback);
        slot.timer = Some(tokio::spawn(async move {
            sleep.await;
            let value = {
                let mut slot = lock(&shared);
                if slot.generation != generation {
                    return;
                }
                slot.timer = None;
                slot.value.take()
            };
            if let Some(value) = value {
                trace!("Debounce window elapsed");
                callback(value);
            }
        }));
    }

    /// Drop the pending value without delivering it.
    pub fn cancel(&self) -> bool {
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.value.take().is_some()
    }

    /// Deliver the pending value now, if any.
    pub fn flush(&self) -> bool {
        let value = {
            let mut slot = lock(&self.slot);
            slot.generation += 1;
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            slot.value.take()
        };
        match value {
            Some(value) => {
                (self.callback)(value);
                true
            }
            None => false,
        }
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.slot).timer.take() {
            timer.abort();
        }
    }
}

// =============================================================================
// Throttle
// =============================================================================

/// Leading-edge throttle: the first call passes, then nothing for `interval`.
#[derive(Debug)]
pub struct Throttle {
    clock: SharedClock,
    interval: Duration,
    last_pass: Mutex<Option<Instant>>,
}

impl Throttle {
    #[must_use]
    pub fn new(clock: SharedClock, interval: Duration) -> Self {
        Self {
            clock,
            interval,
            last_pass: Mutex::new(None),
        }
    }

    /// `true` if the caller may proceed now.
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut last = lock(&self.last_pass);
        match *last {
            Some(prev) if now.saturating_duration_since(prev) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Time until the next call would pass.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        let now = self.clock.now();
        lock(&self.last_pass).map_or(Duration::ZERO, |prev| {
            self.interval
                .saturating_sub(now.saturating_duration_since(prev))
        })
    }

    pub fn reset(&self) {
        *lock(&self.last_pass) = None;
    }
}

// =============================================================================
// Batcher
// =============================================================================

/// Size- and age-bounded accumulator.
///
/// A batch is released when it reaches `max_size` items (by
/// [`push`](Self::push)) or when `window` has passed since its first item
/// (by [`take_if_due`](Self::take_if_due)).
#[derive(Debug)]
pub struct Batcher<T> {
    clock: SharedClock,
    max_size: usize,
    window: Duration,
    items: Vec<T>,
    opened_at: Option<Instant>,
}

impl<T> Batcher<T> {
    /// A zero `max_size` is raised to 1.
    #[must_use]
    pub fn new(clock: SharedClock, max_size: usize, window: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            clock,
            max_size,
            window,
            items: Vec::with_capacity(max_size),
            opened_at: None,
        }
    }

    /// Add an item; returns the full batch once `max_size` is reached.
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        if self.items.is_empty() {
            self.opened_at = Some(self.clock.now());
        }
        self.items.push(item);
        (self.items.len() >= self.max_size).then(|| self.flush())
    }

    /// Take the batch if its window has elapsed.
    pub fn take_if_due(&mut self) -> Option<Vec<T>> {
        let opened = self.opened_at?;
        (self.clock.elapsed_since(opened) >= self.window).then(|| self.flush())
    }

    /// When the current batch becomes due, if one is open.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|opened| opened + self.window)
    }

    /// Take whatever is buffered.
    pub fn flush(&mut self) -> Vec<T> {
        self.opened_at = None;
        std::mem::replace(&mut self.items, Vec::with_capacity(self.max_size))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
