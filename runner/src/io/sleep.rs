//! Blocking waits and cooperative cancellation.
//!
//! Every suspension point in a worker (claim jitter, retry backoff, round
//! backoff, idle polling) goes through [`Sleeper`] so tests can run the whole
//! state machine without real delays.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::debug;

/// Abstraction over blocking waits.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeper backed by `std::thread::sleep`.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            debug!(millis = duration.as_millis() as u64, "sleeping");
            thread::sleep(duration);
        }
    }
}

/// Shared cancellation flag set by an external interrupt.
///
/// Checked between poll cycles and iterations only; a running iteration is
/// never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sleep for `total` in slices of at most `slice`, stopping early once `cancel` is set.
///
/// Returns `false` if the wait was cut short by cancellation.
pub fn sleep_unless_cancelled<S: Sleeper + ?Sized>(
    sleeper: &S,
    cancel: &CancelToken,
    total: Duration,
    slice: Duration,
) -> bool {
    let slice = if slice.is_zero() { total } else { slice };
    let mut remaining = total;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return false;
        }
        let step = remaining.min(slice);
        sleeper.sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    !cancel.is_cancelled()
}
