//! Randomized retry backoff and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

/// Granularity at which a sleeping retry checks for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(5);

/// Shared flag that stops a retry loop.
///
/// Cloning yields a handle to the same flag. Once canceled, a token stays
/// canceled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    canceled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

/// Uniform random delay in `[0, max)` between conflicting attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    max: Duration,
}

impl Backoff {
    pub fn new(max: Duration) -> Self {
        Self { max }
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn next_delay(&self) -> Duration {
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..max_ms))
    }

    /// Sleep for `delay`, waking early if `cancel` fires.
    ///
    /// Returns `false` when the sleep was cut short by cancellation.
    pub fn sleep(&self, delay: Duration, cancel: Option<&CancelToken>) -> bool {
        let Some(token) = cancel else {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            return true;
        };

        let deadline = Instant::now() + delay;
        loop {
            if token.is_canceled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }
}
