//! Monotonic microsecond clock used for event ordering.

use crate::Timestamp;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Wall-clock microseconds that never go backwards.
///
/// Each call to [`MicroClock::tick`] returns a value strictly greater than
/// every value previously returned by the same clock, even when the system
/// clock stalls or steps back.
#[derive(Debug, Default)]
pub struct MicroClock {
    last: AtomicI64,
}

impl MicroClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next strictly increasing timestamp in microseconds since the epoch.
    pub fn tick(&self) -> i64 {
        let now = Utc::now().timestamp_micros();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = if now > last { now } else { last + 1 };
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => last = observed,
            }
        }
    }
}

/// Convert clock microseconds into a UTC timestamp.
pub fn micros_to_timestamp(micros: i64) -> Timestamp {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::UNIX_EPOCH)
}
