//! # Temporal Types — Injected Clocks
//!
//! Every threshold in the engine is a duration measured from a stored
//! timestamp ("60 days since the initial notice"). Reading `Utc::now()`
//! directly would make those rules untestable, so operations take the
//! current time from a [`Clock`].
//!
//! All clocks return UTC truncated to whole seconds. Postgres `TIMESTAMPTZ`
//! keeps microseconds, the JSON state file keeps nanoseconds; truncating at
//! the source keeps both stores comparing equal.

use std::fmt::Debug;

use chrono::{DateTime, Duration, Timelike, Utc};
use parking_lot::Mutex;

/// Source of the current time.
pub trait Clock: Send + Sync + Debug {
    /// Current UTC time, truncated to seconds.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        truncate_to_seconds(Utc::now())
    }
}

/// A clock that only moves when told to.
///
/// Used by tests and by the CLI's `--now` override to replay a timeline.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `at`.
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(truncate_to_seconds(at)),
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = truncate_to_seconds(at);
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock();
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Truncate a `DateTime<Utc>` to seconds precision (discard nanoseconds).
pub fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

/// Whole days elapsed from `since` to `now`, floored. Negative if `since`
/// is in the future.
pub fn days_elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_days()
}
