//! Wall-clock access used by the timer engines and snapshot bookkeeping.
//!
//! Every component that needs "now" reads it through [`Clock`] so tests can swap in a
//! [`ManualClock`] and drive time deterministically, including moving it backwards to
//! simulate skew.

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use time::OffsetDateTime;

/// Milliseconds since the Unix epoch, the unit used for every absolute instant in the crate.
pub type EpochMs = i64;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time in epoch milliseconds.
    fn now_ms(&self) -> EpochMs;
}

/// Clock backed by the operating system's wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> EpochMs {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        (nanos / 1_000_000) as EpochMs
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same underlying instant, so a test can hand one clone to a session and
/// keep another to advance time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock frozen at `start_ms`.
    pub fn new(start_ms: EpochMs) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    /// Move the clock forward by `delta_ms` (negative values move it backwards).
    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Jump to an absolute instant.
    pub fn set(&self, now_ms: EpochMs) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> EpochMs {
        self.now.load(Ordering::SeqCst)
    }
}

/// Shared handle to a clock implementation.
pub type SharedClock = Arc<dyn Clock>;
