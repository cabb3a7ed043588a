//! # Store
//!
//! Per-identity counters accumulated over a period
//!
//! [MemoryStore] keeps the counts in process memory. [SharedStore] keeps them in an external hash
//! store such as Redis so several processes can increment while a single job pops.

use super::{identity::MetricIdentity, Error};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

mod memory;
#[cfg(feature = "redis")]
mod redis;
mod shared;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisHashStore;
pub use shared::{HashStore, MemoryHashStore, SharedStore, COUNTS_KEY, PERIOD_START_KEY};

/// Rates popped for a period, ordered by identity
pub type PeriodRates = BTreeMap<MetricIdentity, f64>;

/// Counter accumulator shared by the increment path and the flush path
pub trait CounterStore: Send + Sync {
    /// Add `delta` to the count for `identity`, creating the entry if needed
    ///
    /// Called on the application's hot path: must be cheap and must not fail visibly.
    fn increment_by(&self, identity: &MetricIdentity, delta: u64);

    fn increment(&self, identity: &MetricIdentity) {
        self.increment_by(identity, 1)
    }

    /// Capture every count as a per-second rate over `[period_start, now)`, then clear the counts
    /// and start a new period
    ///
    /// When no time has elapsed since the period started the counts are left in place and an empty
    /// map is returned, so they are reported by the next pop.
    fn pop_period(&self) -> Result<PeriodRates, Error>;
}

impl<S: CounterStore + ?Sized> CounterStore for std::sync::Arc<S> {
    fn increment_by(&self, identity: &MetricIdentity, delta: u64) {
        (**self).increment_by(identity, delta)
    }

    fn pop_period(&self) -> Result<PeriodRates, Error> {
        (**self).pop_period()
    }
}

/// Length of the period, `None` when it is empty or the clock went backwards
fn elapsed(period_start: SystemTime, now: SystemTime) -> Option<Duration> {
    now.duration_since(period_start).ok().filter(|elapsed| !elapsed.is_zero())
}
