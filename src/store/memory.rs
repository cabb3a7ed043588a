use super::{elapsed, CounterStore, PeriodRates};
use crate::{clock::Clock, identity::MetricIdentity, Error};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use tracing::{debug, warn};

struct Period {
    start: SystemTime,
    counts: HashMap<MetricIdentity, u64>,
}

/// Process-local [CounterStore]
///
/// The period starts when the store is created. A pop swaps the counts out under the lock, so an
/// increment racing with it lands in exactly one of the two periods.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    period: Mutex<Period>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let start = clock.now();
        Self {
            clock,
            period: Mutex::new(Period {
                start,
                counts: HashMap::new(),
            }),
        }
    }
}

impl CounterStore for MemoryStore {
    fn increment_by(&self, identity: &MetricIdentity, delta: u64) {
        let mut period = self.period.lock().unwrap_or_else(PoisonError::into_inner);

        // Avoid cloning the identity once the entry exists
        if let Some(count) = period.counts.get_mut(identity) {
            *count = count.saturating_add(delta);
        } else {
            period.counts.insert(identity.clone(), delta);
        }
    }

    fn pop_period(&self) -> Result<PeriodRates, Error> {
        let (counts, duration) = {
            let mut period = self.period.lock().unwrap_or_else(PoisonError::into_inner);
            let now = self.clock.now();

            let Some(duration) = elapsed(period.start, now) else {
                if now < period.start {
                    warn!("Clock went back past the period start, restarting the period");
                    period.start = now;
                }
                debug!("Empty period, keeping {} counters for the next pop", period.counts.len());
                return Ok(PeriodRates::new());
            };

            period.start = now;
            (std::mem::take(&mut period.counts), duration)
        };

        let seconds = duration.as_secs_f64();
        Ok(counts
            .into_iter()
            .map(|(identity, count)| (identity, count as f64 / seconds))
            .collect())
    }
}
