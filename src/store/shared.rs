use super::{CounterStore, PeriodRates};
use crate::{clock, clock::Clock, identity::MetricIdentity, Error};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Scalar key holding the period start as fractional unix seconds
pub const PERIOD_START_KEY: &str = "ssinstr:meter:periodstart";

/// Hash key holding counts by [serialized identity](MetricIdentity::serialize)
pub const COUNTS_KEY: &str = "ssinstr:meter:counts";

/// The subset of a Redis-like key/value + hash store used by [SharedStore]
pub trait HashStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, Error>;

    fn set(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Set `key` only if it does not exist yet, returns whether it was set
    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, Error>;

    /// Atomically add `delta` to a hash field, returns the new value
    fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, Error>;

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, Error>;

    fn del(&self, key: &str) -> Result<(), Error>;
}

/// [CounterStore] kept in an external [HashStore]
///
/// Any number of processes may increment concurrently through the store's atomic field
/// increment. Only one process should pop.
///
/// A pop reads the counts, writes the new period start and then deletes the counts hash in
/// separate calls. Increments landing between the read and the delete are lost, and a crash
/// between the two writes reports the same counts again on the next pop.
pub struct SharedStore<H> {
    store: H,
    clock: Arc<dyn Clock>,
}

impl<H: HashStore> SharedStore<H> {
    /// Wrap `store`, starting a period unless one is already in progress
    pub fn new(store: H, clock: Arc<dyn Clock>) -> Self {
        let shared = Self { store, clock };
        if let Err(e) = shared.start_period_if_absent() {
            warn!("Unable to initialize the meter period start: {e}");
        }
        shared
    }

    pub fn inner(&self) -> &H {
        &self.store
    }

    fn now_string(&self) -> String {
        clock::epoch_seconds(self.clock.now()).to_string()
    }

    fn start_period_if_absent(&self) -> Result<bool, Error> {
        self.store.set_if_absent(PERIOD_START_KEY, &self.now_string())
    }
}

impl<H: HashStore> CounterStore for SharedStore<H> {
    fn increment_by(&self, identity: &MetricIdentity, delta: u64) {
        let delta = i64::try_from(delta).unwrap_or(i64::MAX);

        if let Err(e) = self.store.hincr_by(COUNTS_KEY, &identity.serialize(), delta) {
            warn!("Unable to increment meter {identity}: {e}");
        }
    }

    fn pop_period(&self) -> Result<PeriodRates, Error> {
        let now = clock::epoch_seconds(self.clock.now());

        let period_start = match self.store.get(PERIOD_START_KEY)? {
            Some(raw) => match raw.parse::<f64>() {
                Ok(start) => start,
                Err(_) => {
                    warn!("Discarding unparsable meter period start {raw:?}");
                    self.store.set(PERIOD_START_KEY, &now.to_string())?;
                    return Ok(PeriodRates::new());
                }
            },
            None => {
                debug!("No meter period in progress, starting one");
                self.start_period_if_absent()?;
                return Ok(PeriodRates::new());
            }
        };

        let duration = now - period_start;
        if !duration.is_finite() || duration < 0.0 {
            warn!("Meter period start {period_start} is after now, restarting the period and keeping counts");
            self.store.set(PERIOD_START_KEY, &now.to_string())?;
            return Ok(PeriodRates::new());
        }
        if duration <= 0.0 {
            debug!("Empty meter period, keeping counts for the next pop");
            return Ok(PeriodRates::new());
        }

        let raw_counts = self.store.hgetall(COUNTS_KEY)?;
        let mut rates = PeriodRates::new();

        for (field, raw_count) in raw_counts {
            let identity = match MetricIdentity::deserialize(&field) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!("Skipping meter: {e}");
                    continue;
                }
            };
            let Ok(count) = raw_count.parse::<i64>() else {
                warn!("Skipping meter {identity}: count {raw_count:?} is not an integer");
                continue;
            };

            // Fields written by other producers may decode to the same identity
            *rates.entry(identity).or_insert(0.0) += count as f64 / duration;
        }

        self.store.set(PERIOD_START_KEY, &now.to_string())?;
        self.store.del(COUNTS_KEY)?;

        Ok(rates)
    }
}

#[derive(Default)]
struct Keyspace {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// In-process [HashStore]
///
/// Clones share the same keyspace, which is enough to run several [SharedStore]s against one
/// store within a process.
#[derive(Default, Clone)]
pub struct MemoryHashStore(Arc<Mutex<Keyspace>>);

impl MemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Keyspace) -> T) -> T {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl HashStore for MemoryHashStore {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.with(|keyspace| keyspace.strings.get(key).cloned()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.with(|keyspace| keyspace.strings.insert(key.to_owned(), value.to_owned()));
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, Error> {
        Ok(self.with(|keyspace| {
            if keyspace.strings.contains_key(key) {
                return false;
            }
            keyspace.strings.insert(key.to_owned(), value.to_owned());
            true
        }))
    }

    fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, Error> {
        self.with(|keyspace| {
            let value = keyspace
                .hashes
                .entry(key.to_owned())
                .or_default()
                .entry(field.to_owned())
                .or_insert_with(|| "0".to_owned());

            let current: i64 = value
                .parse()
                .map_err(|_| Error::Store(format!("hash value {value:?} is not an integer")))?;
            let updated = current
                .checked_add(delta)
                .ok_or_else(|| Error::Store("increment would overflow".to_owned()))?;

            *value = updated.to_string();
            Ok(updated)
        })
    }

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, Error> {
        Ok(self.with(|keyspace| keyspace.hashes.get(key).cloned().unwrap_or_default()))
    }

    fn del(&self, key: &str) -> Result<(), Error> {
        self.with(|keyspace| {
            keyspace.strings.remove(key);
            keyspace.hashes.remove(key);
        });
        Ok(())
    }
}
