//! # Instrumentation
//!
//! Facade returned from metrics_cloudwatch_meters::Builder

use super::{
    clock::Clock,
    datum::{MetricDatum, MetricValue},
    emitter::{BatchEmitter, EmitReport},
    identity::MetricIdentity,
    recorder::Recorder,
    store::CounterStore,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Outcome of a [Instrumentation::flush_meters] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Rate metrics produced by the pop
    pub metrics: usize,
    pub batches: usize,
    pub failed_batches: usize,
    /// The counter store could not be popped
    pub store_failed: bool,
}

impl FlushReport {
    pub fn is_ok(&self) -> bool {
        self.failed_batches == 0 && !self.store_failed
    }
}

struct Inner {
    store: Arc<dyn CounterStore>,
    emitter: BatchEmitter,
    clock: Arc<dyn Clock>,
}

/// Meter aggregation + CloudWatch submission
///
/// Use [Builder](super::Builder) to construct. Clones are cheap and share the same store and client.
///
/// # Example
/// ```
/// let instrumentation = metrics_cloudwatch_meters::Builder::new()
///     .cloudwatch_namespace("FizzBuzzAsAService")
///     .region("us-west-2")
///     .build()
///     .unwrap();
///
/// // Request path, no network
/// instrumentation.increment_meter("requests", [("Method", "Default")]);
///
/// // Scheduled, once a minute
/// let report = instrumentation.flush_meters();
/// assert!(report.is_ok());
/// ```
#[derive(Clone)]
pub struct Instrumentation {
    inner: Arc<Inner>,
}

impl Instrumentation {
    pub(crate) fn new(store: Arc<dyn CounterStore>, emitter: BatchEmitter, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner { store, emitter, clock }),
        }
    }

    pub fn namespace(&self) -> &str {
        self.inner.emitter.namespace()
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.inner.store
    }

    /// A [metrics::Recorder] feeding this instrumentation, for use with
    /// [metrics::with_local_recorder] or [metrics::set_global_recorder]
    pub fn recorder(&self) -> Recorder {
        Recorder::from(self.clone())
    }

    /// Count one occurrence of `name` with `dimensions`
    ///
    /// Only touches the counter store. Invalid names are logged and dropped.
    pub fn increment_meter<I, K, V>(&self, name: impl Into<String>, dimensions: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.increment_meter_by(name, dimensions, 1)
    }

    /// Count `delta` occurrences of `name` with `dimensions`
    pub fn increment_meter_by<I, K, V>(&self, name: impl Into<String>, dimensions: I, delta: u64)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        match MetricIdentity::new(name, dimensions) {
            Ok(identity) => self.inner.store.increment_by(&identity, delta),
            Err(e) => warn!("Dropping meter increment: {e}"),
        }
    }

    /// Submit a single value right away, see [Instrumentation::put_values]
    pub fn put_value<I, K, V>(
        &self,
        name: impl Into<String>,
        value: impl Into<f64>,
        unit: Option<metrics::Unit>,
        dimensions: I,
    ) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut metric = MetricValue::new(name, value).with_dimensions(dimensions);
        metric.unit = unit;
        self.put_values(vec![metric])
    }

    /// Stamp `values` with the current time and submit them in batches
    ///
    /// Returns false if any batch failed. Failures are already logged, there is little point in
    /// retrying.
    pub fn put_values(&self, values: Vec<MetricValue>) -> bool {
        self.submit(values).is_ok()
    }

    fn submit(&self, values: Vec<MetricValue>) -> EmitReport {
        let now = self.inner.clock.now();
        let data: Vec<MetricDatum> = values.into_iter().map(|value| value.at(now)).collect();

        self.inner.emitter.emit(&data)
    }

    /// Pop the current period from the counter store and submit every meter as a `Count/Second`
    /// rate
    ///
    /// Nothing is submitted when no meter was incremented during the period.
    pub fn flush_meters(&self) -> FlushReport {
        debug!("About to flush meters");

        let rates = match self.inner.store.pop_period() {
            Ok(rates) => rates,
            Err(e) => {
                error!("Unable to pop meters: {e}");
                return FlushReport {
                    store_failed: true,
                    ..Default::default()
                };
            }
        };

        if rates.is_empty() {
            debug!("No meters to flush");
            return FlushReport::default();
        }

        let values = rates
            .iter()
            .map(|(identity, rate)| MetricValue::rate(identity, *rate))
            .collect();
        let emitted = self.submit(values);

        debug!(
            "Flushed {} meters in {} batches ({} failed)",
            rates.len(),
            emitted.batches,
            emitted.failed_batches
        );

        FlushReport {
            metrics: rates.len(),
            batches: emitted.batches,
            failed_batches: emitted.failed_batches,
            store_failed: false,
        }
    }
}
