//! # Recorder
//!
//! Routes the `metrics` crate macros into an [Instrumentation]
//!
//! * counters become meters, flushed as `Count/Second` rates
//! * gauges and histograms are put right away, with the unit given to `describe_*`
//!
//! Labels become dimensions.

use super::{datum::MetricValue, identity::MetricIdentity, instrumentation::Instrumentation};
use metrics::SharedString;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

type Units = Arc<Mutex<HashMap<String, metrics::Unit>>>;

/// Counter handle incrementing a meter in the counter store
struct MeterHandle {
    identity: MetricIdentity,
    instrumentation: Instrumentation,
}

impl metrics::CounterFn for MeterHandle {
    fn increment(&self, value: u64) {
        self.instrumentation.store().increment_by(&self.identity, value)
    }

    fn absolute(&self, _value: u64) {
        debug!("Ignoring absolute value for meter {}", self.identity);
    }
}

/// Gauge and histogram handle putting every update as a value
struct ValueHandle {
    identity: MetricIdentity,
    instrumentation: Instrumentation,
    units: Units,
    // f64 bits, only used by gauges
    last: AtomicU64,
}

impl ValueHandle {
    fn new(identity: MetricIdentity, recorder: &Recorder) -> Self {
        Self {
            identity,
            instrumentation: recorder.instrumentation.clone(),
            units: recorder.units.clone(),
            last: AtomicU64::new(0f64.to_bits()),
        }
    }

    fn put(&self, value: f64) {
        let unit = self
            .units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(self.identity.name())
            .cloned();

        let mut metric =
            MetricValue::new(self.identity.name(), value).with_dimensions(self.identity.dimensions().clone());
        metric.unit = unit;

        self.instrumentation.put_values(vec![metric]);
    }

    fn add(&self, delta: f64) {
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        self.put(f64::from_bits(previous) + delta);
    }
}

impl metrics::GaugeFn for ValueHandle {
    fn increment(&self, value: f64) {
        self.add(value)
    }

    fn decrement(&self, value: f64) {
        self.add(-value)
    }

    fn set(&self, value: f64) {
        self.last.store(value.to_bits(), Ordering::Release);
        self.put(value)
    }
}

impl metrics::HistogramFn for ValueHandle {
    fn record(&self, value: f64) {
        self.put(value)
    }
}

/// [metrics::Recorder] backed by an [Instrumentation]
///
/// Installed globally by [Builder::init](super::Builder::init), or obtained from
/// [Instrumentation::recorder].
///
/// Counters only touch the counter store. Every gauge update and histogram record is a synchronous
/// [Instrumentation::put_values] on the calling thread, so with a network client such as
/// `CloudWatchSubmitter` each one waits for a `PutMetricData` round trip. Keep gauges and
/// histograms off latency sensitive paths, or count events with counters instead.
pub struct Recorder {
    instrumentation: Instrumentation,
    units: Units,
}

impl From<Instrumentation> for Recorder {
    fn from(instrumentation: Instrumentation) -> Self {
        Self {
            instrumentation,
            units: Default::default(),
        }
    }
}

impl Recorder {
    /// update the unit for a metric name, disregard what metric type it is
    fn update_unit(&self, key: metrics::KeyName, unit: Option<metrics::Unit>) {
        let mut units = self.units.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(unit) = unit {
            units.insert(key.as_str().to_owned(), unit);
        } else {
            units.remove(key.as_str());
        }
    }

    fn identity(key: &metrics::Key) -> Option<MetricIdentity> {
        match MetricIdentity::new(key.name(), key.labels().map(|label| (label.key(), label.value()))) {
            Ok(identity) => Some(identity),
            Err(e) => {
                error!("Unable to register {key}: {e}");
                None
            }
        }
    }
}

impl metrics::Recorder for Recorder {
    fn describe_counter(&self, _key: metrics::KeyName, _unit: Option<metrics::Unit>, _description: SharedString) {
        // meters are always reported as Count/Second
    }

    fn describe_gauge(&self, key: metrics::KeyName, unit: Option<metrics::Unit>, _description: SharedString) {
        self.update_unit(key, unit)
    }

    fn describe_histogram(&self, key: metrics::KeyName, unit: Option<metrics::Unit>, _description: SharedString) {
        self.update_unit(key, unit)
    }

    fn register_counter(&self, key: &metrics::Key, _metadata: &metrics::Metadata<'_>) -> metrics::Counter {
        match Self::identity(key) {
            Some(identity) => metrics::Counter::from_arc(Arc::new(MeterHandle {
                identity,
                instrumentation: self.instrumentation.clone(),
            })),
            None => metrics::Counter::noop(),
        }
    }

    fn register_gauge(&self, key: &metrics::Key, _metadata: &metrics::Metadata<'_>) -> metrics::Gauge {
        match Self::identity(key) {
            Some(identity) => metrics::Gauge::from_arc(Arc::new(ValueHandle::new(identity, self))),
            None => metrics::Gauge::noop(),
        }
    }

    fn register_histogram(&self, key: &metrics::Key, _metadata: &metrics::Metadata<'_>) -> metrics::Histogram {
        match Self::identity(key) {
            Some(identity) => metrics::Histogram::from_arc(Arc::new(ValueHandle::new(identity, self))),
            None => metrics::Histogram::noop(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::test::{instrumentation, RecordingClient};
    use std::time::Duration;

    #[test]
    fn counters_become_meters() {
        let client = RecordingClient::default();
        let (instrumentation, clock) = instrumentation(&client);
        let recorder = instrumentation.recorder();

        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("bps", "is_prime" => "yes").increment(1);
            metrics::counter!("bps", "is_prime" => "no").increment(3);
        });
        assert!(client.calls().is_empty());

        clock.advance(Duration::from_secs(2));
        instrumentation.flush_meters();

        let data = client.data();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].metric_name, "bps");
        assert_eq!(data[0].value, 1.5);
        assert_eq!(data[0].unit_str(), "Count/Second");
        assert_eq!(data[1].value, 0.5);
    }

    #[test]
    fn only_values_reach_the_client_on_the_calling_thread() {
        let client = RecordingClient::default();
        let (instrumentation, _) = instrumentation(&client);
        let recorder = instrumentation.recorder();

        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("requests").increment(1);
            assert!(client.calls().is_empty());

            metrics::histogram!("runtime").record(4.0);
            assert_eq!(client.calls().len(), 1);
        });
    }

    #[test]
    fn gauges_and_histograms_put_values() {
        let client = RecordingClient::default();
        let (instrumentation, _) = instrumentation(&client);
        let recorder = instrumentation.recorder();

        metrics::with_local_recorder(&recorder, || {
            metrics::describe_histogram!("runtime", metrics::Unit::Milliseconds, "");
            metrics::histogram!("runtime", "api" => "a_function").record(4.0);

            let gauge = metrics::gauge!("thing");
            gauge.set(3.0);
            gauge.increment(1.5);
            gauge.decrement(0.5);
        });

        let data = client.data();
        let values: Vec<(&str, f64, &str)> =
            data.iter().map(|d| (d.metric_name.as_str(), d.value, d.unit_str())).collect();
        assert_eq!(
            values,
            [
                ("runtime", 4.0, "Milliseconds"),
                ("thing", 3.0, "None"),
                ("thing", 4.5, "None"),
                ("thing", 4.0, "None"),
            ]
        );
        assert_eq!(data[0].dimensions.as_ref().map(Vec::len), Some(1));
        assert_eq!(data[1].dimensions, None);
    }
}
