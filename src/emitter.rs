//! # Emitter
//!
//! Splits data points into CloudWatch sized batches and hands each one to a [Submit] collaborator

use super::{datum::MetricDatum, Error};
use std::time::Duration;
use tracing::{debug, error};

/// CloudWatch `PutMetricData` accepts at most 20 data points per call
pub const MAX_DATUMS_PER_CALL: usize = 20;

/// The outbound call to the metrics backend
///
/// Implementations should apply the timeouts from the [ClientConfig] they were built with and must
/// not retry on their own.
pub trait Submit: Send + Sync {
    /// Submit up to [MAX_DATUMS_PER_CALL] data points under `namespace`
    fn submit(&self, namespace: &str, data: &[MetricDatum]) -> Result<(), Error>;
}

impl<S: Submit + ?Sized> Submit for Box<S> {
    fn submit(&self, namespace: &str, data: &[MetricDatum]) -> Result<(), Error> {
        (**self).submit(namespace, data)
    }
}

/// Settings handed to the closure set with [Builder::client_builder](crate::Builder::client_builder)
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub region: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Always zero, a stuck flush should fail rather than eat into the next period
    pub max_attempts: u32,
}

/// What to do with the remaining batches once one fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    #[default]
    Continue,
    Abort,
}

/// Outcome of a single [BatchEmitter::emit]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Data points handed to the emitter
    pub datums: usize,
    /// Submission calls attempted
    pub batches: usize,
    pub failed_batches: usize,
}

impl EmitReport {
    pub fn is_ok(&self) -> bool {
        self.failed_batches == 0
    }
}

pub struct BatchEmitter {
    namespace: String,
    client: Box<dyn Submit>,
    batch_size: usize,
    policy: FailurePolicy,
}

impl BatchEmitter {
    pub fn new(namespace: impl Into<String>, client: Box<dyn Submit>) -> Self {
        Self {
            namespace: namespace.into(),
            client,
            batch_size: MAX_DATUMS_PER_CALL,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_policy(self, policy: FailurePolicy) -> Self {
        Self { policy, ..self }
    }

    /// Lower the batch size, values above [MAX_DATUMS_PER_CALL] are capped
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.clamp(1, MAX_DATUMS_PER_CALL),
            ..self
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Submit `data` in order, one call per chunk of at most the batch size
    ///
    /// Failures are logged and counted, never returned.
    pub fn emit(&self, data: &[MetricDatum]) -> EmitReport {
        let mut report = EmitReport {
            datums: data.len(),
            ..Default::default()
        };

        for batch in data.chunks(self.batch_size) {
            report.batches += 1;

            match self.client.submit(&self.namespace, batch) {
                Ok(()) => debug!("Submitted {} data points to {}", batch.len(), self.namespace),
                Err(e) => {
                    report.failed_batches += 1;
                    error!("Failed to submit {} data points to {}: {e}", batch.len(), self.namespace);

                    if self.policy == FailurePolicy::Abort {
                        break;
                    }
                }
            }
        }

        report
    }
}
