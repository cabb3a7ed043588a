//! Counters in, per-second rates out.
//!
//! Application code calls [Instrumentation::increment_meter] on its hot path; that only touches a
//! [CounterStore](store::CounterStore). A scheduled job calls [Instrumentation::flush_meters], which
//! pops the period, turns counts into `Count/Second` rates and submits them to CloudWatch in batches
//! of at most [MAX_DATUMS_PER_CALL].
//!
//! # Example
//! ```
//! let instrumentation = metrics_cloudwatch_meters::Builder::new()
//!     .cloudwatch_namespace("FizzBuzzAsAService")
//!     .region("us-west-2")
//!     .build()
//!     .unwrap();
//!
//! instrumentation.increment_meter("bps", [("is_prime", "yes")]);
//! instrumentation.flush_meters();
//! ```

pub use {
    builder::Builder,
    clock::{Clock, ManualClock, SystemClock},
    config::Config,
    datum::{Dimension, MetricDatum, MetricValue},
    emitter::{BatchEmitter, ClientConfig, EmitReport, FailurePolicy, Submit, MAX_DATUMS_PER_CALL},
    emf::EmfSubmitter,
    identity::MetricIdentity,
    instrumentation::{FlushReport, Instrumentation},
    recorder::Recorder,
};

#[cfg(feature = "cloudwatch")]
pub use cloudwatch::CloudWatchSubmitter;

mod builder;
pub mod clock;
#[cfg(feature = "cloudwatch")]
mod cloudwatch;
pub mod config;
mod datum;
mod emf;
mod emitter;
pub mod flusher;
mod identity;
mod instrumentation;
#[cfg(feature = "lambda")]
pub mod lambda;
mod recorder;
pub mod store;

/// Empty dimension set for [Instrumentation::increment_meter] and [Instrumentation::put_value]
pub const NO_DIMENSIONS: [(&str, &str); 0] = [];

/// Errors surfaced by this crate
///
/// Only [Error::InvalidConfiguration] and [Error::SetRecorder] ever reach callers of the
/// [Instrumentation] facade; everything else is logged and converted into a status value.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed metric identity {input:?}: {reason}")]
    MalformedIdentity { input: String, reason: String },
    #[error("metric name must not be empty")]
    InvalidMetricName,
    #[error("failed to submit metric data: {0}")]
    Submission(String),
    #[error("counter storage failed: {0}")]
    Store(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("a global metrics recorder is already installed")]
    SetRecorder,
}
