//! Scheduled flush as an AWS Lambda function backed by Redis
//!
//! *this module requires the `lambda` feature flag*
//!
//! Application processes increment meters into the same Redis through a
//! [SharedStore]<[RedisHashStore]>, and a scheduled rule (e.g. `rate(1 minute)`) invokes this
//! function to pop the period and submit the rates with `PutMetricData` through a
//! [CloudWatchSubmitter].
//!
//! Configuration comes from the environment:
//! * `REDIS_HOST` (required), `REDIS_PORT` (default 6379), `REDIS_DB` (default 0)
//! * everything [Config::from_env] reads
//!
//! # Example
//! ```ignore
//! #[tokio::main]
//! async fn main() -> Result<(), lambda_runtime::Error> {
//!     metrics_cloudwatch_meters::lambda::run().await
//! }
//! ```

use super::{
    builder::Builder,
    clock::SystemClock,
    cloudwatch::CloudWatchSubmitter,
    config::Config,
    instrumentation::{FlushReport, Instrumentation},
    store::{RedisHashStore, SharedStore},
    Error,
};
use lambda_runtime::{service_fn, LambdaEvent};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

pub const ENV_REDIS_HOST: &str = "REDIS_HOST";
pub const ENV_REDIS_PORT: &str = "REDIS_PORT";
pub const ENV_REDIS_DB: &str = "REDIS_DB";

/// Location of the shared counter store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub db: i64,
}

impl RedisSettings {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let host = lookup(ENV_REDIS_HOST)
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::InvalidConfiguration(format!("{ENV_REDIS_HOST} missing")))?;
        let port = match lookup(ENV_REDIS_PORT) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| Error::InvalidConfiguration(format!("{ENV_REDIS_PORT} is not a port: {raw:?}")))?,
            None => 6379,
        };
        let db = match lookup(ENV_REDIS_DB) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| Error::InvalidConfiguration(format!("{ENV_REDIS_DB} is not a number: {raw:?}")))?,
            None => 0,
        };

        Ok(Self { host, port, db })
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// API Gateway style response, the body is always `{"STATUS": "OK"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl Default for FlushResponse {
    fn default() -> Self {
        Self {
            status_code: 200,
            body: r#"{"STATUS": "OK"}"#.to_owned(),
        }
    }
}

/// Flush `instrumentation` and answer the invocation
///
/// Failed batches and store errors are logged, the invocation still succeeds so the scheduler
/// does not retry a partially submitted period.
pub fn flush(instrumentation: &Instrumentation) -> FlushResponse {
    info!("About to flush meters");
    let report: FlushReport = instrumentation.flush_meters();
    if report.is_ok() {
        info!("Flushed {} meters, sending response", report.metrics);
    } else {
        warn!("Flush incomplete: {report:?}");
    }
    FlushResponse::default()
}

fn instrumentation_from_env() -> Result<Instrumentation, Error> {
    let redis = RedisSettings::from_env()?;
    let config = Config::from_env()?;

    let store = RedisHashStore::open(&redis.url(), config.connect_timeout)?;
    Builder::new()
        .with_config(config)
        .storage(SharedStore::new(store, Arc::new(SystemClock)))
        .try_client_builder(CloudWatchSubmitter::new)
        .build()
}

/// Lambda handler, the event payload is ignored
pub async fn flush_handler(_event: LambdaEvent<serde_json::Value>) -> Result<FlushResponse, lambda_runtime::Error> {
    // The Redis connection and the flush both block
    let response = tokio::task::spawn_blocking(|| instrumentation_from_env().map(|instrumentation| flush(&instrumentation)))
        .await??;
    Ok(response)
}

/// Install a compact tracing subscriber honouring `RUST_LOG` and serve [flush_handler]
pub async fn run() -> Result<(), lambda_runtime::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .with_target(false)
        .without_time()
        .compact()
        .try_init()?;

    lambda_runtime::run(service_fn(flush_handler)).await
}
