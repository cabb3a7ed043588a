//! # Config
//!
//! Deployment settings, usually read from the environment

use super::{emitter::ClientConfig, Error};
use std::time::Duration;

/// Env var: CloudWatch namespace for every metric (required)
pub const ENV_METRIC_NAMESPACE: &str = "AWS_METRIC_NAMESPACE";
/// Env var: region of the CloudWatch endpoint (required)
pub const ENV_LOGGING_REGION: &str = "AWS_LOGGING_REGION";
/// Env var: connect timeout in seconds, fractions allowed
pub const ENV_CONNECT_TIMEOUT: &str = "METRICS_CONNECT_TIMEOUT";
/// Env var: read timeout in seconds, fractions allowed
pub const ENV_READ_TIMEOUT: &str = "METRICS_READ_TIMEOUT";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub namespace: String,
    pub region: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Config {
    pub fn new(namespace: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            region: region.into(),
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| Error::InvalidConfiguration(format!("{name} missing")))
        };
        let timeout = |name: &str| match lookup(name) {
            Some(raw) => parse_timeout(name, &raw),
            None => Ok(DEFAULT_TIMEOUT),
        };

        let config = Self {
            namespace: required(ENV_METRIC_NAMESPACE)?,
            region: required(ENV_LOGGING_REGION)?,
            connect_timeout: timeout(ENV_CONNECT_TIMEOUT)?,
            read_timeout: timeout(ENV_READ_TIMEOUT)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.namespace.is_empty() {
            return Err(Error::InvalidConfiguration("cloudwatch_namespace missing".to_owned()));
        }
        if self.region.is_empty() {
            return Err(Error::InvalidConfiguration("region missing".to_owned()));
        }
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(Error::InvalidConfiguration("timeouts must be positive".to_owned()));
        }
        Ok(())
    }

    /// Settings for the submission client, which never retries
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            region: self.region.clone(),
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            max_attempts: 0,
        }
    }
}

fn parse_timeout(name: &str, raw: &str) -> Result<Duration, Error> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|seconds| *seconds > 0.0)
        .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
        .ok_or_else(|| Error::InvalidConfiguration(format!("{name} must be a positive number of seconds, got {raw:?}")))
}
