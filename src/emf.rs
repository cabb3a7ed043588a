//! # EMF
//!
//! [Submit] implementation writing CloudWatch Embedded Metrics documents via serde_json
//!
//! <https://docs.aws.amazon.com/AmazonCloudWatch/latest/monitoring/CloudWatch_Embedded_Metric_Format_Specification.html>

use super::{clock, datum::MetricDatum, emitter::Submit, Error};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use tracing::warn;

const AWS_KEY: &str = "_aws";

#[derive(Serialize)]
pub struct EmbeddedMetrics<'a> {
    #[serde(rename = "_aws")]
    pub aws: EmbeddedMetricsAws<'a>,
    #[serde(flatten)]
    pub dimensions: BTreeMap<&'a str, &'a str>,
    #[serde(flatten)]
    pub values: BTreeMap<&'a str, f64>,
}

#[derive(Serialize)]
pub struct EmbeddedMetricsAws<'a> {
    #[serde(rename = "Timestamp")]
    pub timestamp: u64,
    // This crate never uses more than one namespace in a metrics document
    #[serde(rename = "CloudWatchMetrics")]
    pub cloudwatch_metrics: [EmbeddedNamespace<'a>; 1],
}

#[derive(Serialize)]
pub struct EmbeddedNamespace<'a> {
    #[serde(rename = "Namespace")]
    pub namespace: &'a str,
    // Each data point carries a single dimension set with all of its dimensions
    #[serde(rename = "Dimensions")]
    pub dimensions: [Vec<&'a str>; 1],
    #[serde(rename = "Metrics")]
    pub metrics: Vec<EmbeddedMetric<'a>>,
}

#[derive(Serialize)]
pub struct EmbeddedMetric<'a> {
    #[serde(rename = "Name")]
    pub name: &'a str,
    #[serde(rename = "Unit")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'a str>,
}

impl<'a> EmbeddedMetrics<'a> {
    /// Dimensions and the value share the top level of the document, so a dimension named like the
    /// metric or `_aws` is dropped
    fn from_datum(namespace: &'a str, datum: &'a MetricDatum) -> Result<Self, Error> {
        if datum.metric_name == AWS_KEY {
            return Err(Error::Submission(format!("metric name {AWS_KEY:?} is reserved in EMF documents")));
        }

        let mut emf = EmbeddedMetrics {
            aws: EmbeddedMetricsAws {
                timestamp: clock::epoch_millis(datum.timestamp),
                cloudwatch_metrics: [EmbeddedNamespace {
                    namespace,
                    dimensions: [Vec::new()],
                    metrics: vec![EmbeddedMetric {
                        name: &datum.metric_name,
                        unit: datum.unit.as_ref().map(unit_to_str),
                    }],
                }],
            },
            dimensions: BTreeMap::new(),
            values: BTreeMap::new(),
        };

        for dimension in datum.dimensions.iter().flatten() {
            if dimension.name == datum.metric_name || dimension.name == AWS_KEY {
                warn!("Dropping dimension {:?} of {}, the key is taken", dimension.name, datum.metric_name);
                continue;
            }
            emf.aws.cloudwatch_metrics[0].dimensions[0].push(&dimension.name);
            emf.dimensions.insert(&dimension.name, &dimension.value);
        }
        emf.values.insert(&datum.metric_name, datum.value);

        Ok(emf)
    }
}

/// Writes one EMF JSON line per data point
///
/// Inside Lambda or next to the CloudWatch agent, stdout is enough to get the data points into
/// CloudWatch without an API call, which makes this the default client.
pub struct EmfSubmitter<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> EmfSubmitter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EmfSubmitter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> Submit for EmfSubmitter<W> {
    fn submit(&self, namespace: &str, data: &[MetricDatum]) -> Result<(), Error> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rejected = None;

        for datum in data {
            let emf = match EmbeddedMetrics::from_datum(namespace, datum) {
                Ok(emf) => emf,
                Err(e) => {
                    warn!("Skipping data point: {e}");
                    rejected = Some(e);
                    continue;
                }
            };
            serde_json::to_writer(&mut *writer, &emf).map_err(|e| Error::Submission(e.to_string()))?;
            writeln!(writer).map_err(|e| Error::Submission(e.to_string()))?;
        }

        writer.flush().map_err(|e| Error::Submission(e.to_string()))?;
        rejected.map_or(Ok(()), Err)
    }
}

/// Convert a metrics::Unit into the cloudwatch string
///
/// <https://docs.aws.amazon.com/AmazonCloudWatch/latest/APIReference/API_MetricDatum.html>
pub fn unit_to_str(unit: &metrics::Unit) -> &'static str {
    match unit {
        metrics::Unit::Count => "Count",
        metrics::Unit::Percent => "Percent",
        metrics::Unit::Seconds => "Seconds",
        metrics::Unit::Milliseconds => "Milliseconds",
        metrics::Unit::Microseconds => "Microseconds",
        metrics::Unit::Nanoseconds => "Nanoseconds",
        metrics::Unit::Tebibytes => "Terabytes",
        metrics::Unit::Gibibytes => "Gigabytes",
        metrics::Unit::Mebibytes => "Megabytes",
        metrics::Unit::Kibibytes => "Kilobytes",
        metrics::Unit::Bytes => "Bytes",
        metrics::Unit::TerabitsPerSecond => "Terabits/Second",
        metrics::Unit::GigabitsPerSecond => "Gigabits/Second",
        metrics::Unit::MegabitsPerSecond => "Megabits/Second",
        metrics::Unit::KilobitsPerSecond => "Kilobits/Second",
        metrics::Unit::BitsPerSecond => "Bits/Second",
        metrics::Unit::CountPerSecond => "Count/Second",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::MetricValue;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn one_line_per_datum() {
        let timestamp = UNIX_EPOCH + Duration::from_millis(1687394207903);
        let data = [
            MetricValue::new("bps", 0.5)
                .with_unit(metrics::Unit::CountPerSecond)
                .with_dimensions([("Port", "7779"), ("Address", "10.172.207.225")])
                .at(timestamp),
            MetricValue::new("fizz", 6).at(timestamp),
        ];

        let submitter = EmfSubmitter::new(Vec::new());
        submitter.submit("GameServerMetrics", &data).unwrap();

        let output = String::from_utf8(submitter.into_inner()).unwrap();
        assert_eq!(
            output,
            r#"{"_aws":{"Timestamp":1687394207903,"CloudWatchMetrics":[{"Namespace":"GameServerMetrics","Dimensions":[["Address","Port"]],"Metrics":[{"Name":"bps","Unit":"Count/Second"}]}]},"Address":"10.172.207.225","Port":"7779","bps":0.5}
{"_aws":{"Timestamp":1687394207903,"CloudWatchMetrics":[{"Namespace":"GameServerMetrics","Dimensions":[[]],"Metrics":[{"Name":"fizz"}]}]},"fizz":6.0}
"#
        );
    }

    #[test]
    fn write_failure_is_a_submission_error() {
        struct Broken;

        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("pipe closed"))
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let data = [MetricValue::new("fizz", 6).at(UNIX_EPOCH)];
        let result = EmfSubmitter::new(Broken).submit("ns", &data);

        assert!(matches!(result, Err(Error::Submission(_))));
    }

    #[test]
    fn colliding_dimensions_are_dropped() {
        let data = [MetricValue::new("bps", 0.5)
            .with_dimensions([("bps", "x"), ("_aws", "y"), ("Port", "7779")])
            .at(UNIX_EPOCH)];

        let submitter = EmfSubmitter::new(Vec::new());
        submitter.submit("ns", &data).unwrap();

        let output = String::from_utf8(submitter.into_inner()).unwrap();
        assert_eq!(
            output,
            r#"{"_aws":{"Timestamp":0,"CloudWatchMetrics":[{"Namespace":"ns","Dimensions":[["Port"]],"Metrics":[{"Name":"bps"}]}]},"Port":"7779","bps":0.5}
"#
        );
    }

    #[test]
    fn reserved_metric_name_is_rejected() {
        let data = [
            MetricValue::new("_aws", 1).at(UNIX_EPOCH),
            MetricValue::new("fizz", 6).at(UNIX_EPOCH),
        ];

        let submitter = EmfSubmitter::new(Vec::new());
        assert!(matches!(submitter.submit("ns", &data), Err(Error::Submission(_))));

        let output = String::from_utf8(submitter.into_inner()).unwrap();
        assert_eq!(output.lines().count(), 1);
        assert!(output.ends_with(r#""fizz":6.0}
"#));
    }

    #[test]
    fn unit_names() {
        assert_eq!(unit_to_str(&metrics::Unit::CountPerSecond), "Count/Second");
        assert_eq!(unit_to_str(&metrics::Unit::Kibibytes), "Kilobytes");
        assert_eq!(unit_to_str(&metrics::Unit::Gibibytes), "Gigabytes");
    }
}
