//! [Submit] implementation calling CloudWatch `PutMetricData` through rusoto
//!
//! *this module requires the `cloudwatch` feature flag*

use super::{
    datum::MetricDatum,
    emitter::{ClientConfig, Submit},
    Error,
};
use rusoto_cloudwatch::{CloudWatch, CloudWatchClient, Dimension, PutMetricDataInput};
use rusoto_core::{credential::DefaultCredentialsProvider, HttpClient, Region};
use std::str::FromStr;
use std::sync::mpsc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Runtime;

/// Submits each batch with one `PutMetricData` call
///
/// Requests run on a private single worker runtime and the calling thread waits for the answer,
/// so [Submit::submit] may be called from plain threads and from inside another runtime alike.
/// Each call is bounded by the connect timeout plus the read timeout. rusoto never retries, which
/// matches the `max_attempts: 0` of [ClientConfig].
pub struct CloudWatchSubmitter {
    client: CloudWatchClient,
    timeout: Duration,
    runtime: Option<Runtime>,
}

impl CloudWatchSubmitter {
    /// Client for the region in `config`, using the default AWS credential chain
    ///
    /// Meant for [Builder::try_client_builder](crate::Builder::try_client_builder).
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        let region = Region::from_str(&config.region)
            .map_err(|e| Error::InvalidConfiguration(format!("region {:?}: {e}", config.region)))?;
        let dispatcher = HttpClient::new().map_err(|e| Error::Submission(e.to_string()))?;
        let credentials = DefaultCredentialsProvider::new().map_err(|e| Error::Submission(e.to_string()))?;

        Self::with_client(CloudWatchClient::new_with(dispatcher, credentials, region), config)
    }

    /// Wrap an already built client, only the timeouts of `config` are used
    pub fn with_client(client: CloudWatchClient, config: &ClientConfig) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("cloudwatch-submit")
            .enable_all()
            .build()
            .map_err(|e| Error::Submission(format!("unable to start the submission runtime: {e}")))?;

        Ok(Self {
            client,
            timeout: config.connect_timeout + config.read_timeout,
            runtime: Some(runtime),
        })
    }
}

impl Drop for CloudWatchSubmitter {
    fn drop(&mut self) {
        // Blocking shutdown panics when the last facade clone is dropped inside async code
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl Submit for CloudWatchSubmitter {
    fn submit(&self, namespace: &str, data: &[MetricDatum]) -> Result<(), Error> {
        let Some(runtime) = &self.runtime else {
            return Err(Error::Submission("client is shut down".to_owned()));
        };

        let input = PutMetricDataInput {
            namespace: namespace.to_owned(),
            metric_data: data.iter().map(to_cloudwatch).collect(),
        };
        let client = self.client.clone();
        let timeout = self.timeout;
        let (reply, answer) = mpsc::sync_channel(1);

        runtime.spawn(async move {
            let result = match tokio::time::timeout(timeout, client.put_metric_data(input)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Error::Submission(e.to_string())),
                Err(_) => Err(Error::Submission(format!("no answer within {timeout:?}"))),
            };
            let _ = reply.send(result);
        });

        answer
            .recv()
            .map_err(|_| Error::Submission("request task ended without an answer".to_owned()))?
    }
}

fn to_cloudwatch(datum: &MetricDatum) -> rusoto_cloudwatch::MetricDatum {
    rusoto_cloudwatch::MetricDatum {
        metric_name: datum.metric_name.clone(),
        value: Some(datum.value),
        unit: Some(datum.unit_str().to_owned()),
        timestamp: Some(timestamp_string(datum.timestamp)),
        dimensions: datum.dimensions.as_ref().map(|dimensions| {
            dimensions
                .iter()
                .map(|dimension| Dimension {
                    name: dimension.name.clone(),
                    value: dimension.value.clone(),
                })
                .collect()
        }),
        ..Default::default()
    }
}

fn timestamp_string(timestamp: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(timestamp).to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::MetricValue;
    use crate::test::start_time;
    use rusoto_core::signature::SignedRequest;
    use rusoto_mock::{MockCredentialsProvider, MockRequestDispatcher};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    fn config() -> ClientConfig {
        ClientConfig {
            region: "us-west-2".into(),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
            max_attempts: 0,
        }
    }

    fn submitter(dispatcher: MockRequestDispatcher) -> CloudWatchSubmitter {
        let client = CloudWatchClient::new_with(dispatcher, MockCredentialsProvider, Region::UsWest2);
        CloudWatchSubmitter::with_client(client, &config()).unwrap()
    }

    #[test]
    fn datum_fields() {
        let datum = MetricValue::new("bps", 0.5)
            .with_unit(metrics::Unit::CountPerSecond)
            .with_dimensions([("is_prime", "yes")])
            .at(start_time() + Duration::from_millis(250));

        let converted = to_cloudwatch(&datum);
        assert_eq!(converted.metric_name, "bps");
        assert_eq!(converted.value, Some(0.5));
        assert_eq!(converted.unit.as_deref(), Some("Count/Second"));
        assert_eq!(converted.timestamp.as_deref(), Some("1984-08-06T00:00:00.250Z"));
        assert_eq!(
            converted.dimensions,
            Some(vec![Dimension {
                name: "is_prime".into(),
                value: "yes".into()
            }])
        );

        let plain = to_cloudwatch(&MetricValue::new("fizz", 6).at(start_time()));
        assert_eq!(plain.unit.as_deref(), Some("None"));
        assert_eq!(plain.dimensions, None);
    }

    #[test]
    fn submits_one_put_metric_data_call() {
        let seen: Arc<Mutex<BTreeMap<String, Option<String>>>> = Default::default();
        let captured = seen.clone();
        let dispatcher = MockRequestDispatcher::default().with_request_checker(move |request: &SignedRequest| {
            *captured.lock().unwrap() = request.params.clone();
        });

        let data = [MetricValue::new("fizz", 6).at(start_time())];
        submitter(dispatcher).submit("FizzBuzzAsAService", &data).unwrap();

        let params = seen.lock().unwrap().clone();
        let param = |name: &str| params.get(name).cloned().flatten();
        assert_eq!(param("Action").as_deref(), Some("PutMetricData"));
        assert_eq!(param("Namespace").as_deref(), Some("FizzBuzzAsAService"));
        assert_eq!(param("MetricData.member.1.MetricName").as_deref(), Some("fizz"));
        assert_eq!(param("MetricData.member.1.Unit").as_deref(), Some("None"));
    }

    #[test]
    fn failed_call_is_a_submission_error() {
        let data = [MetricValue::new("fizz", 6).at(start_time())];
        let result = submitter(MockRequestDispatcher::with_status(500)).submit("ns", &data);

        assert!(matches!(result, Err(Error::Submission(_))));
    }

    #[test]
    fn unknown_region_is_rejected() {
        let config = ClientConfig {
            region: "moon-east-1".into(),
            ..config()
        };
        assert!(matches!(
            CloudWatchSubmitter::new(&config),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn usable_and_droppable_inside_a_runtime() {
        let data = [MetricValue::new("fizz", 6).at(start_time())];
        let submitter = submitter(MockRequestDispatcher::default());

        assert!(submitter.submit("ns", &data).is_ok());
        drop(submitter);
    }
}
