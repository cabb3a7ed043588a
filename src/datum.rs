//! # Datum
//!
//! Metric values as callers hand them in, and the timestamped data points handed to a [Submit](crate::Submit)

use super::{clock, emf, identity::MetricIdentity};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// A value to put, before it is stamped with the current time
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    pub name: String,
    pub value: f64,
    pub unit: Option<metrics::Unit>,
    pub dimensions: Option<BTreeMap<String, String>>,
}

impl MetricValue {
    pub fn new(name: impl Into<String>, value: impl Into<f64>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            unit: None,
            dimensions: None,
        }
    }

    pub fn with_unit(self, unit: metrics::Unit) -> Self {
        Self {
            unit: Some(unit),
            ..self
        }
    }

    /// Attach dimensions, an empty set is treated as no dimensions
    pub fn with_dimensions<I, K, V>(self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let dimensions: BTreeMap<String, String> =
            dimensions.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self {
            dimensions: (!dimensions.is_empty()).then_some(dimensions),
            ..self
        }
    }

    /// The `Count/Second` rate value for a popped meter
    pub(crate) fn rate(identity: &MetricIdentity, rate: f64) -> Self {
        Self::new(identity.name(), rate)
            .with_unit(metrics::Unit::CountPerSecond)
            .with_dimensions(identity.dimensions().clone())
    }

    pub(crate) fn at(self, timestamp: SystemTime) -> MetricDatum {
        MetricDatum {
            metric_name: self.name,
            value: self.value,
            unit: self.unit,
            timestamp,
            dimensions: self.dimensions.map(|dimensions| {
                dimensions
                    .into_iter()
                    .map(|(name, value)| Dimension { name, value })
                    .collect()
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dimension {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: String,
}

/// One data point as submitted to CloudWatch
///
/// Serializes with the `PutMetricData` field names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDatum {
    #[serde(rename = "MetricName")]
    pub metric_name: String,
    #[serde(rename = "Value")]
    pub value: f64,
    #[serde(rename = "Unit", serialize_with = "serialize_unit")]
    pub unit: Option<metrics::Unit>,
    #[serde(rename = "Timestamp", serialize_with = "serialize_timestamp")]
    pub timestamp: SystemTime,
    #[serde(rename = "Dimensions")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Vec<Dimension>>,
}

impl MetricDatum {
    /// CloudWatch unit name, `"None"` when no unit was given
    pub fn unit_str(&self) -> &'static str {
        self.unit.as_ref().map(emf::unit_to_str).unwrap_or("None")
    }
}

fn serialize_unit<S: Serializer>(unit: &Option<metrics::Unit>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(unit.as_ref().map(emf::unit_to_str).unwrap_or("None"))
}

fn serialize_timestamp<S: Serializer>(timestamp: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(clock::epoch_millis(*timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn plain_value_has_no_dimensions() {
        let datum = MetricValue::new("fizz", 6).at(UNIX_EPOCH + Duration::from_millis(1500));

        assert_eq!(datum.unit_str(), "None");
        assert_eq!(
            serde_json::to_value(&datum).unwrap(),
            json!({"MetricName": "fizz", "Value": 6.0, "Unit": "None", "Timestamp": 1500})
        );
    }

    #[test]
    fn dimensions_are_sorted_by_name() {
        let datum = MetricValue::new("fizz", 6)
            .with_dimensions([("why", "divisible by two"), ("is_prime", "no")])
            .at(UNIX_EPOCH);

        assert_eq!(
            serde_json::to_value(&datum).unwrap()["Dimensions"],
            json!([
                {"Name": "is_prime", "Value": "no"},
                {"Name": "why", "Value": "divisible by two"},
            ])
        );
    }

    #[test]
    fn empty_dimensions_are_omitted() {
        let value = MetricValue::new("fizz", 1).with_dimensions(Vec::<(String, String)>::new());
        assert_eq!(value.dimensions, None);
    }

    #[test]
    fn rate_from_identity() {
        let identity = MetricIdentity::new("bps", [("is_prime", "yes")]).unwrap();
        let datum = MetricValue::rate(&identity, 0.5).at(UNIX_EPOCH);

        assert_eq!(datum.metric_name, "bps");
        assert_eq!(datum.value, 0.5);
        assert_eq!(datum.unit_str(), "Count/Second");
        assert_eq!(
            datum.dimensions,
            Some(vec![Dimension {
                name: "is_prime".into(),
                value: "yes".into()
            }])
        );
    }
}
