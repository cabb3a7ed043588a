//! # Identity
//!
//! A metric name plus its dimension set, usable as a map key and as a storage field name

use super::Error;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Immutable metric name + dimensions pair
///
/// Dimensions are kept sorted by name, so two identities built from the same pairs in a different
/// order are equal, hash the same and [serialize](MetricIdentity::serialize) to the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricIdentity {
    name: String,
    dimensions: BTreeMap<String, String>,
}

impl MetricIdentity {
    /// Build an identity, `name` must not be empty
    ///
    /// A dimension name given more than once keeps its last value.
    pub fn new<I, K, V>(name: impl Into<String>, dimensions: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidMetricName);
        }

        Ok(Self {
            name,
            dimensions: dimensions.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> &BTreeMap<String, String> {
        &self.dimensions
    }

    /// Canonical form: a JSON array of the name and the sorted `[name, value]` dimension pairs
    ///
    /// `MetricIdentity::new("bps", [("is_prime", "yes")])` serializes to
    /// `["bps",[["is_prime","yes"]]]`.
    pub fn serialize(&self) -> String {
        let pairs = self
            .dimensions
            .iter()
            .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), Value::String(v.clone())]))
            .collect();

        Value::Array(vec![Value::String(self.name.clone()), Value::Array(pairs)]).to_string()
    }

    /// Inverse of [MetricIdentity::serialize]
    pub fn deserialize(s: &str) -> Result<Self, Error> {
        let malformed = |reason: String| Error::MalformedIdentity {
            input: s.to_owned(),
            reason,
        };

        let (name, pairs): (String, Vec<(String, Value)>) =
            serde_json::from_str(s).map_err(|e| malformed(e.to_string()))?;

        if name.is_empty() {
            return Err(malformed("empty metric name".to_owned()));
        }

        let mut dimensions = BTreeMap::new();
        for (k, v) in pairs {
            if dimensions.contains_key(&k) {
                return Err(malformed(format!("duplicate dimension {k:?}")));
            }
            // Other producers may store numbers or booleans as dimension values
            let v = match v {
                Value::String(v) => v,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => return Err(malformed(format!("dimension {k:?} has non-scalar value {other}"))),
            };
            dimensions.insert(k, v);
        }

        Ok(Self { name, dimensions })
    }
}

impl fmt::Display for MetricIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromStr for MetricIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::deserialize(s)
    }
}
