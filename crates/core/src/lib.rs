//! kubestate core types: metric samples, families and the errors shared across crates.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod generator;
pub mod labels;
pub mod status;

pub use generator::{DefaultLabels, FamilyGenerator, GenerateFn};

/// Stable object identifier (`metadata.uid` parsed as UUID bytes).
pub type Uid = [u8; 16];

/// Ordered label keys or values of a single sample.
pub type LabelVec = SmallVec<[String; 8]>;

/// Every exported family name starts with this token.
pub const METRIC_PREFIX: &str = "kube_";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MetricType {
    Gauge,
    Counter,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One labeled sample. Keys and values are positionally paired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub label_keys: LabelVec,
    pub label_values: LabelVec,
    pub value: f64,
}

impl Metric {
    /// Sample without labels.
    pub fn new(value: f64) -> Self {
        Self { label_keys: LabelVec::new(), label_values: LabelVec::new(), value }
    }

    /// Sample from parallel key/value sequences.
    pub fn with_labels<I, J, A, B>(keys: I, values: J, value: f64) -> Self
    where
        I: IntoIterator<Item = A>,
        J: IntoIterator<Item = B>,
        A: Into<String>,
        B: Into<String>,
    {
        let label_keys: LabelVec = keys.into_iter().map(Into::into).collect();
        let label_values: LabelVec = values.into_iter().map(Into::into).collect();
        debug_assert_eq!(label_keys.len(), label_values.len(), "label keys/values must pair up");
        Self { label_keys, label_values, value }
    }

    /// Append one label, builder style.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        debug_assert!(!self.label_keys.contains(&key), "duplicate label key {key}");
        self.label_keys.push(key);
        self.label_values.push(value.into());
        self
    }

    pub fn get_label(&self, key: &str) -> Option<&str> {
        self.label_keys
            .iter()
            .position(|k| k == key)
            .map(|i| self.label_values[i].as_str())
    }

    /// Iterate `(key, value)` pairs in declared order.
    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.label_keys.iter().map(String::as_str).zip(self.label_values.iter().map(String::as_str))
    }
}

/// Named, typed group of samples produced for one scrape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub metric_type: MetricType,
    pub metrics: Vec<Metric>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, help: impl Into<String>, metric_type: MetricType) -> Self {
        Self { name: name.into(), help: help.into(), metric_type, metrics: Vec::new() }
    }

    pub fn is_empty(&self) -> bool { self.metrics.is_empty() }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("metric family {0:?} does not start with `kube_`")]
    MissingPrefix(String),
    #[error("metric family {0:?} registered twice")]
    DuplicateFamily(String),
    #[error("resource kind {0:?} registered twice")]
    DuplicateKind(String),
    #[error("generator {family} failed on {object}: {reason}")]
    GeneratorFailed { family: String, object: String, reason: String },
}

pub mod prelude {
    pub use super::{
        CoreError, DefaultLabels, FamilyGenerator, GenerateFn, LabelVec, Metric, MetricFamily, MetricType, Uid,
        METRIC_PREFIX,
    };
    pub use super::status::bool_float;
}
