//! Shared encodings of conditions, phases and reasons as boolean samples.

use crate::Metric;

pub fn bool_float(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

/// Tri-state condition status as reported by the API server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub const ALL: [ConditionStatus; 3] = [ConditionStatus::True, ConditionStatus::False, ConditionStatus::Unknown];

    /// Exact match on `True`/`False`/`Unknown`; anything else is malformed.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "True" => Some(ConditionStatus::True),
            "False" => Some(ConditionStatus::False),
            "Unknown" => Some(ConditionStatus::Unknown),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConditionStatus::True => "true",
            ConditionStatus::False => "false",
            ConditionStatus::Unknown => "unknown",
        }
    }
}

/// Three samples (`true`, `false`, `unknown`) under `label_key`; at most one is 1.0.
pub fn condition_metrics(label_key: &str, raw_status: &str) -> Vec<Metric> {
    let status = ConditionStatus::parse(raw_status);
    ConditionStatus::ALL
        .iter()
        .map(|s| Metric::new(bool_float(status == Some(*s))).label(label_key, s.label()))
        .collect()
}

/// One sample per `(active, label)` case, in the given order.
pub fn enum_metrics(label_key: &str, cases: &[(bool, &str)]) -> Vec<Metric> {
    cases
        .iter()
        .map(|(active, label)| Metric::new(bool_float(*active)).label(label_key, *label))
        .collect()
}

/// One-hot over a closed reason set. A reason outside the set gives all zeros.
pub fn one_hot<'a>(reasons: &'a [&'a str], actual: Option<&'a str>) -> impl Iterator<Item = (&'a str, f64)> + 'a {
    reasons.iter().map(move |r| (*r, bool_float(actual == Some(*r))))
}
