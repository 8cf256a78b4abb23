//! Family generators and the default-label wrapper.
//!
//! A generator is a plain value: name, type, help and a pure `&K -> Vec<Metric>` function.
//! Per-kind tables are `Vec<FamilyGenerator<K>>` built once at startup.

use std::sync::Arc;

use crate::{LabelVec, Metric, MetricType};

/// Mapping function shared by every generator of a kind.
pub type GenerateFn<K> = Arc<dyn Fn(&K) -> Vec<Metric> + Send + Sync>;

pub struct FamilyGenerator<K> {
    pub name: String,
    pub help: String,
    pub metric_type: MetricType,
    generate: GenerateFn<K>,
}

impl<K> Clone for FamilyGenerator<K> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            help: self.help.clone(),
            metric_type: self.metric_type,
            generate: Arc::clone(&self.generate),
        }
    }
}

impl<K> std::fmt::Debug for FamilyGenerator<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FamilyGenerator")
            .field("name", &self.name)
            .field("metric_type", &self.metric_type)
            .finish_non_exhaustive()
    }
}

impl<K: 'static> FamilyGenerator<K> {
    pub fn new<F>(name: impl Into<String>, help: impl Into<String>, metric_type: MetricType, f: F) -> Self
    where
        F: Fn(&K) -> Vec<Metric> + Send + Sync + 'static,
    {
        Self { name: name.into(), help: help.into(), metric_type, generate: Arc::new(f) }
    }

    pub fn gauge<F>(name: impl Into<String>, help: impl Into<String>, f: F) -> Self
    where
        F: Fn(&K) -> Vec<Metric> + Send + Sync + 'static,
    {
        Self::new(name, help, MetricType::Gauge, f)
    }

    /// Run the mapping for one object.
    pub fn generate(&self, obj: &K) -> Vec<Metric> {
        (self.generate)(obj)
    }

    /// Same generator with `defaults` prepended to every sample it emits.
    pub fn with_default_labels(self, defaults: &DefaultLabels<K>) -> Self {
        let generate = defaults.wrap(self.generate);
        Self { generate, ..self }
    }
}

/// Identity labels prepended to every sample of a resource kind.
pub struct DefaultLabels<K> {
    keys: &'static [&'static str],
    values: fn(&K) -> LabelVec,
}

impl<K> Clone for DefaultLabels<K> {
    fn clone(&self) -> Self { *self }
}

impl<K> Copy for DefaultLabels<K> {}

impl<K> std::fmt::Debug for DefaultLabels<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultLabels").field("keys", &self.keys).finish_non_exhaustive()
    }
}

impl<K: 'static> DefaultLabels<K> {
    /// `values` must return exactly one value per key, in the same order.
    pub fn new(keys: &'static [&'static str], values: fn(&K) -> LabelVec) -> Self {
        Self { keys, values }
    }

    pub fn keys(&self) -> &'static [&'static str] { self.keys }

    pub fn values(&self, obj: &K) -> LabelVec {
        let values = (self.values)(obj);
        debug_assert_eq!(values.len(), self.keys.len(), "default label values must match keys");
        values
    }

    /// Prepend the identity labels of `obj` to each sample. Empty input stays empty.
    pub fn apply(&self, obj: &K, mut metrics: Vec<Metric>) -> Vec<Metric> {
        if metrics.is_empty() {
            return metrics;
        }
        let values = self.values(obj);
        for m in metrics.iter_mut() {
            let keys: LabelVec = self
                .keys
                .iter()
                .map(|k| (*k).to_string())
                .chain(m.label_keys.drain(..))
                .collect();
            let vals: LabelVec = values.iter().cloned().chain(m.label_values.drain(..)).collect();
            m.label_keys = keys;
            m.label_values = vals;
        }
        metrics
    }

    /// Wrap a mapping so its output carries the identity labels.
    pub fn wrap(&self, f: GenerateFn<K>) -> GenerateFn<K> {
        let defaults = *self;
        Arc::new(move |obj: &K| defaults.apply(obj, f(obj)))
    }
}
