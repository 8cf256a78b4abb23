//! Collector registry: resource kind → {store, wrapped generators}.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use kube::{Resource, ResourceExt};
use kubestate_core::{CoreError, DefaultLabels, FamilyGenerator, MetricFamily, METRIC_PREFIX};
use kubestate_store::ResourceStore;
use tracing::warn;

/// Families generated for one kind during one scrape.
#[derive(Debug, Clone, Default)]
pub struct KindOutput {
    pub kind: String,
    pub families: Vec<MetricFamily>,
    /// Per-object generator failures that were skipped.
    pub failures: Vec<CoreError>,
}

/// One scrapeable resource kind.
pub trait Collector: Send + Sync {
    fn kind(&self) -> &str;

    /// Declared family names, in emission order.
    fn family_names(&self) -> Vec<String>;

    /// Generate every family over the store's current snapshot.
    fn collect(&self) -> KindOutput;
}

/// Store plus generator table for a concrete kind.
pub struct KindCollector<K> {
    store: ResourceStore<K>,
    generators: Vec<FamilyGenerator<K>>,
}

impl<K> KindCollector<K>
where
    K: Resource + Send + Sync + 'static,
{
    /// Wrap every generator with `defaults`. Rejects names without the exporter prefix and duplicates.
    pub fn new(
        store: ResourceStore<K>,
        defaults: DefaultLabels<K>,
        generators: Vec<FamilyGenerator<K>>,
    ) -> Result<Self, CoreError> {
        let mut seen = HashSet::new();
        for g in &generators {
            if !g.name.starts_with(METRIC_PREFIX) {
                return Err(CoreError::MissingPrefix(g.name.clone()));
            }
            if !seen.insert(g.name.clone()) {
                return Err(CoreError::DuplicateFamily(g.name.clone()));
            }
        }
        let generators = generators.into_iter().map(|g| g.with_default_labels(&defaults)).collect();
        Ok(Self { store, generators })
    }

    pub fn store(&self) -> &ResourceStore<K> { &self.store }
}

impl<K> Collector for KindCollector<K>
where
    K: Resource + Send + Sync + 'static,
{
    fn kind(&self) -> &str { self.store.kind() }

    fn family_names(&self) -> Vec<String> {
        self.generators.iter().map(|g| g.name.clone()).collect()
    }

    fn collect(&self) -> KindOutput {
        let kind = self.store.kind().to_string();
        let snap = self.store.current();
        let mut objects: Vec<&Arc<K>> = snap.iter().map(|(_, o)| o).collect();
        objects.sort_by_cached_key(|o| (o.namespace().unwrap_or_default(), o.name_any(), o.uid().unwrap_or_default()));

        let mut out = KindOutput { kind, families: Vec::with_capacity(self.generators.len()), failures: Vec::new() };
        for g in &self.generators {
            let mut family = MetricFamily::new(g.name.clone(), g.help.clone(), g.metric_type);
            for obj in &objects {
                match catch_unwind(AssertUnwindSafe(|| g.generate(obj))) {
                    Ok(samples) => family.metrics.extend(samples),
                    Err(payload) => {
                        let err = CoreError::GeneratorFailed {
                            family: g.name.clone(),
                            object: object_label::<K>(obj),
                            reason: panic_reason(payload.as_ref()),
                        };
                        warn!(kind = %out.kind, error = %err, "generator failed; sample skipped");
                        metrics::counter!(
                            "kubestate_generator_failures_total", 1u64,
                            "kind" => out.kind.clone(), "family" => g.name.clone()
                        );
                        out.failures.push(err);
                    }
                }
            }
            out.families.push(family);
        }
        out
    }
}

fn object_label<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => format!("{}/{}", ns, obj.name_any()),
        None => obj.name_any(),
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// All registered kinds, in registration order. Built once at startup.
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: Vec<Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self { Self::default() }

    /// Register a kind; family names must stay unique across the whole registry.
    pub fn register(&mut self, collector: Arc<dyn Collector>) -> Result<(), CoreError> {
        if self.collectors.iter().any(|c| c.kind() == collector.kind()) {
            return Err(CoreError::DuplicateKind(collector.kind().to_string()));
        }
        let existing: HashSet<String> = self.collectors.iter().flat_map(|c| c.family_names()).collect();
        if let Some(dup) = collector.family_names().into_iter().find(|n| existing.contains(n)) {
            return Err(CoreError::DuplicateFamily(dup));
        }
        self.collectors.push(collector);
        Ok(())
    }

    pub fn collectors(&self) -> &[Arc<dyn Collector>] { &self.collectors }

    pub fn kinds(&self) -> Vec<&str> { self.collectors.iter().map(|c| c.kind()).collect() }

    pub fn len(&self) -> usize { self.collectors.len() }

    pub fn is_empty(&self) -> bool { self.collectors.is_empty() }
}
