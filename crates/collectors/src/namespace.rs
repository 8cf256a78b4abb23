//! Namespace families. Cluster scoped; the identity label is the namespace's own name.

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use kubestate_core::{
    labels::{kube_annotations_to_prometheus_annotations, kube_labels_to_prometheus_labels},
    status::enum_metrics,
    DefaultLabels, FamilyGenerator, LabelVec, Metric,
};
use smallvec::smallvec;

pub const KIND: &str = "namespace";

pub const NAMESPACE_PHASES: &[&str] = &["Active", "Terminating"];

fn identity(n: &Namespace) -> LabelVec {
    smallvec![n.name_any()]
}

pub fn default_labels() -> DefaultLabels<Namespace> {
    DefaultLabels::new(&["namespace"], identity)
}

pub fn generators() -> Vec<FamilyGenerator<Namespace>> {
    vec![
        FamilyGenerator::gauge(
            "kube_namespace_labels",
            "Kubernetes labels converted to Prometheus labels.",
            |n: &Namespace| {
                let (keys, values) = kube_labels_to_prometheus_labels(n.labels());
                vec![Metric::with_labels(keys, values, 1.0)]
            },
        ),
        FamilyGenerator::gauge(
            "kube_namespace_annotations",
            "Kubernetes annotations converted to Prometheus labels.",
            |n: &Namespace| {
                let (keys, values) = kube_annotations_to_prometheus_annotations(n.annotations());
                vec![Metric::with_labels(keys, values, 1.0)]
            },
        ),
        FamilyGenerator::gauge("kube_namespace_created", "Unix creation timestamp", |n: &Namespace| {
            n.creation_timestamp().map(|t| Metric::new(t.0.timestamp() as f64)).into_iter().collect()
        }),
        FamilyGenerator::gauge("kube_namespace_status_phase", "kubernetes namespace status phase.", status_phase),
    ]
}

fn status_phase(n: &Namespace) -> Vec<Metric> {
    let Some(phase) = n.status.as_ref().and_then(|s| s.phase.as_deref()).filter(|p| !p.is_empty()) else {
        return Vec::new();
    };
    let cases: Vec<(bool, &str)> = NAMESPACE_PHASES.iter().map(|p| (phase == *p, *p)).collect();
    enum_metrics("phase", &cases)
}
