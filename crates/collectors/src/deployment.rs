//! Deployment families (`apps/v1`).

use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use kube::ResourceExt;
use kubestate_core::{
    labels::kube_labels_to_prometheus_labels, status::bool_float, DefaultLabels, FamilyGenerator, LabelVec, Metric,
};
use smallvec::smallvec;

pub const KIND: &str = "deployment";

fn identity(d: &Deployment) -> LabelVec {
    smallvec![d.namespace().unwrap_or_default(), d.name_any()]
}

pub fn default_labels() -> DefaultLabels<Deployment> {
    DefaultLabels::new(&["namespace", "deployment"], identity)
}

pub fn generators() -> Vec<FamilyGenerator<Deployment>> {
    vec![
        FamilyGenerator::gauge("kube_deployment_created", "Unix creation timestamp", |d: &Deployment| {
            d.creation_timestamp().map(|t| Metric::new(t.0.timestamp() as f64)).into_iter().collect()
        }),
        FamilyGenerator::gauge(
            "kube_deployment_status_replicas",
            "The number of replicas per deployment.",
            status_count(|s| s.replicas.unwrap_or(0).into()),
        ),
        FamilyGenerator::gauge(
            "kube_deployment_status_replicas_available",
            "The number of available replicas per deployment.",
            status_count(|s| s.available_replicas.unwrap_or(0).into()),
        ),
        FamilyGenerator::gauge(
            "kube_deployment_status_replicas_unavailable",
            "The number of unavailable replicas per deployment.",
            status_count(|s| s.unavailable_replicas.unwrap_or(0).into()),
        ),
        FamilyGenerator::gauge(
            "kube_deployment_status_replicas_updated",
            "The number of updated replicas per deployment.",
            status_count(|s| s.updated_replicas.unwrap_or(0).into()),
        ),
        FamilyGenerator::gauge(
            "kube_deployment_status_observed_generation",
            "The generation observed by the deployment controller.",
            status_count(|s| s.observed_generation.unwrap_or(0) as f64),
        ),
        FamilyGenerator::gauge(
            "kube_deployment_spec_replicas",
            "Number of desired pods for a deployment.",
            |d: &Deployment| {
                d.spec.as_ref().and_then(|s| s.replicas).map(|r| Metric::new(r.into())).into_iter().collect()
            },
        ),
        FamilyGenerator::gauge(
            "kube_deployment_spec_paused",
            "Whether the deployment is paused and will not be processed by the deployment controller.",
            |d: &Deployment| {
                d.spec.as_ref().map(|s| Metric::new(bool_float(s.paused.unwrap_or(false)))).into_iter().collect()
            },
        ),
        FamilyGenerator::gauge(
            "kube_deployment_metadata_generation",
            "Sequence number representing a specific generation of the desired state.",
            |d: &Deployment| d.metadata.generation.map(|g| Metric::new(g as f64)).into_iter().collect(),
        ),
        FamilyGenerator::gauge(
            "kube_deployment_labels",
            "Kubernetes labels converted to Prometheus labels.",
            |d: &Deployment| {
                let (keys, values) = kube_labels_to_prometheus_labels(d.labels());
                vec![Metric::with_labels(keys, values, 1.0)]
            },
        ),
    ]
}

/// One sample read from `status`; nothing when the controller has not reported a status yet.
fn status_count(read: fn(&DeploymentStatus) -> f64) -> impl Fn(&Deployment) -> Vec<Metric> + Send + Sync + 'static {
    move |d: &Deployment| d.status.as_ref().map(|s| Metric::new(read(s))).into_iter().collect()
}
