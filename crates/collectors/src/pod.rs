//! Pod families.

use k8s_openapi::api::core::v1::{ContainerStatus, Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use kubestate_core::{
    status::{condition_metrics, enum_metrics, one_hot},
    DefaultLabels, FamilyGenerator, LabelVec, Metric,
};
use smallvec::smallvec;

pub const KIND: &str = "pod";

pub const CONTAINER_WAITING_REASONS: &[&str] =
    &["ContainerCreating", "CrashLoopBackOff", "CreateContainerConfigError", "ErrImagePull", "ImagePullBackOff"];

pub const CONTAINER_TERMINATED_REASONS: &[&str] = &["OOMKilled", "Completed", "Error", "ContainerCannotRun"];

/// Status reason set by the node controller on pods of an unreachable node.
pub const NODE_UNREACHABLE_POD_REASON: &str = "NodeLost";

const NONE: &str = "<none>";

fn identity(p: &Pod) -> LabelVec {
    smallvec![p.namespace().unwrap_or_default(), p.name_any()]
}

pub fn default_labels() -> DefaultLabels<Pod> {
    DefaultLabels::new(&["namespace", "pod"], identity)
}

pub fn generators() -> Vec<FamilyGenerator<Pod>> {
    vec![
        FamilyGenerator::gauge("kube_pod_info", "Information about pod.", info),
        FamilyGenerator::gauge("kube_pod_owner", "Information about the Pod's owner.", owner),
        FamilyGenerator::gauge("kube_pod_status_phase", "The pods current phase.", status_phase),
        FamilyGenerator::gauge(
            "kube_pod_status_ready",
            "Describes whether the pod is ready to serve requests.",
            |p: &Pod| condition(p, "Ready"),
        ),
        FamilyGenerator::gauge(
            "kube_pod_status_scheduled",
            "Describes the status of the scheduling process for the pod.",
            |p: &Pod| condition(p, "PodScheduled"),
        ),
        FamilyGenerator::gauge(
            "kube_pod_container_status_waiting_reason",
            "Describes the reason the container is currently in waiting state.",
            |p: &Pod| container_reasons(p, CONTAINER_WAITING_REASONS, waiting_reason),
        ),
        FamilyGenerator::gauge(
            "kube_pod_container_status_terminated_reason",
            "Describes the reason the container is currently in terminated state.",
            |p: &Pod| container_reasons(p, CONTAINER_TERMINATED_REASONS, terminated_reason),
        ),
        FamilyGenerator::gauge(
            "kube_pod_container_status_last_terminated_reason",
            "Describes the last reason the container was in terminated state.",
            |p: &Pod| container_reasons(p, CONTAINER_TERMINATED_REASONS, last_terminated_reason),
        ),
    ]
}

fn info(p: &Pod) -> Vec<Metric> {
    let status = p.status.as_ref();
    let (created_by_kind, created_by_name) = match controller_of(p) {
        Some(o) => (or_none(&o.kind), or_none(&o.name)),
        None => (NONE, NONE),
    };
    vec![Metric::new(1.0)
        .label("host_ip", status.and_then(|s| s.host_ip.clone()).unwrap_or_default())
        .label("pod_ip", status.and_then(|s| s.pod_ip.clone()).unwrap_or_default())
        .label("uid", p.uid().unwrap_or_default())
        .label("node", p.spec.as_ref().and_then(|s| s.node_name.clone()).unwrap_or_default())
        .label("created_by_kind", created_by_kind)
        .label("created_by_name", created_by_name)]
}

fn or_none(s: &str) -> &str {
    if s.is_empty() { NONE } else { s }
}

/// First owner reference flagged as controller.
fn controller_of(p: &Pod) -> Option<&OwnerReference> {
    p.owner_references().iter().find(|o| o.controller == Some(true))
}

fn owner(p: &Pod) -> Vec<Metric> {
    let owners = p.owner_references();
    if owners.is_empty() {
        return vec![owner_sample(NONE, NONE, NONE)];
    }
    owners
        .iter()
        .map(|o| owner_sample(&o.kind, &o.name, if o.controller.unwrap_or(false) { "true" } else { "false" }))
        .collect()
}

fn owner_sample(kind: &str, name: &str, is_controller: &str) -> Metric {
    Metric::new(1.0)
        .label("owner_kind", kind)
        .label("owner_name", name)
        .label("owner_is_controller", is_controller)
}

fn status_phase(p: &Pod) -> Vec<Metric> {
    let Some(status) = p.status.as_ref() else {
        return Vec::new();
    };
    let phase = status.phase.as_deref().unwrap_or_default();
    if phase.is_empty() {
        return Vec::new();
    }
    let node_lost = is_node_lost(p, status);
    enum_metrics(
        "phase",
        &[
            (phase == "Pending", "Pending"),
            (phase == "Succeeded", "Succeeded"),
            (phase == "Failed", "Failed"),
            (phase == "Running" && !node_lost, "Running"),
            (phase == "Unknown" || node_lost, "Unknown"),
        ],
    )
}

/// Pending deletion on a node the controller marked unreachable.
fn is_node_lost(p: &Pod, status: &PodStatus) -> bool {
    p.metadata.deletion_timestamp.is_some() && status.reason.as_deref() == Some(NODE_UNREACHABLE_POD_REASON)
}

fn condition(p: &Pod, condition_type: &str) -> Vec<Metric> {
    p.status
        .iter()
        .flat_map(|s| s.conditions.iter().flatten())
        .filter(|c| c.type_ == condition_type)
        .flat_map(|c| condition_metrics("condition", &c.status))
        .collect()
}

fn container_reasons(p: &Pod, reasons: &[&str], pick: fn(&ContainerStatus) -> Option<&str>) -> Vec<Metric> {
    let statuses = p.status.iter().flat_map(|s| s.container_statuses.iter().flatten());
    let mut out = Vec::new();
    for cs in statuses {
        for (reason, value) in one_hot(reasons, pick(cs)) {
            out.push(Metric::new(value).label("container", cs.name.as_str()).label("reason", reason));
        }
    }
    out
}

fn waiting_reason(cs: &ContainerStatus) -> Option<&str> {
    cs.state.as_ref()?.waiting.as_ref()?.reason.as_deref()
}

fn terminated_reason(cs: &ContainerStatus) -> Option<&str> {
    cs.state.as_ref()?.terminated.as_ref()?.reason.as_deref()
}

fn last_terminated_reason(cs: &ContainerStatus) -> Option<&str> {
    cs.last_state.as_ref()?.terminated.as_ref()?.reason.as_deref()
}
