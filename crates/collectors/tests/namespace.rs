use k8s_openapi::api::core::v1::Namespace;
use kubestate_collectors::{namespace, ResourceKind};
use kubestate_core::{FamilyGenerator, Metric};
use serde_json::json;

fn family(name: &str) -> FamilyGenerator<Namespace> {
    namespace::generators()
        .into_iter()
        .find(|g| g.name == name)
        .unwrap_or_else(|| panic!("no family {name}"))
        .with_default_labels(&namespace::default_labels())
}

fn ns(v: serde_json::Value) -> Namespace {
    serde_json::from_value(v).expect("namespace fixture")
}

fn phases(ms: &[Metric]) -> Vec<(&str, f64)> {
    ms.iter().map(|m| (m.get_label("phase").unwrap_or_default(), m.value)).collect()
}

#[test]
fn labels_and_annotations_lead_with_namespace() {
    let n = ns(json!({ "metadata": {
        "name": "shop",
        "uid": "4a1b7c3e-0000-4000-8000-0000000000a1",
        "labels": { "team": "payments" },
        "annotations": { "owner.example.com/slack": "#pay" },
    }}));
    let labels = family("kube_namespace_labels").generate(&n);
    assert_eq!(labels[0].label_keys.as_slice(), &["namespace", "label_team"]);
    assert_eq!(labels[0].label_values.as_slice(), &["shop", "payments"]);
    let annotations = family("kube_namespace_annotations").generate(&n);
    assert_eq!(annotations[0].label_keys.as_slice(), &["namespace", "annotation_owner_example_com_slack"]);
    assert_eq!(annotations[0].value, 1.0);
}

#[test]
fn empty_label_map_still_emits_identity_sample() {
    let n = ns(json!({ "metadata": { "name": "bare", "uid": "4a1b7c3e-0000-4000-8000-0000000000a2" } }));
    let ms = family("kube_namespace_labels").generate(&n);
    assert_eq!(ms.len(), 1);
    assert_eq!(ms[0].label_keys.as_slice(), &["namespace"]);
    assert!(family("kube_namespace_created").generate(&n).is_empty());
}

#[test]
fn phase_over_active_and_terminating() {
    let n = ns(json!({ "metadata": { "name": "old" }, "status": { "phase": "Terminating" } }));
    assert_eq!(phases(&family("kube_namespace_status_phase").generate(&n)), vec![("Active", 0.0), ("Terminating", 1.0)]);
    let fresh = ns(json!({ "metadata": { "name": "new" }, "status": {} }));
    assert!(family("kube_namespace_status_phase").generate(&fresh).is_empty());
}

#[test]
fn collector_names_parse() {
    assert_eq!("pods".parse::<ResourceKind>(), Ok(ResourceKind::Pods));
    assert_eq!(" Deployment ".parse::<ResourceKind>(), Ok(ResourceKind::Deployments));
    assert_eq!("namespaces".parse::<ResourceKind>().map(|k| k.kind()), Ok("namespace"));
    assert!("nodes".parse::<ResourceKind>().is_err());
    let names: Vec<_> = ResourceKind::ALL.iter().map(ResourceKind::to_string).collect();
    assert_eq!(names, vec!["pods", "deployments", "namespaces"]);
}
