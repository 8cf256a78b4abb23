//! kubestate collectors: per-kind generator tables and their startup wiring.
//!
//! Each kind module exposes `default_labels()` and `generators()`. `start` pairs them with a
//! reflector-fed store and hands back a `Collector` ready for the registry.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Namespace, core::v1::Pod};
use kube::{Api, Client, Resource};
use kubestate_api::{Collector, CollectorRegistry, KindCollector};
use kubestate_core::{DefaultLabels, FamilyGenerator};
use kubestate_kubehub::{namespaced_api, KubeSource, DEFAULT_WATCH_TIMEOUT_SECS};
use kubestate_store::{Reflector, ReflectorConfig, ResourceStore};
use serde::de::DeserializeOwned;
use tokio::{sync::watch, task::JoinHandle};
use tracing::info;

pub mod deployment;
pub mod namespace;
pub mod pod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Pods,
    Deployments,
    Namespaces,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Pods, ResourceKind::Deployments, ResourceKind::Namespaces];

    /// Collector name as accepted on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pods => "pods",
            ResourceKind::Deployments => "deployments",
            ResourceKind::Namespaces => "namespaces",
        }
    }

    /// Store and log label for the kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceKind::Pods => pod::KIND,
            ResourceKind::Deployments => deployment::KIND,
            ResourceKind::Namespaces => namespace::KIND,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown collector {0:?} (expected one of: pods, deployments, namespaces)")]
pub struct UnknownKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pods" | "pod" => Ok(ResourceKind::Pods),
            "deployments" | "deployment" => Ok(ResourceKind::Deployments),
            "namespaces" | "namespace" => Ok(ResourceKind::Namespaces),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Restrict namespaced kinds to one namespace. Namespaces are always listed cluster wide.
    pub namespace: Option<String>,
    pub reflector: ReflectorConfig,
    pub watch_timeout_secs: u32,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self { namespace: None, reflector: ReflectorConfig::default(), watch_timeout_secs: DEFAULT_WATCH_TIMEOUT_SECS }
    }
}

/// Start the reflector for `kind` and return its collector plus the reflector task.
pub fn start(
    kind: ResourceKind,
    client: Client,
    opts: &StartOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<(Arc<dyn Collector>, JoinHandle<()>)> {
    let ns = opts.namespace.as_deref();
    match kind {
        ResourceKind::Pods => start_kind::<Pod>(
            namespaced_api(client, ns),
            pod::KIND,
            pod::default_labels(),
            pod::generators(),
            opts,
            shutdown,
        ),
        ResourceKind::Deployments => start_kind::<Deployment>(
            namespaced_api(client, ns),
            deployment::KIND,
            deployment::default_labels(),
            deployment::generators(),
            opts,
            shutdown,
        ),
        ResourceKind::Namespaces => start_kind::<Namespace>(
            Api::all(client),
            namespace::KIND,
            namespace::default_labels(),
            namespace::generators(),
            opts,
            shutdown,
        ),
    }
}

fn start_kind<K>(
    api: Api<K>,
    kind: &str,
    defaults: DefaultLabels<K>,
    generators: Vec<FamilyGenerator<K>>,
    opts: &StartOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<(Arc<dyn Collector>, JoinHandle<()>)>
where
    K: Resource + Clone + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
{
    let (writer, store) = ResourceStore::new(kind);
    // validate the table before any task is spawned
    let collector = KindCollector::new(store, defaults, generators).with_context(|| format!("{kind} generator table"))?;
    let source = KubeSource::new(api, kind).with_watch_timeout(opts.watch_timeout_secs);
    let reflector = Reflector::new(source, writer, opts.reflector.clone()).with_context(|| format!("{kind} reflector"))?;
    let handle = tokio::spawn(reflector.run(shutdown));
    Ok((Arc::new(collector), handle))
}

/// Start every selected kind and register it, in selection order. Duplicates are rejected.
pub fn start_all(
    kinds: &[ResourceKind],
    client: &Client,
    opts: &StartOptions,
    shutdown: &watch::Receiver<bool>,
) -> Result<(CollectorRegistry, Vec<JoinHandle<()>>)> {
    let mut registry = CollectorRegistry::new();
    let mut handles = Vec::with_capacity(kinds.len());
    for (i, kind) in kinds.iter().enumerate() {
        if kinds[..i].contains(kind) {
            anyhow::bail!("collector {kind} selected twice");
        }
        let (collector, handle) = start(*kind, client.clone(), opts, shutdown.clone())?;
        handles.push(handle);
        registry.register(collector).with_context(|| format!("registering {kind}"))?;
        info!(kind = %kind, "collector registered");
    }
    Ok((registry, handles))
}
