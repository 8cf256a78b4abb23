//! kubestate kubehub: list/watch object sources over the cluster API.
//!
//! `ObjectSource` is the seam the store's reflector drives. `KubeSource` implements it with
//! `kube::Api<K>`, so payloads are decoded into the concrete kind right here and nowhere later.

#![forbid(unsafe_code)]

use std::fmt::Debug;

use anyhow::{Context, Result};
use futures::{stream::BoxStream, StreamExt};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, ListParams, WatchParams},
    core::WatchEvent as KubeWatchEvent,
    Client, Resource, ResourceExt,
};
use kubestate_core::Uid;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use uuid::Uuid;

/// Transient list/watch failures. None of these are fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("kube api: {0}")]
    Api(#[from] kube::Error),
    #[error("resource version gone: {0}")]
    Gone(String),
    #[error("{op} timed out after {secs}s")]
    Timeout { op: &'static str, secs: u64 },
    #[error("watch error {code}: {message}")]
    Stream { code: u16, message: String },
    #[error("malformed object: {0}")]
    MalformedObject(String),
}

impl SourceError {
    /// The requested resource version can no longer be watched from.
    pub fn is_gone(&self) -> bool {
        match self {
            SourceError::Gone(_) => true,
            SourceError::Api(kube::Error::Api(resp)) => resp.code == 410,
            _ => false,
        }
    }
}

/// Full listing of a kind at one resource version.
#[derive(Debug, Clone)]
pub struct Listing<K> {
    pub items: Vec<K>,
    pub resource_version: String,
}

/// Incremental change since some resource version.
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// Progress marker carrying only a resource version.
    Bookmark(String),
}

impl<K> WatchEvent<K> {
    pub fn label(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Modified(_) => "modified",
            WatchEvent::Deleted(_) => "deleted",
            WatchEvent::Bookmark(_) => "bookmark",
        }
    }
}

pub type EventStream<K> = BoxStream<'static, Result<WatchEvent<K>, SourceError>>;

/// List + watch provider for one resource kind.
#[async_trait::async_trait]
pub trait ObjectSource<K>: Send + Sync {
    /// Short kind label used in logs and self-metrics (e.g. `pod`).
    fn kind(&self) -> &str;

    async fn list(&self) -> Result<Listing<K>, SourceError>;

    async fn watch(&self, from_version: &str) -> Result<EventStream<K>, SourceError>;
}

/// Server-side watch duration; the API server closes the stream after this.
pub const DEFAULT_WATCH_TIMEOUT_SECS: u32 = 290;
const DEFAULT_PAGE_SIZE: u32 = 500;

/// `ObjectSource` backed by a typed `kube::Api`.
pub struct KubeSource<K>
where
    K: Resource,
{
    api: Api<K>,
    kind: String,
    watch_timeout_secs: u32,
    page_size: u32,
}

impl<K> KubeSource<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    pub fn new(api: Api<K>, kind: impl Into<String>) -> Self {
        Self { api, kind: kind.into(), watch_timeout_secs: DEFAULT_WATCH_TIMEOUT_SECS, page_size: DEFAULT_PAGE_SIZE }
    }

    pub fn with_watch_timeout(mut self, secs: u32) -> Self {
        self.watch_timeout_secs = secs;
        self
    }

    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size.max(1);
        self
    }
}

#[async_trait::async_trait]
impl<K> ObjectSource<K> for KubeSource<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    fn kind(&self) -> &str { &self.kind }

    async fn list(&self) -> Result<Listing<K>, SourceError> {
        let mut items = Vec::new();
        let mut lp = ListParams::default().limit(self.page_size);
        let resource_version = loop {
            let page = self.api.list(&lp).await?;
            items.extend(page.items.into_iter().map(strip_managed_fields));
            let rv = page.metadata.resource_version.unwrap_or_default();
            match page.metadata.continue_ {
                Some(token) if !token.is_empty() => lp = lp.continue_token(&token),
                _ => break rv,
            }
        };
        debug!(kind = %self.kind, count = items.len(), rv = %resource_version, "list done");
        Ok(Listing { items, resource_version })
    }

    async fn watch(&self, from_version: &str) -> Result<EventStream<K>, SourceError> {
        let wp = WatchParams::default().timeout(self.watch_timeout_secs);
        let stream = self.api.watch(&wp, from_version).await?;
        Ok(stream.map(translate_event).boxed())
    }
}

fn translate_event<K: Resource>(ev: kube::Result<KubeWatchEvent<K>>) -> Result<WatchEvent<K>, SourceError> {
    match ev? {
        KubeWatchEvent::Added(o) => Ok(WatchEvent::Added(strip_managed_fields(o))),
        KubeWatchEvent::Modified(o) => Ok(WatchEvent::Modified(strip_managed_fields(o))),
        KubeWatchEvent::Deleted(o) => Ok(WatchEvent::Deleted(strip_managed_fields(o))),
        KubeWatchEvent::Bookmark(b) => Ok(WatchEvent::Bookmark(b.metadata.resource_version)),
        KubeWatchEvent::Error(e) if e.code == 410 => Err(SourceError::Gone(e.message)),
        KubeWatchEvent::Error(e) => Err(SourceError::Stream { code: e.code, message: e.message }),
    }
}

/// Managed fields are never read by any generator; dropping them keeps the cache lean.
fn strip_managed_fields<K: Resource>(mut obj: K) -> K {
    obj.meta_mut().managed_fields = None;
    obj
}

/// Parse `metadata.uid` into the store key.
pub fn uid_of<K: Resource>(obj: &K) -> Result<Uid, SourceError> {
    let raw = obj
        .meta()
        .uid
        .as_deref()
        .ok_or_else(|| SourceError::MalformedObject(format!("{} missing metadata.uid", object_ref(obj))))?;
    let u = Uuid::parse_str(raw)
        .map_err(|e| SourceError::MalformedObject(format!("{} has invalid uid {raw:?}: {e}", object_ref(obj))))?;
    Ok(*u.as_bytes())
}

/// `namespace/name`, or just `name` for cluster-scoped objects.
pub fn object_ref<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, obj.name_any()),
        _ => obj.name_any(),
    }
}

/// Api for a namespaced kind, optionally restricted to one namespace.
pub fn namespaced_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Build a client from the ambient kubeconfig or in-cluster environment.
pub async fn connect() -> Result<Client> {
    let client = Client::try_default().await.context("building kube client from kubeconfig / in-cluster env")?;
    let version = client.apiserver_version().await.context("reaching the cluster API server")?;
    info!(major = %version.major, minor = %version.minor, "connected to cluster");
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;

    fn pod(uid: Option<&str>) -> Pod {
        let mut meta = serde_json::json!({ "name": "p", "namespace": "ns" });
        if let Some(u) = uid {
            meta["uid"] = serde_json::Value::String(u.to_string());
        }
        serde_json::from_value(serde_json::json!({ "metadata": meta })).expect("pod fixture")
    }

    #[test]
    fn uid_parses_uuid_bytes() {
        let p = pod(Some("00000000-0000-0000-0000-000000000007"));
        let uid = uid_of(&p).expect("valid uid");
        assert_eq!(uid[15], 7);
    }

    #[test]
    fn missing_or_bad_uid_is_malformed() {
        assert!(matches!(uid_of(&pod(None)), Err(SourceError::MalformedObject(_))));
        assert!(matches!(uid_of(&pod(Some("nope"))), Err(SourceError::MalformedObject(_))));
    }

    #[test]
    fn object_ref_includes_namespace() {
        assert_eq!(object_ref(&pod(None)), "ns/p");
    }

    #[test]
    fn gone_is_detected() {
        assert!(SourceError::Gone("too old".into()).is_gone());
        assert!(!SourceError::Timeout { op: "list", secs: 1 }.is_gone());
    }

    fn watch_error(code: u16) -> kube::Result<KubeWatchEvent<Pod>> {
        let resp = serde_json::from_value(serde_json::json!({
            "status": "Failure",
            "message": "too old resource version: 12 (40)",
            "reason": "Expired",
            "code": code,
        }))
        .expect("error response fixture");
        Ok(KubeWatchEvent::Error(resp))
    }

    #[test]
    fn expired_watch_error_becomes_gone() {
        let err = translate_event(watch_error(410)).expect_err("410 is an error");
        assert!(matches!(err, SourceError::Gone(ref m) if m.starts_with("too old")));
        assert!(err.is_gone());
    }

    #[test]
    fn other_watch_errors_keep_their_code() {
        let err = translate_event(watch_error(403)).expect_err("403 is an error");
        assert!(matches!(err, SourceError::Stream { code: 403, .. }));
        assert!(!err.is_gone());
    }

    #[test]
    fn watch_events_strip_managed_fields() {
        let mut p = pod(Some("00000000-0000-0000-0000-000000000001"));
        p.metadata.managed_fields = Some(Vec::new());
        match translate_event(Ok(KubeWatchEvent::Modified(p))) {
            Ok(WatchEvent::Modified(p)) => assert!(p.metadata.managed_fields.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
