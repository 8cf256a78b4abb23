//! kubestate store: per-kind object caches published as immutable snapshots.
//!
//! One `StoreWriter` (owned by the kind's reflector) mutates a private working map and
//! swaps finished snapshots into an `ArcSwap`. Any number of `ResourceStore` readers load
//! the current `Arc<StoreSnapshot>` without ever waiting on the writer.

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use kube::Resource;
use kubestate_core::Uid;
use kubestate_kubehub::{object_ref, uid_of, Listing, WatchEvent};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

pub mod reflector;

pub use reflector::{spawn_reflector, Reflector, ReflectorConfig};

/// Point-in-time view of one kind's cache.
pub struct StoreSnapshot<K> {
    pub epoch: u64,
    /// Watermark of the last applied list or event.
    pub resource_version: Option<String>,
    items: FxHashMap<Uid, Arc<K>>,
}

impl<K> Default for StoreSnapshot<K> {
    fn default() -> Self {
        Self { epoch: 0, resource_version: None, items: FxHashMap::default() }
    }
}

impl<K> StoreSnapshot<K> {
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn get(&self, uid: &Uid) -> Option<&Arc<K>> { self.items.get(uid) }
    pub fn contains(&self, uid: &Uid) -> bool { self.items.contains_key(uid) }

    pub fn iter(&self) -> impl Iterator<Item = (&Uid, &Arc<K>)> { self.items.iter() }

    pub fn objects(&self) -> impl Iterator<Item = &K> { self.items.values().map(|o| o.as_ref()) }
}

/// Read handle shared with the aggregator.
pub struct ResourceStore<K> {
    kind: Arc<str>,
    snap: Arc<ArcSwap<StoreSnapshot<K>>>,
}

impl<K> Clone for ResourceStore<K> {
    fn clone(&self) -> Self {
        Self { kind: Arc::clone(&self.kind), snap: Arc::clone(&self.snap) }
    }
}

impl<K> ResourceStore<K> {
    /// Empty store plus its single writer.
    pub fn new(kind: &str) -> (StoreWriter<K>, ResourceStore<K>) {
        let kind: Arc<str> = Arc::from(kind);
        let snap = Arc::new(ArcSwap::from_pointee(StoreSnapshot::default()));
        let writer = StoreWriter {
            kind: Arc::clone(&kind),
            snap: Arc::clone(&snap),
            items: FxHashMap::default(),
            resource_version: None,
            epoch: 0,
            dirty: false,
        };
        (writer, ResourceStore { kind, snap })
    }

    pub fn kind(&self) -> &str { &self.kind }

    /// Current snapshot; never blocks on the writer.
    pub fn current(&self) -> Arc<StoreSnapshot<K>> { self.snap.load_full() }

    pub fn len(&self) -> usize { self.snap.load().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Sole mutator of one store. Not `Clone`: writes to a kind are serialized by construction.
pub struct StoreWriter<K> {
    kind: Arc<str>,
    snap: Arc<ArcSwap<StoreSnapshot<K>>>,
    items: FxHashMap<Uid, Arc<K>>,
    resource_version: Option<String>,
    epoch: u64,
    dirty: bool,
}

impl<K: Resource> StoreWriter<K> {
    pub fn kind(&self) -> &str { &self.kind }

    pub fn resource_version(&self) -> Option<&str> { self.resource_version.as_deref() }

    /// Number of objects in the working map (published or not).
    pub fn len(&self) -> usize { self.items.len() }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    /// Replace the whole mapping with a fresh listing. Returns the number of objects kept.
    pub fn replace(&mut self, listing: Listing<K>) -> usize {
        let mut items = FxHashMap::with_capacity_and_hasher(listing.items.len(), Default::default());
        for obj in listing.items {
            match uid_of(&obj) {
                Ok(uid) => {
                    items.insert(uid, Arc::new(obj));
                }
                Err(e) => warn!(kind = %self.kind, error = %e, "skipping malformed object in list"),
            }
        }
        let kept = items.len();
        self.items = items;
        self.resource_version = Some(listing.resource_version);
        self.dirty = true;
        kept
    }

    /// Apply one watch event to the working map.
    pub fn apply(&mut self, event: WatchEvent<K>) {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let rv = obj.meta().resource_version.clone();
                match uid_of(&obj) {
                    Ok(uid) => {
                        self.items.insert(uid, Arc::new(obj));
                        self.dirty = true;
                    }
                    Err(e) => warn!(kind = %self.kind, error = %e, "skipping malformed object in watch"),
                }
                self.advance(rv);
            }
            WatchEvent::Deleted(obj) => {
                let rv = obj.meta().resource_version.clone();
                match uid_of(&obj) {
                    Ok(uid) => {
                        if self.items.remove(&uid).is_some() {
                            self.dirty = true;
                        } else {
                            debug!(kind = %self.kind, obj = %object_ref(&obj), "delete for unknown object");
                        }
                    }
                    Err(e) => warn!(kind = %self.kind, error = %e, "skipping malformed delete"),
                }
                self.advance(rv);
            }
            WatchEvent::Bookmark(rv) => self.advance(Some(rv)),
        }
    }

    fn advance(&mut self, rv: Option<String>) {
        if let Some(rv) = rv.filter(|v| !v.is_empty()) {
            self.resource_version = Some(rv);
            self.dirty = true;
        }
    }

    /// Swap a new snapshot in if anything changed. Returns the published epoch.
    pub fn publish(&mut self) -> Option<u64> {
        if !self.dirty {
            return None;
        }
        self.epoch = self.epoch.saturating_add(1);
        let next = StoreSnapshot {
            epoch: self.epoch,
            resource_version: self.resource_version.clone(),
            items: self.items.clone(),
        };
        self.snap.store(Arc::new(next));
        self.dirty = false;
        metrics::gauge!("kubestate_store_objects", self.items.len() as f64, "kind" => self.kind.to_string());
        Some(self.epoch)
    }
}
