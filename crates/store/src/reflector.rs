//! List/watch reflector: keeps one `StoreWriter` in sync with an `ObjectSource`.
//!
//! Cycle: list (replace everything) → watch from the listed version → on any stream end,
//! error, idle timeout or relist deadline, start over from a fresh list. The old watermark
//! is never resumed.
//!
//! Retries wait on an exponential schedule (2s, 4s, 8s, ...) floored at `backoff_min` and capped
//! at `backoff_max`. The schedule only resets once a watch has stayed open for
//! `min_healthy_watch`, so a stream that closes right after opening cannot drive back-to-back lists.

use std::time::{Duration, Instant};

use adaptive_backoff::prelude::{Backoff, BackoffBuilder, ExponentialBackoff, ExponentialBackoffBuilder};
use anyhow::{anyhow, Result};
use futures::{FutureExt, StreamExt};
use kube::Resource;
use kubestate_kubehub::{EventStream, ObjectSource, SourceError};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{ResourceStore, StoreWriter};

#[derive(Debug, Clone)]
pub struct ReflectorConfig {
    /// Full re-list even when the watch is healthy.
    pub relist_interval: Duration,
    /// Bound on a single list call or watch open.
    pub request_timeout: Duration,
    /// An open watch with no event for this long is abandoned.
    pub watch_idle_timeout: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    /// A watch that ends sooner than this counts as unhealthy and the next list waits on the backoff.
    pub min_healthy_watch: Duration,
    /// Buffered events applied before one snapshot publication.
    pub max_batch: usize,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            relist_interval: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
            watch_idle_timeout: Duration::from_secs(330),
            backoff_min: Duration::from_secs(2),
            backoff_max: Duration::from_secs(30),
            min_healthy_watch: Duration::from_secs(10),
            max_batch: 256,
        }
    }
}

/// Why a watch phase ended.
#[derive(Debug, PartialEq, Eq)]
enum WatchExit {
    Relist,
    /// Ended early without an error; relist after a backoff wait.
    Retry,
    Failed,
    Shutdown,
}

pub struct Reflector<K, S> {
    source: S,
    writer: StoreWriter<K>,
    cfg: ReflectorConfig,
    backoff: ExponentialBackoff,
}

impl<K, S> Reflector<K, S>
where
    K: Resource + Send + Sync + 'static,
    S: ObjectSource<K>,
{
    pub fn new(source: S, writer: StoreWriter<K>, cfg: ReflectorConfig) -> Result<Self> {
        let backoff = create_backoff(&cfg)?;
        Ok(Self { source, writer, cfg, backoff })
    }

    /// Run until `shutdown` flips to true (or its sender is dropped).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let kind = self.source.kind().to_string();
        info!(kind = %kind, "reflector started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let rv = match self.relist().await {
                Ok(rv) => rv,
                Err(e) => {
                    metrics::counter!("kubestate_sync_errors_total", 1u64, "kind" => kind.clone());
                    let wait = self.backoff.wait();
                    warn!(kind = %kind, error = %e, retry_in_ms = %wait.as_millis(), "list failed; keeping last snapshot");
                    if sleep_or_shutdown(wait, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };
            match self.watch_from(&rv, &mut shutdown).await {
                WatchExit::Relist => self.backoff.reset(),
                WatchExit::Shutdown => break,
                WatchExit::Retry => {
                    let wait = self.backoff.wait();
                    debug!(kind = %kind, retry_in_ms = %wait.as_millis(), "watch ended early; delaying relist");
                    if sleep_or_shutdown(wait, &mut shutdown).await {
                        break;
                    }
                }
                WatchExit::Failed => {
                    metrics::counter!("kubestate_sync_errors_total", 1u64, "kind" => kind.clone());
                    let wait = self.backoff.wait();
                    if sleep_or_shutdown(wait, &mut shutdown).await {
                        break;
                    }
                }
            }
        }
        info!(kind = %kind, "reflector stopped");
    }

    /// Full list replacing the working map; publishes immediately.
    async fn relist(&mut self) -> Result<String, SourceError> {
        let t0 = Instant::now();
        let listing = tokio::time::timeout(self.cfg.request_timeout, self.source.list())
            .await
            .map_err(|_| SourceError::Timeout { op: "list", secs: self.cfg.request_timeout.as_secs() })??;
        let rv = listing.resource_version.clone();
        let kept = self.writer.replace(listing);
        self.writer.publish();
        metrics::counter!("kubestate_relists_total", 1u64, "kind" => self.writer.kind().to_string());
        info!(kind = %self.writer.kind(), objects = kept, rv = %rv, took_ms = %t0.elapsed().as_millis(), "relist applied");
        Ok(rv)
    }

    async fn watch_from(&mut self, rv: &str, shutdown: &mut watch::Receiver<bool>) -> WatchExit {
        let kind = self.writer.kind().to_string();
        let opened = tokio::time::timeout(self.cfg.request_timeout, self.source.watch(rv)).await;
        let mut stream: EventStream<K> = match opened {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                warn!(kind = %kind, rv = %rv, error = %e, "watch open failed");
                return WatchExit::Failed;
            }
            Err(_) => {
                warn!(kind = %kind, rv = %rv, "watch open timed out");
                return WatchExit::Failed;
            }
        };
        debug!(kind = %kind, rv = %rv, "watch opened");
        let opened_at = tokio::time::Instant::now();
        let relist_at = opened_at + self.cfg.relist_interval;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(relist_at) => {
                    debug!(kind = %kind, "periodic resync");
                    return WatchExit::Relist;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return WatchExit::Shutdown;
                    }
                }
                next = tokio::time::timeout(self.cfg.watch_idle_timeout, stream.next()) => {
                    match next {
                        Err(_) => {
                            debug!(kind = %kind, "watch idle; restarting from list");
                            return WatchExit::Relist;
                        }
                        Ok(None) => {
                            debug!(kind = %kind, "watch stream ended; restarting from list");
                            return self.ended(opened_at);
                        }
                        Ok(Some(Err(e))) if e.is_gone() => {
                            info!(kind = %kind, error = %e, "watch version expired; restarting from list");
                            return self.ended(opened_at);
                        }
                        Ok(Some(Err(e))) => {
                            warn!(kind = %kind, error = %e, "watch failed; restarting from list");
                            return WatchExit::Failed;
                        }
                        Ok(Some(Ok(event))) => {
                            self.record(&kind, event.label());
                            self.writer.apply(event);
                            if let Some(exit) = self.drain_ready(&kind, &mut stream, opened_at) {
                                self.writer.publish();
                                return exit;
                            }
                            self.writer.publish();
                        }
                    }
                }
            }
        }
    }

    /// Apply events that are already buffered, up to `max_batch`, without waiting.
    fn drain_ready(
        &mut self,
        kind: &str,
        stream: &mut EventStream<K>,
        opened_at: tokio::time::Instant,
    ) -> Option<WatchExit> {
        for _ in 1..self.cfg.max_batch {
            match stream.next().now_or_never() {
                Some(Some(Ok(event))) => {
                    self.record(kind, event.label());
                    self.writer.apply(event);
                }
                Some(Some(Err(e))) if e.is_gone() => return Some(self.ended(opened_at)),
                Some(Some(Err(e))) => {
                    warn!(kind = %kind, error = %e, "watch failed; restarting from list");
                    return Some(WatchExit::Failed);
                }
                Some(None) => return Some(self.ended(opened_at)),
                None => break,
            }
        }
        None
    }

    /// Clean end of a watch: relist now if it stayed up long enough, otherwise back off first.
    fn ended(&self, opened_at: tokio::time::Instant) -> WatchExit {
        if opened_at.elapsed() >= self.cfg.min_healthy_watch {
            WatchExit::Relist
        } else {
            WatchExit::Retry
        }
    }

    fn record(&self, kind: &str, event: &'static str) {
        metrics::counter!("kubestate_watch_events_total", 1u64, "kind" => kind.to_string(), "event" => event);
    }
}

/// Spawn a reflector for `source`. Returns the read handle and the task.
pub fn spawn_reflector<K, S>(
    source: S,
    cfg: ReflectorConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<(ResourceStore<K>, JoinHandle<()>)>
where
    K: Resource + Send + Sync + 'static,
    S: ObjectSource<K> + 'static,
{
    let (writer, store) = ResourceStore::new(source.kind());
    let reflector = Reflector::new(source, writer, cfg)?;
    let handle = tokio::spawn(reflector.run(shutdown));
    Ok((store, handle))
}

fn create_backoff(cfg: &ReflectorConfig) -> Result<ExponentialBackoff> {
    if cfg.backoff_min > cfg.backoff_max {
        return Err(anyhow!("backoff min {:?} exceeds max {:?}", cfg.backoff_min, cfg.backoff_max));
    }
    ExponentialBackoffBuilder::default()
        .factor(2.0)
        .min(cfg.backoff_min)
        .max(cfg.backoff_max)
        .build()
        .map_err(|e| anyhow!("invalid reflector backoff: {e}"))
}

/// Sleep for `wait`; true when shutdown was requested meanwhile.
async fn sleep_or_shutdown(wait: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(wait) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
