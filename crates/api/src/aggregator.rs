//! Per-scrape aggregation over every registered kind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::exposition::Exposition;
use crate::registry::{CollectorRegistry, KindOutput};

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Budget for generating one kind; a kind over budget is left out of that scrape.
    pub kind_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { kind_timeout: Duration::from_secs(10) }
    }
}

pub struct Aggregator {
    registry: Arc<CollectorRegistry>,
    cfg: AggregatorConfig,
    /// Per registered kind: a generation is still running on the blocking pool.
    in_flight: Vec<Arc<AtomicBool>>,
}

/// Clears the kind's in-flight flag when generation ends, including by panic.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Aggregator {
    pub fn new(registry: Arc<CollectorRegistry>, cfg: AggregatorConfig) -> Self {
        let in_flight = registry.collectors().iter().map(|_| Arc::new(AtomicBool::new(false))).collect();
        Self { registry, cfg, in_flight }
    }

    pub fn registry(&self) -> &CollectorRegistry { &self.registry }

    /// Generate every kind on the calling thread, without timeouts.
    pub fn collect_now(&self) -> Exposition {
        Exposition::from_outputs(self.registry.collectors().iter().map(|c| c.collect()))
    }

    /// Generate all kinds concurrently on the blocking pool, each under `kind_timeout`.
    /// Output keeps registration order regardless of completion order. A kind whose previous
    /// generation has not finished yet is left out instead of starting another one.
    pub async fn scrape(&self) -> Exposition {
        let t0 = Instant::now();
        let budget = self.cfg.kind_timeout;
        let tasks = self.registry.collectors().iter().zip(&self.in_flight).map(|(c, flag)| {
            let collector = Arc::clone(c);
            let flag = Arc::clone(flag);
            async move {
                let kind = collector.kind().to_string();
                if flag.swap(true, Ordering::AcqRel) {
                    warn!(kind = %kind, "previous generation still running; kind skipped");
                    metrics::counter!("kubestate_scrape_kind_skipped_total", 1u64, "kind" => kind);
                    return None;
                }
                let guard = InFlight(flag);
                let handle = tokio::task::spawn_blocking(move || {
                    let _guard = guard;
                    collector.collect()
                });
                match tokio::time::timeout(budget, handle).await {
                    Ok(Ok(out)) => Some(out),
                    Ok(Err(e)) => {
                        warn!(kind = %kind, error = %e, "kind generation aborted");
                        None
                    }
                    Err(_) => {
                        // the blocking task runs to completion in the background; its result is dropped
                        warn!(kind = %kind, budget_ms = %budget.as_millis(), "kind generation timed out");
                        metrics::counter!("kubestate_scrape_kind_timeouts_total", 1u64, "kind" => kind);
                        None
                    }
                }
            }
        });
        let outputs: Vec<Option<KindOutput>> = futures::future::join_all(tasks).await;
        let expo = Exposition::from_outputs(outputs.into_iter().flatten());
        let took = t0.elapsed();
        metrics::histogram!("kubestate_scrape_ms", took.as_secs_f64() * 1_000.0);
        debug!(families = expo.families().len(), samples = expo.sample_count(), took_ms = %took.as_millis(), "scrape done");
        expo
    }
}
