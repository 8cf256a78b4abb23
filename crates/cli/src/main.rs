#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kubestate_api::{Aggregator, AggregatorConfig};
use kubestate_collectors::{ResourceKind, StartOptions};
use kubestate_store::ReflectorConfig;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "kubestate", version, about = "Expose cluster object state as Prometheus metrics")]
struct Cli {
    /// Scrape endpoint address
    #[arg(long = "listen", env = "KUBESTATE_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Address for the exporter's own metrics
    #[arg(long = "telemetry-addr", env = "KUBESTATE_METRICS_ADDR")]
    telemetry_addr: Option<SocketAddr>,

    /// Comma separated collectors to enable
    #[arg(
        long = "collectors",
        env = "KUBESTATE_COLLECTORS",
        value_delimiter = ',',
        default_value = "pods,deployments,namespaces"
    )]
    collectors: Vec<ResourceKind>,

    /// Restrict namespaced kinds to one namespace (default: all)
    #[arg(long = "ns", env = "KUBESTATE_NAMESPACE")]
    namespace: Option<String>,

    /// Full relist period per kind
    #[arg(long = "relist-secs", env = "KUBESTATE_RELIST_SECS", default_value_t = 300)]
    relist_secs: u64,

    /// Cap for the retry backoff after list/watch failures
    #[arg(long = "watch-backoff-max-secs", env = "KUBESTATE_WATCH_BACKOFF_MAX_SECS", default_value_t = 30)]
    watch_backoff_max_secs: u64,

    /// Timeout for a single list (all pages) against the API server
    #[arg(long = "request-timeout-secs", env = "KUBESTATE_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// Per-kind generation budget within one scrape
    #[arg(long = "scrape-timeout-secs", env = "KUBESTATE_SCRAPE_TIMEOUT_SECS", default_value_t = 10)]
    scrape_timeout_secs: u64,
}

impl Cli {
    fn start_options(&self) -> StartOptions {
        let defaults = StartOptions::default();
        let backoff_max = Duration::from_secs(self.watch_backoff_max_secs.max(1));
        StartOptions {
            namespace: self.namespace.clone().filter(|ns| !ns.is_empty()),
            reflector: ReflectorConfig {
                relist_interval: Duration::from_secs(self.relist_secs.max(1)),
                request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
                backoff_min: defaults.reflector.backoff_min.min(backoff_max),
                backoff_max,
                ..defaults.reflector
            },
            ..defaults
        }
    }
}

fn init_tracing() {
    let env = std::env::var("KUBESTATE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<SocketAddr>) {
    let Some(sock) = addr else { return };
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    match builder.with_http_listener(sock).install() {
        Ok(_) => {
            describe_self_metrics();
            info!(addr = %sock, "telemetry exporter listening");
        }
        Err(e) => warn!(error = %e, "failed to install telemetry exporter"),
    }
}

fn describe_self_metrics() {
    metrics::describe_gauge!("kubestate_store_objects", "Objects held in the published store snapshot.");
    metrics::describe_counter!("kubestate_relists_total", "Full relists completed per kind.");
    metrics::describe_counter!("kubestate_watch_events_total", "Watch events applied per kind and event type.");
    metrics::describe_counter!("kubestate_sync_errors_total", "List or watch failures per kind.");
    metrics::describe_histogram!("kubestate_scrape_ms", "Wall time of one scrape in milliseconds.");
    metrics::describe_counter!("kubestate_generator_failures_total", "Generator panics skipped per kind and family.");
    metrics::describe_counter!("kubestate_scrape_kind_timeouts_total", "Kinds left out of a scrape for exceeding the budget.");
    metrics::describe_counter!("kubestate_scrape_kind_skipped_total", "Kinds left out because their previous generation is still running.");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler failed; shutting down");
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    init_metrics(cli.telemetry_addr);

    let opts = cli.start_options();
    info!(
        collectors = ?cli.collectors,
        namespace = ?opts.namespace,
        relist_secs = opts.reflector.relist_interval.as_secs(),
        "starting kubestate"
    );

    let client = kubestate_kubehub::connect().await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (registry, reflectors) = kubestate_collectors::start_all(&cli.collectors, &client, &opts, &shutdown_rx)
        .context("starting collectors")?;

    let aggregator = Arc::new(Aggregator::new(
        Arc::new(registry),
        AggregatorConfig { kind_timeout: Duration::from_secs(cli.scrape_timeout_secs.max(1)) },
    ));
    let served = kubestate_api::serve(cli.listen, aggregator, shutdown_signal()).await;

    let _ = shutdown_tx.send(true);
    let drained = tokio::time::timeout(Duration::from_secs(5), futures::future::join_all(reflectors)).await;
    if drained.is_err() {
        warn!("reflectors did not stop within 5s");
    }
    served
}
