#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kubestate_kubehub::{EventStream, Listing, ObjectSource, SourceError, WatchEvent};
use kubestate_store::{spawn_reflector, ReflectorConfig, ResourceStore};
use tokio::sync::watch;
use tokio::time::Instant;

fn uid(n: u8) -> [u8; 16] { let mut u = [0u8; 16]; u[15] = n; u }

fn pod(n: u8, rv: &str) -> Pod {
    serde_json::from_value(serde_json::json!({
        "metadata": {
            "name": format!("p{n}"),
            "namespace": "ns",
            "uid": format!("00000000-0000-0000-0000-{:012}", n),
            "resourceVersion": rv,
        }
    }))
    .expect("pod fixture")
}

fn listing(ns: &[u8], rv: &str) -> Listing<Pod> {
    Listing { items: ns.iter().map(|n| pod(*n, rv)).collect(), resource_version: rv.to_string() }
}

/// One scripted watch: events to yield, then either end or hang.
struct WatchScript {
    events: Vec<Result<WatchEvent<Pod>, SourceError>>,
    hang: bool,
}

/// Lists pop from a script (the last one repeats); watches pop scripts and hang when exhausted.
struct ScriptedSource {
    lists: Mutex<VecDeque<Result<Listing<Pod>, SourceError>>>,
    watches: Mutex<VecDeque<WatchScript>>,
    list_calls: Arc<AtomicUsize>,
    watched_from: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSource {
    fn new(lists: Vec<Result<Listing<Pod>, SourceError>>, watches: Vec<WatchScript>) -> Self {
        Self {
            lists: Mutex::new(lists.into()),
            watches: Mutex::new(watches.into()),
            list_calls: Arc::new(AtomicUsize::new(0)),
            watched_from: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait::async_trait]
impl ObjectSource<Pod> for ScriptedSource {
    fn kind(&self) -> &str { "pod" }

    async fn list(&self) -> Result<Listing<Pod>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut lists = self.lists.lock().unwrap();
        if lists.len() > 1 {
            return lists.pop_front().unwrap();
        }
        match lists.front() {
            Some(Ok(l)) => Ok(l.clone()),
            _ => Err(SourceError::Stream { code: 503, message: "no listing scripted".into() }),
        }
    }

    async fn watch(&self, from_version: &str) -> Result<EventStream<Pod>, SourceError> {
        self.watched_from.lock().unwrap().push(from_version.to_string());
        let script = self.watches.lock().unwrap().pop_front().unwrap_or(WatchScript { events: Vec::new(), hang: true });
        let s = async_stream::stream! {
            for ev in script.events {
                yield ev;
            }
            if script.hang {
                futures::future::pending::<()>().await;
            }
        };
        Ok(s.boxed())
    }
}

fn fast_config() -> ReflectorConfig {
    ReflectorConfig {
        relist_interval: Duration::from_secs(60),
        request_timeout: Duration::from_secs(2),
        watch_idle_timeout: Duration::from_secs(60),
        backoff_min: Duration::from_millis(10),
        backoff_max: Duration::from_millis(20),
        min_healthy_watch: Duration::from_secs(1),
        max_batch: 16,
    }
}

async fn wait_for<F: Fn(&ResourceStore<Pod>) -> bool>(store: &ResourceStore<Pod>, cond: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond(store) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("store did not converge in time");
}

fn sorted_uids(store: &ResourceStore<Pod>) -> Vec<u8> {
    let snap = store.current();
    let mut ids: Vec<u8> = snap.iter().map(|(u, _)| u[15]).collect();
    ids.sort_unstable();
    ids
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watch_termination_converges_to_fresh_list() {
    let source = ScriptedSource::new(
        vec![Ok(listing(&[1, 2], "10")), Ok(listing(&[2, 3, 4], "20"))],
        vec![
            WatchScript {
                events: vec![
                    Ok(WatchEvent::Added(pod(3, "11"))),
                    Ok(WatchEvent::Deleted(pod(1, "12"))),
                    Err(SourceError::Gone("too old resource version: 12".into())),
                ],
                hang: false,
            },
            WatchScript { events: Vec::new(), hang: true },
        ],
    );
    let watched_from = Arc::clone(&source.watched_from);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (store, handle) = spawn_reflector(source, fast_config(), stop_rx).expect("reflector");

    wait_for(&store, |s| s.current().resource_version.as_deref() == Some("20")).await;
    assert_eq!(sorted_uids(&store), vec![2, 3, 4]);
    // the second watch starts from the fresh list, never from the stale watermark
    wait_for(&store, |_| watched_from.lock().unwrap().len() >= 2).await;
    assert_eq!(watched_from.lock().unwrap().as_slice(), &["10", "20"]);

    let _ = stop_tx.send(true);
    tokio::time::timeout(Duration::from_secs(2), handle).await.expect("reflector stops").expect("join");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_end_restarts_from_list() {
    let source = ScriptedSource::new(
        vec![Ok(listing(&[1], "1")), Ok(listing(&[1, 5], "7"))],
        vec![WatchScript { events: vec![Ok(WatchEvent::Modified(pod(1, "2")))], hang: false }],
    );
    let calls = Arc::clone(&source.list_calls);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let (store, _handle) = spawn_reflector(source, fast_config(), stop_rx).expect("reflector");

    wait_for(&store, |s| s.current().resource_version.as_deref() == Some("7")).await;
    assert_eq!(sorted_uids(&store), vec![1, 5]);
    assert!(calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn periodic_relist_heals_dropped_events() {
    let source = ScriptedSource::new(vec![Ok(listing(&[1], "1")), Ok(listing(&[1, 2], "2"))], Vec::new());
    let mut cfg = fast_config();
    cfg.relist_interval = Duration::from_millis(50);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let (store, _handle) = spawn_reflector(source, cfg, stop_rx).expect("reflector");

    // the watch never delivers object 2; only the periodic relist can bring it in
    wait_for(&store, |s| s.current().contains(&uid(2))).await;
    assert_eq!(sorted_uids(&store), vec![1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_failures_are_retried_and_keep_last_snapshot() {
    let source = ScriptedSource::new(
        vec![
            Err(SourceError::Timeout { op: "list", secs: 1 }),
            Err(SourceError::Stream { code: 500, message: "boom".into() }),
            Ok(listing(&[4], "3")),
        ],
        Vec::new(),
    );
    let calls = Arc::clone(&source.list_calls);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let (store, _handle) = spawn_reflector(source, fast_config(), stop_rx).expect("reflector");

    assert!(store.is_empty());
    wait_for(&store, |s| s.len() == 1).await;
    assert_eq!(sorted_uids(&store), vec![4]);
    assert!(calls.load(Ordering::SeqCst) >= 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn buffered_events_land_in_one_consistent_snapshot() {
    let events = (10..30u8).map(|n| Ok(WatchEvent::Added(pod(n, &n.to_string())))).collect();
    let source = ScriptedSource::new(vec![Ok(listing(&[], "1"))], vec![WatchScript { events, hang: true }]);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let (store, _handle) = spawn_reflector(source, fast_config(), stop_rx).expect("reflector");

    wait_for(&store, |s| s.len() == 20).await;
    let snap = store.current();
    assert_eq!(snap.resource_version.as_deref(), Some("29"));
    assert_eq!(snap.len(), 20);
}

#[test]
fn inverted_backoff_bounds_are_rejected() {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
    rt.block_on(async {
        let mut cfg = fast_config();
        cfg.backoff_min = Duration::from_secs(10);
        cfg.backoff_max = Duration::from_secs(1);
        let (_tx, rx) = watch::channel(false);
        let source = ScriptedSource::new(Vec::new(), Vec::new());
        assert!(spawn_reflector::<Pod, _>(source, cfg, rx).is_err());
    });
}

/// How every watch opened against a `TimedSource` behaves.
#[derive(Clone, Copy)]
enum WatchMode {
    EndAtOnce,
    EndAfter(Duration),
    Reject,
}

/// Always lists the same objects and records when each list happened on the runtime clock.
struct TimedSource {
    mode: WatchMode,
    listed_at: Arc<Mutex<Vec<Instant>>>,
}

impl TimedSource {
    fn new(mode: WatchMode) -> (Self, Arc<Mutex<Vec<Instant>>>) {
        let listed_at = Arc::new(Mutex::new(Vec::new()));
        (Self { mode, listed_at: Arc::clone(&listed_at) }, listed_at)
    }
}

#[async_trait::async_trait]
impl ObjectSource<Pod> for TimedSource {
    fn kind(&self) -> &str { "pod" }

    async fn list(&self) -> Result<Listing<Pod>, SourceError> {
        self.listed_at.lock().unwrap().push(Instant::now());
        Ok(listing(&[1], "1"))
    }

    async fn watch(&self, _from_version: &str) -> Result<EventStream<Pod>, SourceError> {
        match self.mode {
            WatchMode::EndAtOnce => Ok(futures::stream::empty().boxed()),
            WatchMode::EndAfter(after) => Ok(futures::stream::once(tokio::time::sleep(after))
                .filter_map(|()| async { None::<Result<WatchEvent<Pod>, SourceError>> })
                .boxed()),
            WatchMode::Reject => Err(SourceError::Stream { code: 403, message: "forbidden".into() }),
        }
    }
}

fn clock_config() -> ReflectorConfig {
    ReflectorConfig {
        relist_interval: Duration::from_secs(600),
        request_timeout: Duration::from_secs(5),
        watch_idle_timeout: Duration::from_secs(600),
        backoff_min: Duration::from_secs(2),
        backoff_max: Duration::from_secs(60),
        min_healthy_watch: Duration::from_secs(10),
        max_batch: 16,
    }
}

fn gaps(times: &[Instant]) -> Vec<Duration> {
    times.windows(2).map(|w| w[1] - w[0]).collect()
}

async fn run_for(source: TimedSource, cfg: ReflectorConfig, span: Duration) {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (_store, handle) = spawn_reflector(source, cfg, stop_rx).expect("reflector");
    tokio::time::sleep(span).await;
    let _ = stop_tx.send(true);
    handle.await.expect("join");
}

#[tokio::test(start_paused = true)]
async fn watch_closing_at_once_does_not_spin_on_list() {
    let (source, listed_at) = TimedSource::new(WatchMode::EndAtOnce);
    run_for(source, clock_config(), Duration::from_secs(10)).await;

    let times = listed_at.lock().unwrap().clone();
    assert!((2..=4).contains(&times.len()), "listed {} times in 10s", times.len());
    assert!(gaps(&times).iter().all(|g| *g >= Duration::from_secs(2)));
}

#[tokio::test(start_paused = true)]
async fn rejected_watch_backs_off_from_two_seconds_and_grows() {
    let (source, listed_at) = TimedSource::new(WatchMode::Reject);
    run_for(source, clock_config(), Duration::from_secs(40)).await;

    let gaps = gaps(&listed_at.lock().unwrap());
    assert!(gaps.len() >= 3, "only {} retries", gaps.len());
    assert!(gaps[0] >= Duration::from_secs(2) && gaps[0] < Duration::from_secs(3));
    assert!(gaps.windows(2).all(|w| w[1] > w[0]), "delays did not grow: {gaps:?}");
}

#[tokio::test(start_paused = true)]
async fn long_lived_watch_relists_without_delay() {
    let (source, listed_at) = TimedSource::new(WatchMode::EndAfter(Duration::from_secs(15)));
    run_for(source, clock_config(), Duration::from_secs(50)).await;

    let gaps = gaps(&listed_at.lock().unwrap());
    assert!(gaps.len() >= 2);
    assert!(gaps.iter().all(|g| *g >= Duration::from_secs(15) && *g < Duration::from_secs(16)), "{gaps:?}");
}
