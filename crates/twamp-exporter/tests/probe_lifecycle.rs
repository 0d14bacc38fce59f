//! Lifecycle tests for the session cache and prober, driven through a
//! scriptable measurement client.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use twamp_core::{Error, MeasurementClient, MeasurementSession, Result, RunStatistics};
use twamp_exporter::cache::SessionCache;
use twamp_exporter::metrics::{render_probe, ExporterMetrics};
use twamp_exporter::prober::{Prober, ProberConfig};
use twamp_exporter::server::{build_router, AppState};

/// How the fake session behaves on its next run.
#[derive(Clone, Copy, Debug)]
enum RunBehavior {
    /// Complete normally with canned statistics
    Succeed,
    /// Fail with a connection-closed error
    Broken,
    /// Fail with an undecodable-result error
    Reject,
    /// Block until cancelled
    Hang,
}

struct Shared {
    connects: AtomicUsize,
    closes: AtomicUsize,
    fail_connect: AtomicBool,
    behavior: Mutex<RunBehavior>,
    run_duration: Mutex<Duration>,
    runs: Mutex<Vec<(String, Instant, Instant)>>,
}

#[derive(Clone)]
struct FakeClient {
    shared: Arc<Shared>,
}

impl FakeClient {
    fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                fail_connect: AtomicBool::new(false),
                behavior: Mutex::new(RunBehavior::Succeed),
                run_duration: Mutex::new(Duration::ZERO),
                runs: Mutex::new(Vec::new()),
            }),
        }
    }

    fn set_behavior(&self, behavior: RunBehavior) {
        *self.shared.behavior.lock().unwrap() = behavior;
    }

    fn set_run_duration(&self, duration: Duration) {
        *self.shared.run_duration.lock().unwrap() = duration;
    }

    fn fail_connects(&self, fail: bool) {
        self.shared.fail_connect.store(fail, Ordering::SeqCst);
    }

    fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    fn runs(&self) -> Vec<(String, Instant, Instant)> {
        self.shared.runs.lock().unwrap().clone()
    }
}

struct FakeSession {
    target: String,
    shared: Arc<Shared>,
}

fn sample_stats() -> RunStatistics {
    RunStatistics {
        min: Duration::from_micros(3400),
        max: Duration::from_micros(6900),
        avg: Duration::from_micros(4600),
        stddev: Duration::from_micros(1980),
        sent: 3,
        received: 3,
        loss: 0.0,
    }
}

#[async_trait]
impl MeasurementClient for FakeClient {
    type Session = FakeSession;

    async fn connect(&self, target: &str) -> Result<FakeSession> {
        if self.shared.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::ConnectFailed(
                target.to_string(),
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
            ));
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            target: target.to_string(),
            shared: Arc::clone(&self.shared),
        })
    }
}

#[async_trait]
impl MeasurementSession for FakeSession {
    async fn run(
        &mut self,
        _count: u32,
        _spacing: Duration,
        cancel: &CancellationToken,
    ) -> Result<RunStatistics> {
        let behavior = *self.shared.behavior.lock().unwrap();
        let pause = *self.shared.run_duration.lock().unwrap();
        let started = Instant::now();

        match behavior {
            RunBehavior::Hang => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(600)) => Err(Error::Timeout),
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                }
            }
            RunBehavior::Broken => Err(Error::ConnectionClosed),
            RunBehavior::Reject => Err(Error::InvalidMessage("unparsable result".to_string())),
            RunBehavior::Succeed => {
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
                self.shared
                    .runs
                    .lock()
                    .unwrap()
                    .push((self.target.clone(), started, Instant::now()));
                Ok(sample_stats())
            }
        }
    }

    async fn close(&mut self) {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn build_prober(
    client: &FakeClient,
    config: ProberConfig,
) -> (Arc<SessionCache<FakeClient>>, Arc<Prober<FakeClient>>) {
    let cache = Arc::new(SessionCache::new(client.clone()));
    let prober = Arc::new(Prober::new(Arc::clone(&cache), config));
    (cache, prober)
}

#[tokio::test]
async fn sequential_probes_reuse_the_session() {
    let client = FakeClient::new();
    let (cache, prober) = build_prober(&client, ProberConfig::default());

    let first = prober.probe("192.168.100.1").await;
    let second = prober.probe("192.168.100.1").await;

    assert!(first.success);
    assert!(second.success);
    assert_eq!(client.connects(), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_probes_against_one_target_are_serialized() {
    let client = FakeClient::new();
    client.set_run_duration(Duration::from_millis(80));
    let (_cache, prober) = build_prober(&client, ProberConfig::default());

    let a = tokio::spawn({
        let prober = Arc::clone(&prober);
        async move { prober.probe("10.0.0.1").await }
    });
    let b = tokio::spawn({
        let prober = Arc::clone(&prober);
        async move { prober.probe("10.0.0.1").await }
    });

    assert!(a.await.unwrap().success);
    assert!(b.await.unwrap().success);
    assert_eq!(client.connects(), 1);

    let mut runs = client.runs();
    assert_eq!(runs.len(), 2);
    runs.sort_by_key(|(_, start, _)| *start);
    // The second run must not have started before the first finished.
    assert!(runs[0].2 <= runs[1].1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn probes_against_distinct_targets_run_in_parallel() {
    let client = FakeClient::new();
    client.set_run_duration(Duration::from_millis(200));
    let (_cache, prober) = build_prober(&client, ProberConfig::default());

    let a = tokio::spawn({
        let prober = Arc::clone(&prober);
        async move { prober.probe("10.0.0.1").await }
    });
    let b = tokio::spawn({
        let prober = Arc::clone(&prober);
        async move { prober.probe("10.0.0.2").await }
    });

    assert!(a.await.unwrap().success);
    assert!(b.await.unwrap().success);

    let runs = client.runs();
    assert_eq!(runs.len(), 2);
    let (_, start_a, end_a) = runs[0];
    let (_, start_b, end_b) = runs[1];
    // The runs overlapped; one target never waits on the other.
    assert!(start_a < end_b && start_b < end_a);
}

#[tokio::test]
async fn broken_session_is_evicted_and_recreated() {
    let client = FakeClient::new();
    let (cache, prober) = build_prober(&client, ProberConfig::default());

    client.set_behavior(RunBehavior::Broken);
    let failed = prober.probe("192.168.100.1").await;
    assert!(!failed.success);
    assert!(failed.stats.is_none());
    assert_eq!(client.closes(), 1);
    assert_eq!(cache.len(), 0);

    client.set_behavior(RunBehavior::Succeed);
    let recovered = prober.probe("192.168.100.1").await;
    assert!(recovered.success);
    assert_eq!(client.connects(), 2);
}

#[tokio::test]
async fn transient_failure_keeps_the_session() {
    let client = FakeClient::new();
    let (cache, prober) = build_prober(&client, ProberConfig::default());

    client.set_behavior(RunBehavior::Reject);
    let failed = prober.probe("192.168.100.1").await;
    assert!(!failed.success);
    assert_eq!(client.closes(), 0);
    assert_eq!(cache.len(), 1);

    client.set_behavior(RunBehavior::Succeed);
    let recovered = prober.probe("192.168.100.1").await;
    assert!(recovered.success);
    assert_eq!(client.connects(), 1);
}

#[tokio::test]
async fn deadline_bounds_a_hanging_run() {
    let client = FakeClient::new();
    client.set_behavior(RunBehavior::Hang);
    let (cache, prober) = build_prober(
        &client,
        ProberConfig {
            packet_count: 3,
            packet_spacing: Duration::from_millis(10),
            deadline: Duration::from_millis(200),
        },
    );

    let started = Instant::now();
    let outcome = prober.probe("192.168.100.1").await;

    assert!(!outcome.success);
    assert!(outcome.duration >= Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_secs(1));
    // A timed-out run does not condemn the session.
    assert_eq!(cache.len(), 1);
    assert_eq!(client.closes(), 0);
}

#[tokio::test]
async fn failed_setup_leaves_no_registry_entry() {
    let client = FakeClient::new();
    client.fail_connects(true);
    let (cache, prober) = build_prober(&client, ProberConfig::default());

    let outcome = prober.probe("192.168.100.1").await;
    assert!(!outcome.success);
    assert!(outcome.duration > Duration::ZERO);
    assert_eq!(client.connects(), 0);
    assert_eq!(client.closes(), 0);
    assert!(cache.is_empty());

    client.fail_connects(false);
    let recovered = prober.probe("192.168.100.1").await;
    assert!(recovered.success);
    assert_eq!(client.connects(), 1);
}

#[tokio::test]
async fn drain_closes_every_session() {
    let client = FakeClient::new();
    let (cache, prober) = build_prober(&client, ProberConfig::default());

    for target in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        assert!(prober.probe(target).await.success);
    }
    assert_eq!(cache.len(), 3);

    cache.drain_all().await;

    assert_eq!(client.closes(), 3);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn evicting_an_unknown_target_is_a_noop() {
    let client = FakeClient::new();
    let (cache, _prober) = build_prober(&client, ProberConfig::default());

    cache.evict("198.51.100.7").await;
    assert!(cache.is_empty());
    assert_eq!(client.closes(), 0);
}

#[tokio::test]
async fn successful_probe_renders_expected_exposition() {
    let client = FakeClient::new();
    let (_cache, prober) = build_prober(&client, ProberConfig::default());

    let outcome = prober.probe("192.168.100.1").await;
    let output = render_probe(&outcome).unwrap();

    assert!(output.contains("probe_success 1"));
    assert!(output.contains("probe_duration_seconds"));
    assert!(output.contains("twamp_duration_seconds{measurement=\"avg\"} 0.0046"));
    assert!(output.contains("twamp_probes_lost 0"));
}

fn test_app(client: &FakeClient) -> (axum::Router, Arc<ExporterMetrics>) {
    let cache = Arc::new(SessionCache::new(client.clone()));
    let prober = Arc::new(Prober::new(Arc::clone(&cache), ProberConfig::default()));
    let metrics = Arc::new(ExporterMetrics::new().unwrap());
    let app = build_router(AppState {
        prober,
        cache,
        metrics: Arc::clone(&metrics),
    });
    (app, metrics)
}

#[tokio::test]
async fn probe_endpoint_requires_a_target() {
    let client = FakeClient::new();
    let (app, metrics) = test_app(&client);

    let response = app
        .oneshot(Request::builder().uri("/probe").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    // No probe attempt is registered for a rejected request.
    assert_eq!(metrics.probe_count("success"), 0);
    assert_eq!(metrics.probe_count("failure"), 0);
    assert_eq!(client.connects(), 0);
}

#[tokio::test]
async fn probe_endpoint_serves_the_measurement() {
    let client = FakeClient::new();
    let (app, metrics) = test_app(&client);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/probe?target=192.168.100.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8_lossy(&body);
    assert!(body.contains("probe_success 1"));
    assert!(body.contains("twamp_duration_seconds{measurement=\"avg\"} 0.0046"));
    assert_eq!(metrics.probe_count("success"), 1);
}

#[tokio::test]
async fn metrics_and_index_endpoints_respond() {
    let client = FakeClient::new();
    let (app, _metrics) = test_app(&client);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&body).contains("twamp_exporter_sessions_active"));

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&body).contains("TWAMP Exporter"));
}
