//! Metric exposition.
//!
//! Two registries are involved: a fresh one per scrape carrying the
//! probe's result gauges, and a process-wide one served at `/metrics`
//! with the exporter's own counters.

use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use thiserror::Error;

use crate::prober::ProbeOutcome;

/// Errors that can occur while building or encoding metrics.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with Prometheus
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Failed to encode metrics output
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Content type of the text exposition format.
pub const EXPOSITION_CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// Renders one probe outcome as a metrics exposition document.
///
/// `probe_success` and `probe_duration_seconds` are always present. The
/// statistics gauges are registered only when the probe succeeded, so
/// their absence itself signals that no measurement was obtained.
pub fn render_probe(outcome: &ProbeOutcome) -> MetricsResult<String> {
    let registry = Registry::new();

    let probe_success = Gauge::new(
        "probe_success",
        "Displays whether or not the probe was successful",
    )?;
    let probe_duration = Gauge::new("probe_duration_seconds", "Duration of the probe in seconds")?;
    registry.register(Box::new(probe_success.clone()))?;
    registry.register(Box::new(probe_duration.clone()))?;

    probe_duration.set(outcome.duration.as_secs_f64());

    if let Some(stats) = &outcome.stats {
        probe_success.set(1.0);

        let durations = GaugeVec::new(
            Opts::new(
                "twamp_duration_seconds",
                "min/max/avg/stddev of the measurement round trips",
            ),
            &["measurement"],
        )?;
        let lost = Gauge::new("twamp_probes_lost", "Lost probes per measurement")?;
        registry.register(Box::new(durations.clone()))?;
        registry.register(Box::new(lost.clone()))?;

        durations
            .with_label_values(&["min"])
            .set(stats.min.as_secs_f64());
        durations
            .with_label_values(&["max"])
            .set(stats.max.as_secs_f64());
        durations
            .with_label_values(&["avg"])
            .set(stats.avg.as_secs_f64());
        durations
            .with_label_values(&["stddev"])
            .set(stats.stddev.as_secs_f64());
        lost.set(stats.loss);
    }

    encode(&registry)
}

/// The exporter's own process-level metrics.
///
/// All metrics use interior mutability and the struct is cheap to clone
/// around handler state.
#[derive(Clone)]
pub struct ExporterMetrics {
    registry: Registry,
    http_requests_total: IntCounterVec,
    probes_total: IntCounterVec,
    sessions_active: IntGauge,
}

impl ExporterMetrics {
    /// Creates the process registry with all exporter metrics registered.
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "twamp_exporter_http_requests_total",
                "HTTP requests served, by endpoint",
            ),
            &["endpoint"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let probes_total = IntCounterVec::new(
            Opts::new(
                "twamp_exporter_probes_total",
                "Probe attempts, by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(probes_total.clone()))?;

        let sessions_active = IntGauge::new(
            "twamp_exporter_sessions_active",
            "Measurement sessions currently cached",
        )?;
        registry.register(Box::new(sessions_active.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            probes_total,
            sessions_active,
        })
    }

    /// Records a served HTTP request.
    pub fn request_served(&self, endpoint: &str) {
        self.http_requests_total
            .with_label_values(&[endpoint])
            .inc();
    }

    /// Records a finished probe attempt.
    pub fn probe_completed(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.probes_total.with_label_values(&[result]).inc();
    }

    /// Updates the cached-session gauge.
    pub fn set_sessions_active(&self, count: usize) {
        self.sessions_active.set(count as i64);
    }

    /// Probe attempts recorded for `result`; for tests.
    #[must_use]
    pub fn probe_count(&self, result: &str) -> u64 {
        self.probes_total.with_label_values(&[result]).get()
    }

    /// Encodes the process metrics in the text exposition format.
    pub fn encode_text(&self) -> MetricsResult<String> {
        encode(&self.registry)
    }
}

fn encode(registry: &Registry) -> MetricsResult<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
}
