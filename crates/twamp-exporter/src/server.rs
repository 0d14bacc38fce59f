//! HTTP surface of the exporter.
//!
//! Three routes: `/probe` runs a measurement against the requested
//! target, `/metrics` exposes the exporter's own metrics and `/` serves a
//! small form for manual probing.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tracing::{error, info};

use twamp_core::MeasurementClient;

use crate::cache::SessionCache;
use crate::metrics::{self, ExporterMetrics};
use crate::prober::Prober;

const INDEX_PAGE: &str = r#"<html>
<head><title>TWAMP Exporter</title></head>
<body>
<h1>TWAMP Exporter</h1>
<form action="/probe">
Target: <input name="target" value="192.168.100.1">
<input type="submit" value="Probe">
</form>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>
"#;

/// Shared handler state: the prober, the registry it probes through and
/// the exporter's own metrics.
pub struct AppState<C: MeasurementClient> {
    pub prober: Arc<Prober<C>>,
    pub cache: Arc<SessionCache<C>>,
    pub metrics: Arc<ExporterMetrics>,
}

// Manual impl: deriving would demand C: Clone, which the state never needs.
impl<C: MeasurementClient> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            prober: Arc::clone(&self.prober),
            cache: Arc::clone(&self.cache),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Builds the exporter's router.
pub fn build_router<C: MeasurementClient>(state: AppState<C>) -> Router {
    Router::new()
        .route("/probe", get(probe_handler::<C>))
        .route("/metrics", get(metrics_handler::<C>))
        .route("/", get(index_handler::<C>))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ProbeParams {
    target: Option<String>,
}

async fn probe_handler<C: MeasurementClient>(
    State(state): State<AppState<C>>,
    Query(params): Query<ProbeParams>,
) -> Response {
    state.metrics.request_served("probe");

    let Some(target) = params.target.filter(|t| !t.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "target parameter is required").into_response();
    };

    let outcome = state.prober.probe(&target).await;
    state.metrics.probe_completed(outcome.success);
    state.metrics.set_sessions_active(state.cache.len());

    match metrics::render_probe(&outcome) {
        Ok(body) => (
            [(header::CONTENT_TYPE, metrics::EXPOSITION_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("failed to encode probe result for {}: {}", target, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to encode probe result",
            )
                .into_response()
        }
    }
}

async fn metrics_handler<C: MeasurementClient>(State(state): State<AppState<C>>) -> Response {
    state.metrics.request_served("metrics");
    state.metrics.set_sessions_active(state.cache.len());

    match state.metrics.encode_text() {
        Ok(body) => (
            [(header::CONTENT_TYPE, metrics::EXPOSITION_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("failed to encode exporter metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to encode exporter metrics",
            )
                .into_response()
        }
    }
}

async fn index_handler<C: MeasurementClient>(State(state): State<AppState<C>>) -> Html<&'static str> {
    state.metrics.request_served("index");
    Html(INDEX_PAGE)
}

/// Resolves when the process receives an interrupt or terminate signal.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to listen for ctrl-c: {}", e);
            }
        }
        () = terminate => {}
    }

    info!("shutdown signal received");
}
