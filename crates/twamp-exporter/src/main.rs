use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use twamp_core::{ClientConfig, TwampClient};
use twamp_exporter::cache::SessionCache;
use twamp_exporter::metrics::ExporterMetrics;
use twamp_exporter::prober::{Prober, ProberConfig};
use twamp_exporter::server::{build_router, shutdown_signal, AppState};

/// TWAMP exporter: round-trip latency probes for Prometheus
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on for scrape requests
    #[arg(long, default_value = "0.0.0.0:9853")]
    listen: SocketAddr,

    /// TWAMP control port on probed targets
    #[arg(long, default_value_t = 862)]
    control_port: u16,

    /// Measurement exchanges per probe
    #[arg(long, default_value_t = 3)]
    packet_count: u32,

    /// Seconds between measurement exchanges
    #[arg(long, default_value_t = 1)]
    packet_spacing: u64,

    /// Per-probe deadline in seconds
    #[arg(long, default_value_t = 5)]
    probe_timeout: u64,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    info!("twamp-exporter v{} starting", env!("CARGO_PKG_VERSION"));

    let client = TwampClient::new(ClientConfig {
        control_port: args.control_port,
        ..ClientConfig::default()
    });
    let cache = Arc::new(SessionCache::new(client));
    let prober = Arc::new(Prober::new(
        Arc::clone(&cache),
        ProberConfig {
            packet_count: args.packet_count,
            packet_spacing: Duration::from_secs(args.packet_spacing),
            deadline: Duration::from_secs(args.probe_timeout),
        },
    ));
    let metrics = Arc::new(ExporterMetrics::new()?);

    let app = build_router(AppState {
        prober,
        cache: Arc::clone(&cache),
        metrics,
    });

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!("listening on http://{}", args.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    // New requests have stopped; tear down every cached session before
    // the process exits.
    cache.drain_all().await;

    info!("exporter shut down cleanly");
    Ok(())
}
