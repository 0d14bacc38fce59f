//! Per-scrape probe orchestration.
//!
//! A probe acquires the target's session (creating it on first use),
//! executes one bounded measurement run under the request deadline and
//! classifies the result. Only a broken control connection evicts the
//! cached session; every other failure leaves it in place for the next
//! scrape, and retrying is left to the scrape interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use twamp_core::{MeasurementClient, MeasurementSession, RunStatistics};

use crate::cache::SessionCache;

/// Tunables for one probe.
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Measurement exchanges per run
    pub packet_count: u32,
    /// Gap between consecutive exchanges
    pub packet_spacing: Duration,
    /// Wall-clock budget for the whole probe, session setup included
    pub deadline: Duration,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            packet_count: 3,
            packet_spacing: Duration::from_secs(1),
            deadline: Duration::from_secs(5),
        }
    }
}

/// Result of one probe attempt.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Whether a full measurement run completed
    pub success: bool,
    /// Wall-clock time the probe took
    pub duration: Duration,
    /// Run statistics, present only on success
    pub stats: Option<RunStatistics>,
}

/// Runs measurement probes against cached sessions.
pub struct Prober<C: MeasurementClient> {
    cache: Arc<SessionCache<C>>,
    config: ProberConfig,
}

impl<C: MeasurementClient> Prober<C> {
    pub fn new(cache: Arc<SessionCache<C>>, config: ProberConfig) -> Self {
        Self { cache, config }
    }

    /// Probes `target` once. Never blocks past the configured deadline:
    /// waiting for the session lock, session setup and the run itself all
    /// count against the same budget, and on expiry the in-flight run is
    /// cancelled rather than awaited.
    pub async fn probe(&self, target: &str) -> ProbeOutcome {
        let started = Instant::now();

        let stats = match timeout(self.config.deadline, self.run_once(target)).await {
            Ok(stats) => stats,
            Err(_) => {
                warn!("probe deadline ({:?}) elapsed for {}", self.config.deadline, target);
                None
            }
        };

        let duration = started.elapsed();
        debug!("probe of {} finished in {:?} (success: {})", target, duration, stats.is_some());
        ProbeOutcome {
            success: stats.is_some(),
            duration,
            stats,
        }
    }

    async fn run_once(&self, target: &str) -> Option<RunStatistics> {
        let mut active = match self.cache.acquire(target).await {
            Ok(active) => active,
            Err(e) => {
                // Nothing was cached, so there is nothing to evict.
                warn!("session setup for {} failed: {}", target, e);
                return None;
            }
        };

        let cancel = CancellationToken::new();
        // Cancels the run if the deadline drops this future mid-flight;
        // after a normal return the late cancel has nothing to do.
        let _abort = cancel.clone().drop_guard();

        let run = active
            .session()
            .run(self.config.packet_count, self.config.packet_spacing, &cancel)
            .await;

        match run {
            Ok(stats) => Some(stats),
            Err(e) if e.is_connection_closed() => {
                warn!("session for {} broken, evicting: {}", target, e);
                self.cache.evict_active(active).await;
                None
            }
            Err(e) => {
                warn!("measurement run for {} failed: {}", target, e);
                None
            }
        }
    }
}
