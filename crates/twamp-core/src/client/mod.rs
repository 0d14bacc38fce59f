//! Client traits and the concrete TWAMP implementation.
//!
//! The exporter core is generic over [`MeasurementClient`] /
//! [`MeasurementSession`]; [`TwampClient`] is the production
//! implementation wired in by the binary.

mod control;
pub(crate) mod wire;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::control::ControlConnection;
use crate::client::test::TestStream;
use crate::client::wire::SessionRequest;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::stats::RunStatistics;
use crate::Result;

/// Creates measurement sessions against remote targets.
#[async_trait]
pub trait MeasurementClient: Send + Sync + 'static {
    /// Established session type produced by this client
    type Session: MeasurementSession;

    /// Establishes a control connection to `target` and negotiates a
    /// reusable test session on it.
    async fn connect(&self, target: &str) -> Result<Self::Session>;
}

/// One established, reusable measurement session.
///
/// A session is not safe for concurrent runs; callers serialize access.
#[async_trait]
pub trait MeasurementSession: Send + Sync + 'static {
    /// Executes a bounded run of `count` exchanges spaced by `spacing`.
    ///
    /// The run honors `cancel` promptly, both between exchanges and while
    /// waiting for a reply. Returns [`Error::Timeout`] when not a single
    /// reply arrived.
    async fn run(
        &mut self,
        count: u32,
        spacing: Duration,
        cancel: &CancellationToken,
    ) -> Result<RunStatistics>;

    /// Stops the session and releases its resources. Best effort; errors
    /// are absorbed because the caller is discarding the session anyway.
    async fn close(&mut self);
}

/// TWAMP client speaking unauthenticated control and test exchanges.
#[derive(Debug, Clone)]
pub struct TwampClient {
    config: ClientConfig,
}

impl TwampClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MeasurementClient for TwampClient {
    type Session = TwampSession;

    async fn connect(&self, target: &str) -> Result<TwampSession> {
        let mut control = ControlConnection::connect(target, &self.config).await?;

        let test = TestStream::bind(
            self.config.sender_port,
            self.config.padding as usize,
            self.config.reply_timeout,
        )
        .await?;

        let request = SessionRequest {
            sender_port: test.local_port()?,
            receiver_port: self.config.reflector_port,
            padding: self.config.padding,
            timeout: self.config.reply_timeout,
            dscp: self.config.dscp,
        };
        let reflector = control.negotiate_session(request).await?;
        test.connect(reflector).await?;

        Ok(TwampSession { control, test })
    }
}

/// An established TWAMP session: the control connection plus the test
/// stream negotiated on it.
pub struct TwampSession {
    control: ControlConnection,
    test: TestStream,
}

#[async_trait]
impl MeasurementSession for TwampSession {
    async fn run(
        &mut self,
        count: u32,
        spacing: Duration,
        cancel: &CancellationToken,
    ) -> Result<RunStatistics> {
        let samples = self.test.run(count, spacing, cancel).await?;
        RunStatistics::from_samples(&samples, count).ok_or(Error::Timeout)
    }

    async fn close(&mut self) {
        if let Err(e) = self.control.stop_sessions().await {
            debug!("stop-sessions failed during teardown: {}", e);
        }
    }
}
