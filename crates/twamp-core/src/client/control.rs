//! TWAMP-Control connection handling.
//!
//! One control connection carries exactly one negotiated test session,
//! which is the shape the exporter consumes: connect, negotiate, then
//! reuse the session for run after run until it breaks.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::debug;

use crate::client::wire::{
    self, AcceptSession, ServerGreeting, ServerStart, SessionRequest, StartAck, ACCEPT_OK,
    MODE_UNAUTHENTICATED,
};
use crate::config::ClientConfig;
use crate::error::Error;
use crate::Result;

/// An established TWAMP-Control connection with one accepted session.
pub(crate) struct ControlConnection {
    stream: TcpStream,
    peer: SocketAddr,
    control_timeout: Duration,
}

impl ControlConnection {
    /// Connects to the target's control port and completes the greeting
    /// exchange in unauthenticated mode.
    pub(crate) async fn connect(target: &str, config: &ClientConfig) -> Result<Self> {
        let peer = resolve(target, config.control_port).await?;

        debug!("opening control connection to {} ({})", target, peer);
        let stream = match timeout(config.control_timeout, TcpStream::connect(peer)).await {
            Err(_) => return Err(Error::Timeout),
            Ok(Err(e)) => return Err(Error::ConnectFailed(target.to_string(), e)),
            Ok(Ok(stream)) => stream,
        };

        let mut conn = Self {
            stream,
            peer,
            control_timeout: config.control_timeout,
        };

        let greeting = ServerGreeting::parse(&mut conn.read_message(wire::GREETING_LEN).await?)?;
        if greeting.modes & MODE_UNAUTHENTICATED == 0 {
            return Err(Error::UnsupportedMode(greeting.modes));
        }

        conn.write_message(&wire::setup_response()).await?;

        let start = ServerStart::parse(&mut conn.read_message(wire::SERVER_START_LEN).await?)?;
        if start.accept != ACCEPT_OK {
            return Err(Error::SessionRejected(start.accept));
        }

        debug!("control connection to {} established", peer);
        Ok(conn)
    }

    /// Requests a reflector session and starts it. Returns the address
    /// test packets must be sent to.
    pub(crate) async fn negotiate_session(&mut self, request: SessionRequest) -> Result<SocketAddr> {
        self.write_message(&request.encode()).await?;

        let accept = AcceptSession::parse(&mut self.read_message(wire::ACCEPT_SESSION_LEN).await?)?;
        if accept.accept != ACCEPT_OK {
            return Err(Error::SessionRejected(accept.accept));
        }
        debug!("session accepted by {} on port {}", self.peer, accept.port);

        self.write_message(&wire::start_sessions()).await?;
        let ack = StartAck::parse(&mut self.read_message(wire::COMMAND_LEN).await?)?;
        if ack.accept != ACCEPT_OK {
            return Err(Error::StartRejected(ack.accept));
        }

        Ok(SocketAddr::new(self.peer.ip(), accept.port))
    }

    /// Tells the reflector the session is over. Best effort: the caller
    /// is tearing the connection down either way.
    pub(crate) async fn stop_sessions(&mut self) -> Result<()> {
        self.write_message(&wire::stop_sessions(1)).await
    }

    async fn read_message(&mut self, len: usize) -> Result<BytesMut> {
        let mut buf = BytesMut::zeroed(len);
        match timeout(self.control_timeout, self.stream.read_exact(&mut buf[..])).await {
            Err(_) => Err(Error::Timeout),
            Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::ConnectionClosed),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(_)) => Ok(buf),
        }
    }

    async fn write_message(&mut self, message: &[u8]) -> Result<()> {
        match timeout(self.control_timeout, self.stream.write_all(message)).await {
            Err(_) => Err(Error::Timeout),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(())) => Ok(()),
        }
    }
}

async fn resolve(target: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = lookup_host((target, port))
        .await
        .map_err(|e| Error::ConnectFailed(target.to_string(), e))?;
    addrs.next().ok_or_else(|| {
        Error::ConnectFailed(
            target.to_string(),
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved"),
        )
    })
}
