//! Message codecs for unauthenticated TWAMP control and test exchanges.

use std::time::{Duration, SystemTime};

use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::Result;

/// Mode bit for unauthenticated operation
pub const MODE_UNAUTHENTICATED: u32 = 0x0001;

/// Accept field value signalling success
pub const ACCEPT_OK: u8 = 0;

/// Command number for Start-Sessions
pub const CMD_START_SESSIONS: u8 = 2;

/// Command number for Stop-Sessions
pub const CMD_STOP_SESSIONS: u8 = 3;

/// Command number for Request-TW-Session
pub const CMD_REQUEST_TW_SESSION: u8 = 5;

/// Size of the Server Greeting message
pub const GREETING_LEN: usize = 64;

/// Size of the Set-Up-Response message
pub const SETUP_RESPONSE_LEN: usize = 164;

/// Size of the Server-Start message
pub const SERVER_START_LEN: usize = 48;

/// Size of the Request-TW-Session message
pub const REQUEST_SESSION_LEN: usize = 112;

/// Size of the Accept-Session message
pub const ACCEPT_SESSION_LEN: usize = 48;

/// Size of Start-Sessions, Start-Ack and Stop-Sessions messages
pub const COMMAND_LEN: usize = 32;

/// Minimum size of an unauthenticated reflected test packet
pub const REFLECTED_MIN_LEN: usize = 41;

/// Fixed part of an unauthenticated sender test packet
pub const SENDER_HEADER_LEN: usize = 14;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970)
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Error estimate advertised in sender packets: multiplier 1, unsynchronized
const ERROR_ESTIMATE: u16 = 0x0001;

/// NTP-format timestamp as carried in TWAMP messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpTimestamp {
    /// Seconds since 1900-01-01
    pub seconds: u32,
    /// Fractional seconds, units of 2^-32 s
    pub fraction: u32,
}

impl NtpTimestamp {
    /// Current wall-clock time in NTP format
    pub fn now() -> Self {
        let unix = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_unix(unix)
    }

    /// Converts a duration since the Unix epoch
    pub fn from_unix(since_epoch: Duration) -> Self {
        let seconds = (since_epoch.as_secs() + NTP_UNIX_OFFSET) as u32;
        let fraction = ((u64::from(since_epoch.subsec_nanos()) << 32) / 1_000_000_000) as u32;
        Self { seconds, fraction }
    }

    fn put(self, buf: &mut impl BufMut) {
        buf.put_u32(self.seconds);
        buf.put_u32(self.fraction);
    }

    fn get(buf: &mut impl Buf) -> Self {
        Self {
            seconds: buf.get_u32(),
            fraction: buf.get_u32(),
        }
    }
}

/// Server Greeting: the first message on a control connection
#[derive(Debug, Clone, Copy)]
pub struct ServerGreeting {
    /// Modes offered by the server (bit mask)
    pub modes: u32,
}

impl ServerGreeting {
    /// Parse a greeting from a full 64-byte message
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < GREETING_LEN {
            return Err(Error::InvalidMessage(format!(
                "greeting too short: {} bytes",
                buf.remaining()
            )));
        }
        buf.advance(12); // unused
        let modes = buf.get_u32();
        buf.advance(48); // challenge, salt, count, MBZ
        Ok(Self { modes })
    }
}

/// Builds the Set-Up-Response selecting unauthenticated mode
pub fn setup_response() -> BytesMut {
    let mut buf = BytesMut::with_capacity(SETUP_RESPONSE_LEN);
    buf.put_u32(MODE_UNAUTHENTICATED);
    buf.put_bytes(0, 80); // key id
    buf.put_bytes(0, 64); // token
    buf.put_bytes(0, 16); // client IV
    buf
}

/// Server-Start: the server's verdict on our mode selection
#[derive(Debug, Clone, Copy)]
pub struct ServerStart {
    /// Accept code, 0 on success
    pub accept: u8,
}

impl ServerStart {
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < SERVER_START_LEN {
            return Err(Error::InvalidMessage(format!(
                "server-start too short: {} bytes",
                buf.remaining()
            )));
        }
        buf.advance(15); // MBZ
        let accept = buf.get_u8();
        buf.advance(32); // server IV, start time, MBZ
        Ok(Self { accept })
    }
}

/// Parameters for one Request-TW-Session message
#[derive(Debug, Clone, Copy)]
pub struct SessionRequest {
    /// UDP port we will send test packets from
    pub sender_port: u16,
    /// UDP port we ask the reflector to listen on
    pub receiver_port: u16,
    /// Test packet padding in bytes
    pub padding: u32,
    /// Reflector-side session timeout
    pub timeout: Duration,
    /// Requested DSCP for test packets
    pub dscp: u8,
}

impl SessionRequest {
    /// Encodes the request. Sender and receiver addresses are left zero,
    /// which directs the reflector to use the control-connection endpoints.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(REQUEST_SESSION_LEN);
        buf.put_u8(CMD_REQUEST_TW_SESSION);
        buf.put_u8(4); // IPVN 4
        buf.put_u8(0); // conf-sender
        buf.put_u8(0); // conf-receiver
        buf.put_u32(0); // schedule slots
        buf.put_u32(0); // number of packets
        buf.put_u16(self.sender_port);
        buf.put_u16(self.receiver_port);
        buf.put_bytes(0, 16); // sender address
        buf.put_bytes(0, 16); // receiver address
        buf.put_bytes(0, 16); // SID, chosen by the server
        buf.put_u32(self.padding);
        buf.put_bytes(0, 8); // start time: immediately
        buf.put_u32(self.timeout.as_secs() as u32);
        buf.put_u32(0); // timeout fraction
        buf.put_u32(u32::from(self.dscp) << 2); // Type-P descriptor
        buf.put_bytes(0, 8); // MBZ
        buf.put_bytes(0, 16); // HMAC
        buf
    }
}

/// Accept-Session: the reflector's answer to a session request
#[derive(Debug, Clone, Copy)]
pub struct AcceptSession {
    /// Accept code, 0 on success
    pub accept: u8,
    /// UDP port the reflector will actually use
    pub port: u16,
    /// Session identifier assigned by the server
    pub sid: [u8; 16],
}

impl AcceptSession {
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < ACCEPT_SESSION_LEN {
            return Err(Error::InvalidMessage(format!(
                "accept-session too short: {} bytes",
                buf.remaining()
            )));
        }
        let accept = buf.get_u8();
        buf.advance(1); // MBZ
        let port = buf.get_u16();
        let mut sid = [0u8; 16];
        buf.copy_to_slice(&mut sid);
        buf.advance(28); // MBZ, HMAC
        Ok(Self { accept, port, sid })
    }
}

/// Builds a Start-Sessions command
pub fn start_sessions() -> BytesMut {
    let mut buf = BytesMut::with_capacity(COMMAND_LEN);
    buf.put_u8(CMD_START_SESSIONS);
    buf.put_bytes(0, 15); // MBZ
    buf.put_bytes(0, 16); // HMAC
    buf
}

/// Start-Ack: the server's answer to Start-Sessions
#[derive(Debug, Clone, Copy)]
pub struct StartAck {
    /// Accept code, 0 on success
    pub accept: u8,
}

impl StartAck {
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < COMMAND_LEN {
            return Err(Error::InvalidMessage(format!(
                "start-ack too short: {} bytes",
                buf.remaining()
            )));
        }
        let accept = buf.get_u8();
        buf.advance(31);
        Ok(Self { accept })
    }
}

/// Builds a Stop-Sessions command covering `sessions` sessions
pub fn stop_sessions(sessions: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(COMMAND_LEN);
    buf.put_u8(CMD_STOP_SESSIONS);
    buf.put_u8(ACCEPT_OK);
    buf.put_bytes(0, 2); // MBZ
    buf.put_u32(sessions);
    buf.put_bytes(0, 8); // MBZ
    buf.put_bytes(0, 16); // HMAC
    buf
}

/// Unauthenticated sender test packet
#[derive(Debug, Clone, Copy)]
pub struct SenderPacket {
    /// Sequence number within the session
    pub seq: u32,
    /// Send timestamp
    pub timestamp: NtpTimestamp,
}

impl SenderPacket {
    /// Encodes the packet followed by `padding` zero bytes
    pub fn encode(&self, padding: usize) -> BytesMut {
        let mut buf = BytesMut::with_capacity(SENDER_HEADER_LEN + padding);
        buf.put_u32(self.seq);
        self.timestamp.put(&mut buf);
        buf.put_u16(ERROR_ESTIMATE);
        buf.put_bytes(0, padding);
        buf
    }
}

/// Unauthenticated reflected test packet
#[derive(Debug, Clone, Copy)]
pub struct ReflectedPacket {
    /// Reflector-side sequence number
    pub seq: u32,
    /// Reflector send timestamp
    pub timestamp: NtpTimestamp,
    /// Reflector receive timestamp
    pub recv_timestamp: NtpTimestamp,
    /// Sequence number copied from the sender packet
    pub sender_seq: u32,
    /// Timestamp copied from the sender packet
    pub sender_timestamp: NtpTimestamp,
    /// TTL observed on the sender packet
    pub sender_ttl: u8,
}

impl ReflectedPacket {
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < REFLECTED_MIN_LEN {
            return Err(Error::InvalidMessage(format!(
                "reflected packet too short: {} bytes",
                buf.remaining()
            )));
        }
        let seq = buf.get_u32();
        let timestamp = NtpTimestamp::get(buf);
        buf.advance(2); // error estimate
        buf.advance(2); // MBZ
        let recv_timestamp = NtpTimestamp::get(buf);
        let sender_seq = buf.get_u32();
        let sender_timestamp = NtpTimestamp::get(buf);
        buf.advance(2); // sender error estimate
        buf.advance(2); // MBZ
        let sender_ttl = buf.get_u8();
        Ok(Self {
            seq,
            timestamp,
            recv_timestamp,
            sender_seq,
            sender_timestamp,
            sender_ttl,
        })
    }
}
