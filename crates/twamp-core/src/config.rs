use std::time::Duration;

/// Configuration for the TWAMP client.
///
/// The defaults mirror a conventional exporter deployment: control on the
/// well-known port, a fixed test port pair, and a small amount of packet
/// padding.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// TCP port of the TWAMP-Control listener on the target
    pub control_port: u16,

    /// Preferred local UDP port for sending test packets. If the port is
    /// already taken (concurrent sessions to several targets), an
    /// ephemeral port is used instead.
    pub sender_port: u16,

    /// UDP port we ask the reflector to receive test packets on. The
    /// reflector may answer with a different port in its accept message.
    pub reflector_port: u16,

    /// Padding appended to each test packet, in bytes
    pub padding: u32,

    /// How long to wait for each reflected test packet
    pub reply_timeout: Duration,

    /// Bound on each individual control-channel operation
    pub control_timeout: Duration,

    /// DSCP value carried in the session request (0 = best effort)
    pub dscp: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            control_port: 862,
            sender_port: 6667,
            reflector_port: 6667,
            padding: 42,
            reply_timeout: Duration::from_secs(2),
            control_timeout: Duration::from_secs(5),
            dscp: 0,
        }
    }
}
