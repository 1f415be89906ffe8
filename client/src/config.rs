//! Process-level client configuration.

use bitstream::StreamKind;

/// Default port used when the endpoint string omits one.
pub const DEFAULT_PORT: u16 = 7913;

/// Process-level configuration. Set at startup; no global mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Verbose session logging.
    pub debug: bool,
    /// Drop all inbound traffic (testing aid).
    pub block_in: bool,
    /// Drop all outbound traffic (testing aid).
    pub block_out: bool,
    /// Abort the session on protocol mismatch instead of warning.
    pub verify_protocol: bool,
    /// Entropy coder variant; must match the server.
    pub io_stream_type: StreamKind,
    /// Dotted protocol version; only the suffix after the last `.` is
    /// compared against the server's.
    pub protocol_version: String,
    /// Requested server simulation rate, uploaded in ClientConfig messages.
    pub server_update_rate: u32,
    /// Requested snapshot send rate, uploaded in ClientConfig messages.
    pub server_update_send_rate: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            debug: false,
            block_in: false,
            block_out: false,
            verify_protocol: true,
            io_stream_type: StreamKind::Raw,
            protocol_version: "build.1.a".to_string(),
            server_update_rate: 60,
            server_update_send_rate: 20,
        }
    }
}

/// Returns the part of a dotted protocol id that participates in the
/// compatibility check: the suffix after the last `.`.
#[must_use]
pub fn protocol_suffix(protocol_id: &str) -> &str {
    protocol_id.rsplit('.').next().unwrap_or(protocol_id)
}
