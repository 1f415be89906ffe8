//! Error types for the client session engine.

use std::fmt;

use bitstream::BitError;
use codec::CodecError;
use schema::SchemaError;
use wire::WireError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the session engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Bit-level error while decoding a package.
    Bit(BitError),

    /// Wire framing error.
    Wire(WireError),

    /// Schema error while decoding a package.
    Schema(SchemaError),

    /// Snapshot codec error; continuing would desync, the session is torn
    /// down.
    Codec(CodecError),

    /// The transport refused the connection.
    TransportFailed {
        /// The endpoint that was dialled.
        endpoint: String,
    },

    /// The endpoint string could not be parsed as `host[:port]`.
    InvalidEndpoint {
        /// The offending endpoint string.
        endpoint: String,
    },

    /// The server speaks a different protocol version.
    ProtocolMismatch {
        /// Our protocol suffix.
        ours: String,
        /// The server's protocol suffix.
        theirs: String,
    },

    /// The server re-sent its handshake with a different client id.
    ClientIdChanged {
        /// The id assigned first.
        old: u8,
        /// The id in the repeated handshake.
        new: u8,
    },

    /// A command was queued before a command schema was installed.
    NoCommandSchema,

    /// A command body exceeds the schema's image size.
    CommandTooLarge {
        /// Offered size in bytes.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Operation requires an established session.
    NotConnected,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bit(e) => write!(f, "bitstream error: {e}"),
            Self::Wire(e) => write!(f, "wire error: {e}"),
            Self::Schema(e) => write!(f, "schema error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::TransportFailed { endpoint } => {
                write!(f, "transport failed to connect to {endpoint}")
            }
            Self::InvalidEndpoint { endpoint } => {
                write!(f, "invalid endpoint '{endpoint}'")
            }
            Self::ProtocolMismatch { ours, theirs } => {
                write!(f, "protocol mismatch: client {ours}, server {theirs}")
            }
            Self::ClientIdChanged { old, new } => {
                write!(f, "server changed client id from {old} to {new}")
            }
            Self::NoCommandSchema => {
                write!(f, "no command schema installed")
            }
            Self::CommandTooLarge { size, max } => {
                write!(f, "command of {size} bytes exceeds maximum of {max}")
            }
            Self::NotConnected => write!(f, "not connected"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bit(e) => Some(e),
            Self::Wire(e) => Some(e),
            Self::Schema(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BitError> for ClientError {
    fn from(err: BitError) -> Self {
        Self::Bit(err)
    }
}

impl From<WireError> for ClientError {
    fn from(err: WireError) -> Self {
        Self::Wire(err)
    }
}

impl From<SchemaError> for ClientError {
    fn from(err: SchemaError) -> Self {
        Self::Schema(err)
    }
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_protocol_mismatch() {
        let err = ClientError::ProtocolMismatch {
            ours: "a".into(),
            theirs: "b".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains('a'));
        assert!(msg.contains('b'));
    }

    #[test]
    fn error_from_layers() {
        let bit: ClientError = BitError::UnexpectedEof {
            requested: 1,
            available: 0,
        }
        .into();
        assert!(matches!(bit, ClientError::Bit(_)));
        assert!(std::error::Error::source(&bit).is_some());

        let codec: ClientError = CodecError::UnknownEntityType { type_id: 1 }.into();
        assert!(matches!(codec, ClientError::Codec(_)));
    }
}
