//! Error types for wire framing.

use std::fmt;

use bitstream::BitError;

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur during package framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Bit-level error while reading or writing a header.
    Bit(BitError),

    /// Content bitfield carries reserved bits.
    InvalidContent {
        /// The raw content value.
        raw: u16,
    },

    /// Package exceeds the configured size limit.
    PackageTooLarge {
        /// Actual size in bytes.
        actual: usize,
        /// Configured limit in bytes.
        limit: usize,
    },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bit(e) => write!(f, "bitstream error: {e}"),
            Self::InvalidContent { raw } => {
                write!(f, "content bitfield {raw:#06x} has reserved bits set")
            }
            Self::PackageTooLarge { actual, limit } => {
                write!(f, "package of {actual} bytes exceeds limit of {limit}")
            }
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bit(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BitError> for WireError {
    fn from(err: BitError) -> Self {
        Self::Bit(err)
    }
}
