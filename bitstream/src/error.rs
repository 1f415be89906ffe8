//! Error types for bitstream operations.

use std::fmt;

/// Result type for bitstream operations.
pub type BitResult<T> = Result<T, BitError>;

/// Errors that can occur during bit-level encoding/decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitError {
    /// Attempted to read past the end of the buffer.
    UnexpectedEof {
        /// Number of bits requested.
        requested: usize,
        /// Number of bits available.
        available: usize,
    },

    /// Attempted to write more bits than the buffer can hold.
    WriteOverflow {
        /// Number of bits attempted to write.
        attempted: usize,
        /// Number of bits available.
        available: usize,
    },

    /// Invalid bit count for the operation.
    InvalidBitCount {
        /// The invalid bit count provided.
        bits: u8,
        /// Maximum allowed bits for this operation.
        max_bits: u8,
    },

    /// Value exceeds the range representable by the specified number of bits.
    ValueOutOfRange {
        /// The value that was out of range.
        value: u32,
        /// Number of bits available.
        bits: u8,
    },
}

impl fmt::Display for BitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof {
                requested,
                available,
            } => {
                write!(
                    f,
                    "unexpected EOF: requested {requested} bits, {available} available"
                )
            }
            Self::WriteOverflow {
                attempted,
                available,
            } => {
                write!(
                    f,
                    "write overflow: attempted {attempted} bits, {available} available"
                )
            }
            Self::InvalidBitCount { bits, max_bits } => {
                write!(f, "invalid bit count {bits}, maximum allowed is {max_bits}")
            }
            Self::ValueOutOfRange { value, bits } => {
                write!(f, "value {value} cannot be represented in {bits} bits")
            }
        }
    }
}

impl std::error::Error for BitError {}
