//! Error types for codec operations.

use std::fmt;

use bitstream::BitError;
use schema::SchemaError;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during snapshot/delta encoding/decoding.
///
/// Apart from [`CodecError::Bit`] and [`CodecError::Schema`], every variant
/// is a desync-class condition: continuing to decode would silently corrupt
/// the replicated state, so the session owner is expected to tear the
/// connection down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Bit-level error in the underlying stream.
    Bit(BitError),

    /// Schema-level error while reading a field image.
    Schema(SchemaError),

    /// Baseline sequence is not older than the snapshot or falls outside the
    /// delta cache window.
    InvalidBaseSequence {
        /// The snapshot's package sequence.
        sequence: u32,
        /// The offending baseline sequence.
        base_sequence: u32,
    },

    /// The snapshot record for a referenced baseline has been pruned.
    MissingSnapshotRecord {
        /// The referenced baseline sequence.
        base_sequence: u32,
    },

    /// An entity has no cached baseline at or below the referenced sequence.
    MissingBaseline {
        /// The entity id.
        entity: u32,
        /// The referenced baseline sequence.
        base_sequence: u32,
    },

    /// A spawn referenced an entity type that was never announced.
    UnknownEntityType {
        /// The unknown type id.
        type_id: u16,
    },

    /// A delta-coded entity id decoded to a value outside the entity table.
    InvalidEntityId {
        /// The decoded raw id.
        raw: i32,
    },

    /// The same id appeared twice in one snapshot's despawn list.
    DuplicateDespawn {
        /// The entity id.
        entity: u32,
    },

    /// An update arrived for an entity slot that is not live.
    UpdateForDeadEntity {
        /// The entity id.
        entity: u32,
    },

    /// The committed-entity checksum disagreed with the sender.
    EntityCountMismatch {
        /// Count transmitted by the sender.
        expected: u32,
        /// Count observed while committing.
        actual: u32,
    },

    /// A field image buffer is smaller than the schema requires.
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bit(e) => write!(f, "bitstream error: {e}"),
            Self::Schema(e) => write!(f, "schema error: {e}"),
            Self::InvalidBaseSequence {
                sequence,
                base_sequence,
            } => {
                write!(
                    f,
                    "invalid baseline {base_sequence} for snapshot {sequence}"
                )
            }
            Self::MissingSnapshotRecord { base_sequence } => {
                write!(f, "snapshot record {base_sequence} not in cache")
            }
            Self::MissingBaseline {
                entity,
                base_sequence,
            } => {
                write!(
                    f,
                    "entity {entity} has no baseline at or below {base_sequence}"
                )
            }
            Self::UnknownEntityType { type_id } => {
                write!(f, "unknown entity type {type_id}")
            }
            Self::InvalidEntityId { raw } => {
                write!(f, "invalid entity id {raw}")
            }
            Self::DuplicateDespawn { entity } => {
                write!(f, "entity {entity} despawned twice in one snapshot")
            }
            Self::UpdateForDeadEntity { entity } => {
                write!(f, "update for dead entity {entity}")
            }
            Self::EntityCountMismatch { expected, actual } => {
                write!(
                    f,
                    "entity count mismatch: sender wrote {expected}, committed {actual}"
                )
            }
            Self::BufferTooSmall { needed, available } => {
                write!(
                    f,
                    "buffer too small: needed {needed} bytes, {available} available"
                )
            }
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bit(e) => Some(e),
            Self::Schema(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BitError> for CodecError {
    fn from(err: BitError) -> Self {
        Self::Bit(err)
    }
}

impl From<SchemaError> for CodecError {
    fn from(err: SchemaError) -> Self {
        Self::Schema(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_missing_baseline() {
        let err = CodecError::MissingBaseline {
            entity: 3,
            base_sequence: 41,
        };
        let msg = err.to_string();
        assert!(msg.contains('3'), "should mention entity id");
        assert!(msg.contains("41"), "should mention baseline sequence");
    }

    #[test]
    fn error_display_entity_count_mismatch() {
        let err = CodecError::EntityCountMismatch {
            expected: 5,
            actual: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains('5'));
        assert!(msg.contains('4'));
    }

    #[test]
    fn error_from_bit_and_schema() {
        let bit: CodecError = BitError::UnexpectedEof {
            requested: 1,
            available: 0,
        }
        .into();
        assert!(matches!(bit, CodecError::Bit(_)));
        assert!(std::error::Error::source(&bit).is_some());

        let schema: CodecError = SchemaError::InvalidBitWidth { bits: 0 }.into();
        assert!(matches!(schema, CodecError::Schema(_)));
    }

    #[test]
    fn error_equality() {
        let a = CodecError::UnknownEntityType { type_id: 5 };
        let b = CodecError::UnknownEntityType { type_id: 5 };
        let c = CodecError::UnknownEntityType { type_id: 6 };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
