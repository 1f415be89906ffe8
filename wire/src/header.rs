//! Package headers: sequence numbers, acks, and the content bitfield.

use bitstream::{DeltaContext, InputStream, OutputStream};

use crate::error::{WireError, WireResult};

/// Number of packages covered by the ack bitfield, including the acked
/// sequence itself.
pub const ACK_WINDOW: u32 = 16;

/// Entropy contexts owned by the package header.
pub mod contexts {
    use bitstream::DeltaContext;

    pub const CONTENT: DeltaContext = DeltaContext::new(1);
}

/// Declares which payload segments follow the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContentFlags(u16);

impl ContentFlags {
    /// Client configuration upload.
    pub const CLIENT_CONFIG: u16 = 1 << 0;
    /// Sliding window of recent commands.
    pub const COMMANDS: u16 = 1 << 1;
    /// Reliable game events.
    pub const EVENTS: u16 = 1 << 2;
    /// Session handshake info.
    pub const CLIENT_INFO: u16 = 1 << 3;
    /// Map reset payload.
    pub const MAP_INFO: u16 = 1 << 4;
    /// One snapshot body.
    pub const SNAPSHOT: u16 = 1 << 5;
    /// Continuation of an oversized package.
    pub const FRAGMENT: u16 = 1 << 6;

    /// Reserved bits mask (must be zero).
    const RESERVED_MASK: u16 = !0b111_1111;

    /// Creates empty flags.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates flags from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw flag bits.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Declares that a payload segment follows.
    pub fn add_message(&mut self, kind: u16) {
        self.0 |= kind;
    }

    /// Returns `true` if the given segment is declared.
    #[must_use]
    pub const fn contains(self, kind: u16) -> bool {
        self.0 & kind != 0
    }

    /// Returns `true` if no segments are declared.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if no reserved bits are set.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 & Self::RESERVED_MASK == 0
    }
}

/// A decoded package header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageHeader {
    /// Full 32-bit package sequence (expanded from the 16 wire bits).
    pub sequence: u32,
    /// The peer sequence this package acks; 0 when nothing is acked.
    pub ack_sequence: u32,
    /// Receipt bitfield: bit `i` set means `ack_sequence - i` arrived.
    pub ack_mask: u16,
    /// Declared payload segments.
    pub content: ContentFlags,
}

/// Expands a 16-bit wire sequence to the full value nearest `reference`.
#[must_use]
pub fn expand_sequence(reference: u32, lsb: u16) -> u32 {
    let base = reference & 0xFFFF_0000;
    let mut candidate = base | u32::from(lsb);
    if candidate.wrapping_add(0x8000) < reference {
        candidate = candidate.wrapping_add(0x1_0000);
    } else if candidate > reference.wrapping_add(0x8000) && candidate >= 0x1_0000 {
        candidate -= 0x1_0000;
    }
    candidate
}

/// Writes a package header.
///
/// Sequence numbers travel as their low 16 bits; the receiver re-expands
/// them against its own tracking state.
pub fn write_package_header<O: OutputStream>(
    out: &mut O,
    sequence: u32,
    ack_sequence: u32,
    ack_mask: u16,
    content: ContentFlags,
) -> WireResult<()> {
    if !content.is_valid() {
        return Err(WireError::InvalidContent {
            raw: content.raw(),
        });
    }
    out.write_raw_bits(sequence & 0xFFFF, 16)?;
    out.write_raw_bits(ack_sequence & 0xFFFF, 16)?;
    out.write_raw_bits(u32::from(ack_mask), 16)?;
    out.write_packed_uint(u32::from(content.raw()), contexts::CONTENT)?;
    Ok(())
}

/// Raw header fields before sequence tracking is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    pub sequence_lsb: u16,
    pub ack_sequence_lsb: u16,
    pub ack_mask: u16,
    pub content: ContentFlags,
}

/// Reads the raw header fields from an inbound package.
pub fn read_package_header<I: InputStream>(input: &mut I) -> WireResult<RawHeader> {
    let sequence_lsb = input.read_raw_bits(16)? as u16;
    let ack_sequence_lsb = input.read_raw_bits(16)? as u16;
    let ack_mask = input.read_raw_bits(16)? as u16;
    let content = ContentFlags::from_raw(input.read_packed_uint(contexts::CONTENT)? as u16);
    if !content.is_valid() {
        return Err(WireError::InvalidContent {
            raw: content.raw(),
        });
    }
    Ok(RawHeader {
        sequence_lsb,
        ack_sequence_lsb,
        ack_mask,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream::{CompressionModel, RawStreamCodec, StreamCodec};

    #[test]
    fn content_flags_accumulate() {
        let mut content = ContentFlags::empty();
        assert!(content.is_empty());
        content.add_message(ContentFlags::SNAPSHOT);
        content.add_message(ContentFlags::EVENTS);
        assert!(content.contains(ContentFlags::SNAPSHOT));
        assert!(content.contains(ContentFlags::EVENTS));
        assert!(!content.contains(ContentFlags::COMMANDS));
        assert!(!content.is_empty());
        assert!(content.is_valid());
    }

    #[test]
    fn content_flags_reserved_bits_invalid() {
        assert!(!ContentFlags::from_raw(0x8000).is_valid());
        assert!(ContentFlags::from_raw(0b111_1111).is_valid());
    }

    #[test]
    fn expand_sequence_identity_in_window() {
        assert_eq!(expand_sequence(100, 101), 101);
        assert_eq!(expand_sequence(100, 99), 99);
        assert_eq!(expand_sequence(0, 1), 1);
    }

    #[test]
    fn expand_sequence_across_wrap_forward() {
        assert_eq!(expand_sequence(0xFFFF, 0x0001), 0x1_0001);
        assert_eq!(expand_sequence(0x1_FFFE, 0x0002), 0x2_0002);
    }

    #[test]
    fn expand_sequence_across_wrap_backward() {
        assert_eq!(expand_sequence(0x1_0001, 0xFFFF), 0xFFFF);
    }

    #[test]
    fn header_roundtrip() {
        let model = CompressionModel::empty();
        let mut content = ContentFlags::empty();
        content.add_message(ContentFlags::SNAPSHOT);

        let mut buf = [0u8; 32];
        let mut out = RawStreamCodec::output(&model, &mut buf);
        write_package_header(&mut out, 0x1_0005, 0x2_0003, 0b1011, content).unwrap();
        let len = out.flush();

        let mut input = RawStreamCodec::input(&model, &buf[..len]);
        let raw = read_package_header(&mut input).unwrap();
        assert_eq!(raw.sequence_lsb, 0x0005);
        assert_eq!(raw.ack_sequence_lsb, 0x0003);
        assert_eq!(raw.ack_mask, 0b1011);
        assert_eq!(raw.content, content);

        assert_eq!(expand_sequence(0x1_0004, raw.sequence_lsb), 0x1_0005);
        assert_eq!(expand_sequence(0x2_0003, raw.ack_sequence_lsb), 0x2_0003);
    }

    #[test]
    fn write_rejects_reserved_content() {
        let model = CompressionModel::empty();
        let mut buf = [0u8; 32];
        let mut out = RawStreamCodec::output(&model, &mut buf);
        let err =
            write_package_header(&mut out, 1, 0, 0, ContentFlags::from_raw(0x4000)).unwrap_err();
        assert!(matches!(err, WireError::InvalidContent { .. }));
    }
}
