//! Entropy stream abstraction over the bit-level reader/writer.
//!
//! A package is encoded and decoded through one stream variant chosen
//! process-wide at startup. The variants share every raw operation and differ
//! only in how the `packed` operations spend bits: [`RawStreamCodec`] uses a
//! fixed bucket scheme and ignores its context, while entropy-coded variants
//! (Huffman, rANS) plug in behind the same traits using the per-context
//! tables of a server-supplied [`CompressionModel`].

use std::str::FromStr;

use crate::error::BitResult;
use crate::reader::BitReader;
use crate::writer::BitWriter;

/// A named entropy-coder state used for a specific field or header element.
///
/// Raw streams ignore the context; entropy-coded variants use it to select
/// the coding table inside the compression model. Both sides of the wire must
/// agree on the context for every packed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeltaContext(pub u16);

impl DeltaContext {
    /// Creates a new context id.
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw context id.
    #[must_use]
    pub const fn id(self) -> u16 {
        self.0
    }
}

/// Stream variant selector. Must match the server's choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamKind {
    /// Fixed bucket coding, no model required.
    #[default]
    Raw,
    /// Static Huffman coding driven by the compression model.
    Huffman,
    /// Range-ANS coding driven by the compression model.
    Rans,
}

impl FromStr for StreamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "huffman" => Ok(Self::Huffman),
            "rans" => Ok(Self::Rans),
            other => Err(format!("unknown stream kind '{other}'")),
        }
    }
}

/// Opaque compression model delivered by the server during the handshake.
///
/// The blob layout belongs to the entropy coder; this type only carries the
/// bytes from the handshake to the stream constructors. It is built exactly
/// once per session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompressionModel {
    data: Vec<u8>,
}

impl CompressionModel {
    /// Creates a model from the handshake blob.
    #[must_use]
    pub fn from_blob(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    /// Creates an empty model, valid for the Raw variant only.
    #[must_use]
    pub const fn empty() -> Self {
        Self { data: Vec::new() }
    }

    /// Returns the raw model bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the blob length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no blob was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Decoding side of a stream variant.
pub trait InputStream {
    /// Reads `bits` raw bits, `bits ∈ [1, 32]`, MSB first.
    fn read_raw_bits(&mut self, bits: u8) -> BitResult<u32>;

    /// Reads `dst.len()` raw bytes.
    fn read_raw_bytes(&mut self, dst: &mut [u8]) -> BitResult<()>;

    /// Reads an entropy-coded unsigned integer against the given context.
    fn read_packed_uint(&mut self, ctx: DeltaContext) -> BitResult<u32>;

    /// Reads a signed delta against `prev` in the given context.
    fn read_packed_int_delta(&mut self, prev: i32, ctx: DeltaContext) -> BitResult<i32>;

    /// Skips forward to the next byte boundary.
    fn align_to_byte(&mut self) -> BitResult<()>;

    /// Returns the current bit position.
    fn bit_position(&self) -> usize;
}

/// Encoding side of a stream variant.
pub trait OutputStream {
    /// Writes `bits` raw bits of `value`, `bits ∈ [1, 32]`, MSB first.
    fn write_raw_bits(&mut self, value: u32, bits: u8) -> BitResult<()>;

    /// Writes raw bytes.
    fn write_raw_bytes(&mut self, src: &[u8]) -> BitResult<()>;

    /// Writes an entropy-coded unsigned integer against the given context.
    fn write_packed_uint(&mut self, value: u32, ctx: DeltaContext) -> BitResult<()>;

    /// Writes `value` as a signed delta against `prev` in the given context.
    fn write_packed_int_delta(&mut self, value: i32, prev: i32, ctx: DeltaContext)
        -> BitResult<()>;

    /// Pads to the next byte boundary.
    fn align_to_byte(&mut self) -> BitResult<()>;

    /// Finishes the stream and returns the byte length written.
    fn flush(&mut self) -> usize;
}

/// A stream variant: a factory binding a compression model and a byte buffer
/// to concrete input/output streams. Selected once at startup; read and write
/// sides must agree.
pub trait StreamCodec {
    /// The input stream produced by this variant.
    type Input<'a>: InputStream;
    /// The output stream produced by this variant.
    type Output<'a>: OutputStream;

    /// Which [`StreamKind`] this codec implements.
    const KIND: StreamKind;

    /// Binds an input stream to a model and an inbound buffer.
    fn input<'a>(model: &'a CompressionModel, data: &'a [u8]) -> Self::Input<'a>;

    /// Binds an output stream to a model and an outbound buffer.
    fn output<'a>(model: &'a CompressionModel, buf: &'a mut [u8]) -> Self::Output<'a>;
}

/// Zig-zag maps signed values to unsigned so small magnitudes stay small.
#[must_use]
pub const fn zigzag_encode(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Inverse of [`zigzag_encode`].
#[must_use]
pub const fn zigzag_decode(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Bucket bit widths for the Raw packed scheme, indexed by a 2-bit selector.
const RAW_BUCKET_BITS: [u8; 4] = [4, 8, 16, 32];

/// The model-free stream variant.
///
/// Packed values are coded as a 2-bit bucket selector followed by the
/// smallest bucket that fits. Contexts are accepted and ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawStreamCodec;

impl StreamCodec for RawStreamCodec {
    type Input<'a> = RawInputStream<'a>;
    type Output<'a> = RawOutputStream<'a>;

    const KIND: StreamKind = StreamKind::Raw;

    fn input<'a>(_model: &'a CompressionModel, data: &'a [u8]) -> Self::Input<'a> {
        RawInputStream {
            reader: BitReader::new(data),
        }
    }

    fn output<'a>(_model: &'a CompressionModel, buf: &'a mut [u8]) -> Self::Output<'a> {
        RawOutputStream {
            writer: BitWriter::new(buf),
        }
    }
}

/// Input side of [`RawStreamCodec`].
#[derive(Debug)]
pub struct RawInputStream<'a> {
    reader: BitReader<'a>,
}

impl InputStream for RawInputStream<'_> {
    fn read_raw_bits(&mut self, bits: u8) -> BitResult<u32> {
        self.reader.read_bits(bits)
    }

    fn read_raw_bytes(&mut self, dst: &mut [u8]) -> BitResult<()> {
        self.reader.read_bytes(dst)
    }

    fn read_packed_uint(&mut self, _ctx: DeltaContext) -> BitResult<u32> {
        let bucket = self.reader.read_bits(2)? as usize;
        self.reader.read_bits(RAW_BUCKET_BITS[bucket])
    }

    fn read_packed_int_delta(&mut self, prev: i32, ctx: DeltaContext) -> BitResult<i32> {
        let diff = zigzag_decode(self.read_packed_uint(ctx)?);
        Ok(prev.wrapping_add(diff))
    }

    fn align_to_byte(&mut self) -> BitResult<()> {
        self.reader.align_to_byte()
    }

    fn bit_position(&self) -> usize {
        self.reader.bit_position()
    }
}

/// Output side of [`RawStreamCodec`].
#[derive(Debug)]
pub struct RawOutputStream<'a> {
    writer: BitWriter<'a>,
}

impl OutputStream for RawOutputStream<'_> {
    fn write_raw_bits(&mut self, value: u32, bits: u8) -> BitResult<()> {
        self.writer.write_bits(value, bits)
    }

    fn write_raw_bytes(&mut self, src: &[u8]) -> BitResult<()> {
        self.writer.write_bytes(src)
    }

    fn write_packed_uint(&mut self, value: u32, _ctx: DeltaContext) -> BitResult<()> {
        let bucket = RAW_BUCKET_BITS
            .iter()
            .position(|&bits| bits == 32 || value < (1u32 << bits))
            .unwrap_or(RAW_BUCKET_BITS.len() - 1);
        self.writer.write_bits(bucket as u32, 2)?;
        self.writer.write_bits(value, RAW_BUCKET_BITS[bucket])
    }

    fn write_packed_int_delta(
        &mut self,
        value: i32,
        prev: i32,
        ctx: DeltaContext,
    ) -> BitResult<()> {
        let diff = value.wrapping_sub(prev);
        self.write_packed_uint(zigzag_encode(diff), ctx)
    }

    fn align_to_byte(&mut self) -> BitResult<()> {
        self.writer.align_to_byte()
    }

    fn flush(&mut self) -> usize {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: DeltaContext = DeltaContext::new(7);

    fn roundtrip_uint(value: u32) -> u32 {
        let model = CompressionModel::empty();
        let mut buf = [0u8; 16];
        let mut out = RawStreamCodec::output(&model, &mut buf);
        out.write_packed_uint(value, CTX).unwrap();
        let len = out.flush();

        let mut input = RawStreamCodec::input(&model, &buf[..len]);
        input.read_packed_uint(CTX).unwrap()
    }

    #[test]
    fn zigzag_roundtrip() {
        for value in [0, 1, -1, 2, -2, i32::MAX, i32::MIN, 1000, -1000] {
            assert_eq!(zigzag_decode(zigzag_encode(value)), value);
        }
    }

    #[test]
    fn zigzag_small_magnitudes_stay_small() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
    }

    #[test]
    fn packed_uint_roundtrip_bucket_boundaries() {
        for value in [0, 1, 15, 16, 255, 256, 65_535, 65_536, u32::MAX] {
            assert_eq!(roundtrip_uint(value), value);
        }
    }

    #[test]
    fn packed_uint_small_value_uses_small_bucket() {
        let model = CompressionModel::empty();
        let mut buf = [0u8; 16];
        let mut out = RawStreamCodec::output(&model, &mut buf);
        out.write_packed_uint(5, CTX).unwrap();
        // 2-bit selector + 4-bit payload = 6 bits, one byte after flush.
        assert_eq!(out.flush(), 1);
    }

    #[test]
    fn packed_int_delta_roundtrip() {
        let model = CompressionModel::empty();
        for (value, prev) in [(10, 7), (7, 10), (-5, 5), (i32::MAX, i32::MAX - 1), (0, 0)] {
            let mut buf = [0u8; 16];
            let mut out = RawStreamCodec::output(&model, &mut buf);
            out.write_packed_int_delta(value, prev, CTX).unwrap();
            let len = out.flush();

            let mut input = RawStreamCodec::input(&model, &buf[..len]);
            assert_eq!(input.read_packed_int_delta(prev, CTX).unwrap(), value);
        }
    }

    #[test]
    fn mixed_raw_and_packed_roundtrip() {
        let model = CompressionModel::empty();
        let mut buf = [0u8; 32];
        let mut out = RawStreamCodec::output(&model, &mut buf);
        out.write_raw_bits(0b101, 3).unwrap();
        out.write_packed_uint(300, CTX).unwrap();
        out.write_raw_bytes(&[1, 2, 3]).unwrap();
        out.write_packed_int_delta(-40, 2, CTX).unwrap();
        let len = out.flush();

        let mut input = RawStreamCodec::input(&model, &buf[..len]);
        assert_eq!(input.read_raw_bits(3).unwrap(), 0b101);
        assert_eq!(input.read_packed_uint(CTX).unwrap(), 300);
        let mut bytes = [0u8; 3];
        input.read_raw_bytes(&mut bytes).unwrap();
        assert_eq!(bytes, [1, 2, 3]);
        assert_eq!(input.read_packed_int_delta(2, CTX).unwrap(), -40);
    }

    #[test]
    fn stream_kind_parses_config_strings() {
        assert_eq!("raw".parse::<StreamKind>().unwrap(), StreamKind::Raw);
        assert_eq!(
            "Huffman".parse::<StreamKind>().unwrap(),
            StreamKind::Huffman
        );
        assert_eq!("rans".parse::<StreamKind>().unwrap(), StreamKind::Rans);
        assert!("lz4".parse::<StreamKind>().is_err());
    }

    #[test]
    fn compression_model_from_blob() {
        let model = CompressionModel::from_blob(&[1, 2, 3]);
        assert_eq!(model.data(), &[1, 2, 3]);
        assert_eq!(model.len(), 3);
        assert!(!model.is_empty());
        assert!(CompressionModel::empty().is_empty());
    }
}
