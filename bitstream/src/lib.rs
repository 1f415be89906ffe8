//! Low-level bit packing and entropy stream primitives for snapwire.
//!
//! This crate provides bounded [`BitReader`] and [`BitWriter`] for bit-level
//! encoding and decoding, plus the [`InputStream`]/[`OutputStream`] traits
//! the protocol engine is generic over. The [`RawStreamCodec`] variant is
//! concrete here; entropy-coded variants bind to the same traits through a
//! server-supplied [`CompressionModel`].
//!
//! # Design Principles
//!
//! - **No unsafe code** - Safety is paramount.
//! - **Bounded operations** - All reads/writes are bounds-checked.
//! - **No domain knowledge** - This crate knows nothing about entities,
//!   snapshots, or packages.
//! - **Explicit errors** - All failures return structured errors, never panic.
//!
//! # Example
//!
//! ```
//! use bitstream::{BitReader, BitWriter};
//!
//! let mut buf = [0u8; 4];
//! let mut writer = BitWriter::new(&mut buf);
//! writer.write_bool(true).unwrap();
//! writer.write_bits(42, 7).unwrap();
//! let len = writer.flush();
//!
//! let mut reader = BitReader::new(&buf[..len]);
//! assert!(reader.read_bool().unwrap());
//! assert_eq!(reader.read_bits(7).unwrap(), 42);
//! ```

mod error;
mod reader;
mod stream;
mod writer;

pub use error::{BitError, BitResult};
pub use reader::BitReader;
pub use stream::{
    zigzag_decode, zigzag_encode, CompressionModel, DeltaContext, InputStream, OutputStream,
    RawInputStream, RawOutputStream, RawStreamCodec, StreamCodec, StreamKind,
};
pub use writer::BitWriter;
