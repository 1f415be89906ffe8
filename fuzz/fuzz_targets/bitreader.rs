#![no_main]

use bitstream::{
    BitReader, CompressionModel, DeltaContext, InputStream, RawStreamCodec, StreamCodec,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Raw bit reader: every operation must be bounded and panic-free.
    let mut reader = BitReader::new(data);
    let _ = reader.read_bool();
    for bits in [1u8, 7, 8, 17, 32] {
        let _ = reader.read_bits(bits);
    }
    let mut dst = [0u8; 32];
    let _ = reader.read_bytes(&mut dst);
    let _ = reader.align_to_byte();

    // Packed operations through the stream interface.
    let model = CompressionModel::from_blob(data);
    let mut input = RawStreamCodec::input(&model, data);
    let _ = input.read_packed_uint(DeltaContext::new(0));
    let _ = input.read_packed_int_delta(-1, DeltaContext::new(1));
    let _ = input.read_raw_bits(13);
});
