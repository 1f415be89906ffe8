//! Delta field codec: one field image against a baseline image.
//!
//! Per unmasked field the writer emits a single *changed* bit, then the new
//! value as a packed delta against the baseline field value in the field's
//! own entropy context. Fields outside the entity's replication mask consume
//! no wire bits at all and are forced to the baseline value.
//!
//! Both sides accumulate a running hash over the decoded field values
//! (masked fields included) so a desync is caught at the first diverging
//! entity rather than compounding silently.

use bitstream::{InputStream, OutputStream};
use schema::Schema;

use crate::error::{CodecError, CodecResult};
use crate::hash::{mix, HASH_SEED};

fn word(image: &[u8], index: usize) -> u32 {
    u32::from_le_bytes(image[index * 4..index * 4 + 4].try_into().unwrap())
}

fn set_word(image: &mut [u8], index: usize, value: u32) {
    image[index * 4..index * 4 + 4].copy_from_slice(&value.to_le_bytes());
}

fn check_len(image: &[u8], needed: usize) -> CodecResult<()> {
    if image.len() < needed {
        return Err(CodecError::BufferTooSmall {
            needed,
            available: image.len(),
        });
    }
    Ok(())
}

/// Writes `value` as a delta against `baseline`.
///
/// Returns the running hash of the field values the reader will decode.
pub fn delta_write<O: OutputStream>(
    out: &mut O,
    schema: &Schema,
    value: &[u8],
    baseline: &[u8],
    entity_mask: u8,
) -> CodecResult<u32> {
    let size = schema.byte_size();
    check_len(value, size)?;
    check_len(baseline, size)?;

    let mut hash = HASH_SEED;
    for (i, field) in schema.fields().iter().enumerate() {
        let base_value = word(baseline, i);
        if entity_mask & field.mask == 0 {
            hash = mix(hash, base_value);
            continue;
        }
        let new_value = word(value, i);
        let changed = new_value != base_value;
        out.write_raw_bits(u32::from(changed), 1)?;
        if changed {
            out.write_packed_int_delta(new_value as i32, base_value as i32, field.delta_context)?;
        }
        hash = mix(hash, new_value);
    }
    Ok(hash)
}

/// Decodes a delta in place: `image` holds the baseline on entry and the
/// fully-decoded field image on return.
///
/// `fields_changed` receives one bit per field (bit `i` of byte `i / 8`);
/// bits beyond the schema's field count are cleared. Returns the running
/// hash of the decoded field values.
pub fn delta_read_overwrite<I: InputStream>(
    input: &mut I,
    schema: &Schema,
    image: &mut [u8],
    fields_changed: &mut [u8],
    entity_mask: u8,
) -> CodecResult<u32> {
    let size = schema.byte_size();
    check_len(image, size)?;
    let mask_bytes = schema.field_count().div_ceil(8);
    check_len(fields_changed, mask_bytes)?;
    fields_changed[..mask_bytes].fill(0);

    let mut hash = HASH_SEED;
    for (i, field) in schema.fields().iter().enumerate() {
        let base_value = word(image, i);
        if entity_mask & field.mask == 0 {
            hash = mix(hash, base_value);
            continue;
        }
        let changed = input.read_raw_bits(1)? == 1;
        let new_value = if changed {
            let decoded =
                input.read_packed_int_delta(base_value as i32, field.delta_context)? as u32;
            set_word(image, i, decoded);
            fields_changed[i / 8] |= 1 << (i % 8);
            decoded
        } else {
            base_value
        };
        hash = mix(hash, new_value);
    }
    Ok(hash)
}

/// Decodes a delta against `baseline` into `dst`.
///
/// Convenience wrapper over [`delta_read_overwrite`] for callers that keep
/// the baseline intact.
pub fn delta_read<I: InputStream>(
    input: &mut I,
    schema: &Schema,
    baseline: &[u8],
    dst: &mut [u8],
    fields_changed: &mut [u8],
    entity_mask: u8,
) -> CodecResult<u32> {
    let size = schema.byte_size();
    check_len(baseline, size)?;
    check_len(dst, size)?;
    dst[..size].copy_from_slice(&baseline[..size]);
    delta_read_overwrite(input, schema, dst, fields_changed, entity_mask)
}
