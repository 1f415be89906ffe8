//! Schema definition, validation, and the literal field-image operations.

use bitstream::{DeltaContext, InputStream, OutputStream};

use crate::error::{SchemaError, SchemaResult};
use crate::field::{sign_extend, FieldDef, FieldType};

/// Maximum number of fields a schema may declare.
pub const MAX_FIELDS_PER_SCHEMA: usize = 64;

/// Size in bytes of a per-field change bitmask.
pub const FIELDS_CHANGED_BYTES: usize = MAX_FIELDS_PER_SCHEMA / 8;

/// Entropy contexts owned by the schema wire form.
pub mod contexts {
    use bitstream::DeltaContext;

    pub const FIELD_COUNT: DeltaContext = DeltaContext::new(20);
    pub const FIELD_CONTEXT: DeltaContext = DeltaContext::new(21);
}

/// An ordered, immutable field layout.
///
/// The canonical byte layout of a field image is one little-endian 32-bit
/// word per field, so `byte_size` is fixed by the field count alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<FieldDef>,
}

impl Schema {
    /// Creates a schema from fields after validation.
    pub fn new(fields: Vec<FieldDef>) -> SchemaResult<Self> {
        if fields.len() > MAX_FIELDS_PER_SCHEMA {
            return Err(SchemaError::TooManyFields {
                count: fields.len(),
                max: MAX_FIELDS_PER_SCHEMA,
            });
        }
        for field in &fields {
            if field.bits == 0 || field.bits > 32 {
                return Err(SchemaError::InvalidBitWidth { bits: field.bits });
            }
            if matches!(field.field_type, FieldType::Bool) && field.bits != 1 {
                return Err(SchemaError::InvalidBoolWidth { bits: field.bits });
            }
        }
        Ok(Self { fields })
    }

    /// Returns the ordered field descriptors.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Returns the fixed size of the canonical field image in bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.fields.len() * 4
    }

    /// Returns the all-zero field image implied by this schema.
    #[must_use]
    pub fn zero_baseline(&self) -> Vec<u8> {
        vec![0u8; self.byte_size()]
    }

    /// Serialises the schema onto the wire.
    pub fn write<O: OutputStream>(&self, out: &mut O) -> SchemaResult<()> {
        out.write_packed_uint(self.fields.len() as u32, contexts::FIELD_COUNT)?;
        for field in &self.fields {
            out.write_raw_bits(u32::from(field.field_type.raw()), 2)?;
            out.write_raw_bits(u32::from(field.bits), 6)?;
            out.write_packed_uint(u32::from(field.delta_context.id()), contexts::FIELD_CONTEXT)?;
            out.write_raw_bits(u32::from(field.predicted), 1)?;
            out.write_raw_bits(u32::from(field.mask), 8)?;
        }
        Ok(())
    }

    /// Reads a schema from the wire.
    pub fn read<I: InputStream>(input: &mut I) -> SchemaResult<Self> {
        let count = input.read_packed_uint(contexts::FIELD_COUNT)? as usize;
        if count > MAX_FIELDS_PER_SCHEMA {
            return Err(SchemaError::TooManyFields {
                count,
                max: MAX_FIELDS_PER_SCHEMA,
            });
        }
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let raw_type = input.read_raw_bits(2)? as u8;
            let field_type =
                FieldType::from_raw(raw_type).ok_or(SchemaError::UnknownFieldType { raw: raw_type })?;
            let bits = input.read_raw_bits(6)? as u8;
            let delta_context = DeltaContext::new(input.read_packed_uint(contexts::FIELD_CONTEXT)? as u16);
            let predicted = input.read_raw_bits(1)? == 1;
            let mask = input.read_raw_bits(8)? as u8;
            fields.push(FieldDef {
                field_type,
                bits,
                delta_context,
                predicted,
                mask,
            });
        }
        Self::new(fields)
    }

    /// Reads one non-delta field image into its canonical byte layout.
    pub fn copy_fields_to_buffer<I: InputStream>(
        &self,
        input: &mut I,
        dst: &mut [u8],
    ) -> SchemaResult<()> {
        if dst.len() < self.byte_size() {
            return Err(SchemaError::BufferTooSmall {
                needed: self.byte_size(),
                available: dst.len(),
            });
        }
        for (i, field) in self.fields.iter().enumerate() {
            let value = read_field_value(field, input)?;
            dst[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }

    /// Consumes one non-delta field image without storing it.
    pub fn skip_fields<I: InputStream>(&self, input: &mut I) -> SchemaResult<()> {
        for field in &self.fields {
            read_field_value(field, input)?;
        }
        Ok(())
    }

    /// Writes one non-delta field image from its canonical byte layout.
    pub fn write_fields_from_buffer<O: OutputStream>(
        &self,
        src: &[u8],
        out: &mut O,
    ) -> SchemaResult<()> {
        if src.len() < self.byte_size() {
            return Err(SchemaError::BufferTooSmall {
                needed: self.byte_size(),
                available: src.len(),
            });
        }
        for (i, field) in self.fields.iter().enumerate() {
            let word = u32::from_le_bytes(src[i * 4..i * 4 + 4].try_into().unwrap());
            write_field_value(field, word, out)?;
        }
        Ok(())
    }
}

fn read_field_value<I: InputStream>(field: &FieldDef, input: &mut I) -> SchemaResult<u32> {
    let raw = input.read_raw_bits(field.bits)?;
    Ok(match field.field_type {
        FieldType::Bool | FieldType::UInt => raw,
        FieldType::Int => sign_extend(raw, field.bits) as u32,
    })
}

fn write_field_value<O: OutputStream>(field: &FieldDef, word: u32, out: &mut O) -> SchemaResult<()> {
    let raw = match field.field_type {
        FieldType::Bool | FieldType::UInt => word,
        // Sign bits above the field width are redundant.
        FieldType::Int => {
            if field.bits >= 32 {
                word
            } else {
                word & ((1u32 << field.bits) - 1)
            }
        }
    };
    out.write_raw_bits(raw, field.bits)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream::{CompressionModel, RawStreamCodec, StreamCodec};

    fn test_schema() -> Schema {
        Schema::new(vec![
            FieldDef::bool(DeltaContext::new(100)),
            FieldDef::uint(8, DeltaContext::new(101)),
            FieldDef::int(12, DeltaContext::new(102)).predicted(),
            FieldDef::uint(32, DeltaContext::new(103)).with_mask(0x01),
        ])
        .unwrap()
    }

    #[test]
    fn byte_size_is_four_per_field() {
        let schema = test_schema();
        assert_eq!(schema.field_count(), 4);
        assert_eq!(schema.byte_size(), 16);
        assert_eq!(schema.zero_baseline(), vec![0u8; 16]);
    }

    #[test]
    fn rejects_too_many_fields() {
        let fields = vec![FieldDef::bool(DeltaContext::new(0)); MAX_FIELDS_PER_SCHEMA + 1];
        let err = Schema::new(fields).unwrap_err();
        assert!(matches!(err, SchemaError::TooManyFields { .. }));
    }

    #[test]
    fn rejects_invalid_bit_width() {
        let err = Schema::new(vec![FieldDef::uint(0, DeltaContext::new(0))]).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidBitWidth { bits: 0 }));
        let err = Schema::new(vec![FieldDef::uint(33, DeltaContext::new(0))]).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidBitWidth { bits: 33 }));
    }

    #[test]
    fn rejects_wide_bool() {
        let bad = FieldDef::new(FieldType::Bool, 2, DeltaContext::new(0));
        let err = Schema::new(vec![bad]).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidBoolWidth { bits: 2 }));
    }

    #[test]
    fn schema_wire_roundtrip() {
        let schema = test_schema();
        let model = CompressionModel::empty();
        let mut buf = [0u8; 128];
        let mut out = RawStreamCodec::output(&model, &mut buf);
        schema.write(&mut out).unwrap();
        let len = out.flush();

        let mut input = RawStreamCodec::input(&model, &buf[..len]);
        let decoded = Schema::read(&mut input).unwrap();
        assert_eq!(decoded, schema);
    }

    #[test]
    fn field_image_roundtrip() {
        let schema = test_schema();
        let model = CompressionModel::empty();

        let mut image = vec![0u8; schema.byte_size()];
        image[0..4].copy_from_slice(&1u32.to_le_bytes());
        image[4..8].copy_from_slice(&200u32.to_le_bytes());
        image[8..12].copy_from_slice(&(-5i32 as u32).to_le_bytes());
        image[12..16].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());

        let mut buf = [0u8; 64];
        let mut out = RawStreamCodec::output(&model, &mut buf);
        schema.write_fields_from_buffer(&image, &mut out).unwrap();
        let len = out.flush();

        let mut input = RawStreamCodec::input(&model, &buf[..len]);
        let mut decoded = vec![0u8; schema.byte_size()];
        schema.copy_fields_to_buffer(&mut input, &mut decoded).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn skip_fields_consumes_same_bits() {
        let schema = test_schema();
        let model = CompressionModel::empty();

        let image = vec![0u8; schema.byte_size()];
        let mut buf = [0u8; 64];
        let mut out = RawStreamCodec::output(&model, &mut buf);
        schema.write_fields_from_buffer(&image, &mut out).unwrap();
        out.write_raw_bits(0b1011, 4).unwrap();
        let len = out.flush();

        let mut input = RawStreamCodec::input(&model, &buf[..len]);
        schema.skip_fields(&mut input).unwrap();
        assert_eq!(input.read_raw_bits(4).unwrap(), 0b1011);
    }

    #[test]
    fn image_buffer_too_small() {
        let schema = test_schema();
        let model = CompressionModel::empty();
        let mut buf = [0u8; 64];
        let mut out = RawStreamCodec::output(&model, &mut buf);
        let image = vec![0u8; 4];
        let err = schema.write_fields_from_buffer(&image, &mut out).unwrap_err();
        assert!(matches!(err, SchemaError::BufferTooSmall { .. }));
    }

    #[test]
    fn negative_int_survives_narrow_width() {
        let schema = Schema::new(vec![FieldDef::int(8, DeltaContext::new(0))]).unwrap();
        let model = CompressionModel::empty();

        let image = (-128i32 as u32).to_le_bytes().to_vec();
        let mut buf = [0u8; 8];
        let mut out = RawStreamCodec::output(&model, &mut buf);
        schema.write_fields_from_buffer(&image, &mut out).unwrap();
        let len = out.flush();

        let mut input = RawStreamCodec::input(&model, &buf[..len]);
        let mut decoded = vec![0u8; 4];
        schema.copy_fields_to_buffer(&mut input, &mut decoded).unwrap();
        assert_eq!(
            i32::from_le_bytes(decoded.try_into().unwrap()),
            -128
        );
    }
}
