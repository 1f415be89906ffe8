//! Deterministic schema hashing.

use blake3::Hasher;

use crate::field::FieldType;
use crate::schema::Schema;

/// Computes a deterministic identity hash for a schema.
///
/// Used to recognise repeated schema broadcasts for an already-interned
/// entity type; two schemas hash equal iff their wire forms are identical.
#[must_use]
pub fn schema_hash(schema: &Schema) -> u64 {
    let mut hasher = Hasher::new();
    write_u32(&mut hasher, schema.field_count() as u32);

    for field in schema.fields() {
        write_u8(&mut hasher, type_tag(field.field_type));
        write_u8(&mut hasher, field.bits);
        write_u16(&mut hasher, field.delta_context.id());
        write_u8(&mut hasher, u8::from(field.predicted));
        write_u8(&mut hasher, field.mask);
    }

    let hash = hasher.finalize();
    let bytes = hash.as_bytes();
    u64::from_le_bytes(bytes[0..8].try_into().unwrap())
}

fn type_tag(field_type: FieldType) -> u8 {
    match field_type {
        FieldType::Bool => 0,
        FieldType::UInt => 1,
        FieldType::Int => 2,
    }
}

fn write_u8(hasher: &mut Hasher, value: u8) {
    hasher.update(&[value]);
}

fn write_u16(hasher: &mut Hasher, value: u16) {
    hasher.update(&value.to_le_bytes());
}

fn write_u32(hasher: &mut Hasher, value: u32) {
    hasher.update(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldDef;
    use bitstream::DeltaContext;

    fn schema_ab() -> Schema {
        Schema::new(vec![
            FieldDef::bool(DeltaContext::new(1)),
            FieldDef::uint(8, DeltaContext::new(2)),
        ])
        .unwrap()
    }

    #[test]
    fn schema_hash_is_stable() {
        let schema = schema_ab();
        assert_eq!(schema_hash(&schema), schema_hash(&schema));
        assert_eq!(schema_hash(&schema), schema_hash(&schema_ab()));
    }

    #[test]
    fn schema_hash_changes_with_field_order() {
        let a = Schema::new(vec![
            FieldDef::bool(DeltaContext::new(1)),
            FieldDef::uint(8, DeltaContext::new(2)),
        ])
        .unwrap();
        let b = Schema::new(vec![
            FieldDef::uint(8, DeltaContext::new(2)),
            FieldDef::bool(DeltaContext::new(1)),
        ])
        .unwrap();
        assert_ne!(schema_hash(&a), schema_hash(&b));
    }

    #[test]
    fn schema_hash_changes_with_mask() {
        let a = Schema::new(vec![FieldDef::uint(8, DeltaContext::new(2))]).unwrap();
        let b = Schema::new(vec![FieldDef::uint(8, DeltaContext::new(2)).with_mask(1)]).unwrap();
        assert_ne!(schema_hash(&a), schema_hash(&b));
    }

    #[test]
    fn schema_hash_changes_with_predicted_flag() {
        let a = Schema::new(vec![FieldDef::uint(8, DeltaContext::new(2))]).unwrap();
        let b = Schema::new(vec![FieldDef::uint(8, DeltaContext::new(2)).predicted()]).unwrap();
        assert_ne!(schema_hash(&a), schema_hash(&b));
    }

    #[test]
    fn empty_schema_hashes() {
        let empty = Schema::new(Vec::new()).unwrap();
        // Stable, and distinct from a one-field schema.
        assert_eq!(schema_hash(&empty), schema_hash(&empty));
        assert_ne!(schema_hash(&empty), schema_hash(&schema_ab()));
    }
}
