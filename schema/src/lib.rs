//! Replication schemas for the snapwire protocol engine.
//!
//! A schema is the server-described field layout of one entity type: an
//! ordered list of field descriptors, each with an on-wire width, an entropy
//! context, a prediction flag, and a replication mask. This crate owns the
//! schema wire form and the two literal field-image operations the snapshot
//! codec is built on: copying one non-delta image into its canonical byte
//! layout, and skipping one image without storing it.
//!
//! # Design Principles
//!
//! - **No domain knowledge** - Schemas describe layouts, not entities.
//! - **Fixed canonical layout** - One little-endian u32 word per field.
//! - **Explicit errors** - All failures return structured errors, never panic.

mod error;
mod field;
mod hash;
mod schema;

pub use error::{SchemaError, SchemaResult};
pub use field::{sign_extend, FieldDef, FieldType, MASK_ALL};
pub use hash::schema_hash;
pub use schema::{contexts, Schema, FIELDS_CHANGED_BYTES, MAX_FIELDS_PER_SCHEMA};
