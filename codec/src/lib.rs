//! Delta-compressed snapshot encoding and decoding for snapwire.
//!
//! This crate ties bitstream, schema, and wire together into the snapshot
//! engine: the delta field codec, the entity table with its per-entity
//! baseline caches, the type registry, the prediction seam, and the
//! normative snapshot body reader/writer.
//!
//! # Design Principles
//!
//! - **Correctness first** - Desync-class conditions are structured errors,
//!   never silent drift.
//! - **No steady-state allocations** - Entity buffers are sized up front.
//! - **Deterministic** - Same inputs produce same outputs on both sides.

mod delta;
mod entity;
mod error;
mod hash;
mod limits;
mod predict;
mod snapshot;

pub use delta::{delta_read, delta_read_overwrite, delta_write};
pub use entity::{EntitySlot, EntityType, EntityTypeRegistry, SnapshotInfo, SnapshotState};
pub use error::{CodecError, CodecResult};
pub use hash::{mix, simple_hash, HASH_SEED};
pub use limits::{MAX_ENTITIES, MAX_ENTITY_SNAPSHOT_DATA_SIZE, SNAPSHOT_DELTA_CACHE_SIZE};
pub use predict::{CopyPredictor, PredictionInput, Predictor, MAX_PREDICTION_BASELINES};
pub use snapshot::{
    contexts, read_snapshot, write_snapshot, SnapshotSchemaRef, SnapshotSpawn, SnapshotStats,
    SnapshotUpdateRef, SnapshotWrite,
};
