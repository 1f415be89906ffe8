//! Protocol constants shared by both sides of the snapshot codec.

/// How many decoded snapshots (and per-entity baselines) the client keeps.
///
/// The server may only reference baselines inside this window; a delta
/// against anything older is a protocol violation.
pub const SNAPSHOT_DELTA_CACHE_SIZE: usize = 32;

/// Fixed size of the per-entity field image buffers.
///
/// Buffers are allocated at slot creation so steady-state decoding is
/// allocation-free.
pub const MAX_ENTITY_SNAPSHOT_DATA_SIZE: usize = 512;

/// Upper bound on the entity table, enforced while decoding spawn ids.
pub const MAX_ENTITIES: usize = 4096;
