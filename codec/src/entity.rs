//! The replicated entity table and the entity type registry.

use std::collections::HashMap;

use schema::{schema_hash, Schema, FIELDS_CHANGED_BYTES};
use wire::{SequenceBuffer, SparseSequenceBuffer};

use crate::limits::{MAX_ENTITY_SNAPSHOT_DATA_SIZE, SNAPSHOT_DELTA_CACHE_SIZE};

/// A server-announced entity type: its schema and the "schema zero" image
/// used as the delta reference for never-before-acked entities.
#[derive(Debug, Clone)]
pub struct EntityType {
    pub type_id: u16,
    pub schema: Schema,
    pub baseline: Vec<u8>,
}

/// Interns entity types by id. Once inserted, a type is immutable;
/// repeated announcements of a known id are ignored.
#[derive(Debug, Default)]
pub struct EntityTypeRegistry {
    types: HashMap<u16, EntityType>,
}

impl EntityTypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a type. Returns `false` when the id was already known.
    pub fn intern(&mut self, entity_type: EntityType) -> bool {
        match self.types.get(&entity_type.type_id) {
            Some(existing) => {
                debug_assert_eq!(
                    schema_hash(&existing.schema),
                    schema_hash(&entity_type.schema),
                    "repeated schema broadcast for type {} differs",
                    entity_type.type_id
                );
                false
            }
            None => {
                self.types.insert(entity_type.type_id, entity_type);
                true
            }
        }
    }

    /// Looks up a type by id.
    #[must_use]
    pub fn get(&self, type_id: u16) -> Option<&EntityType> {
        self.types.get(&type_id)
    }

    /// Returns the number of interned types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if no types are interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// One slot of the entity table.
///
/// All buffers are allocated once at slot creation and sized by
/// [`MAX_ENTITY_SNAPSHOT_DATA_SIZE`], so decoding never allocates.
#[derive(Debug)]
pub struct EntitySlot {
    type_id: Option<u16>,
    /// Server-chosen mask restricting which schema fields replicate here.
    pub field_mask: u8,
    /// Most recently delivered full field image.
    pub last_update: Vec<u8>,
    /// Package sequence `last_update` came from.
    pub last_update_sequence: u32,
    /// 0 while live; else the sequence whose snapshot despawned this slot.
    pub despawn_sequence: u32,
    /// Per-snapshot prediction scratch.
    pub prediction: Vec<u8>,
    /// Per-snapshot predictor change mask scratch.
    pub fields_changed_prediction: Vec<u8>,
    /// Decoded field images keyed by package sequence.
    pub baselines: SparseSequenceBuffer,
}

impl Default for EntitySlot {
    fn default() -> Self {
        Self::new()
    }
}

impl EntitySlot {
    /// Creates a free slot with its buffers eagerly allocated.
    #[must_use]
    pub fn new() -> Self {
        Self {
            type_id: None,
            field_mask: 0,
            last_update: vec![0u8; MAX_ENTITY_SNAPSHOT_DATA_SIZE],
            last_update_sequence: 0,
            despawn_sequence: 0,
            prediction: vec![0u8; MAX_ENTITY_SNAPSHOT_DATA_SIZE],
            fields_changed_prediction: vec![0u8; FIELDS_CHANGED_BYTES],
            baselines: SparseSequenceBuffer::new(
                SNAPSHOT_DELTA_CACHE_SIZE,
                MAX_ENTITY_SNAPSHOT_DATA_SIZE,
            ),
        }
    }

    /// The installed type id, or `None` while the slot is free.
    #[must_use]
    pub const fn type_id(&self) -> Option<u16> {
        self.type_id
    }

    /// Returns `true` if the slot holds an entity.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.type_id.is_some()
    }

    /// Frees the slot. Buffer allocations are retained for reuse.
    pub fn reset(&mut self) {
        self.type_id = None;
        self.field_mask = 0;
        self.last_update_sequence = 0;
        self.despawn_sequence = 0;
        self.baselines.clear_all();
    }

    /// Installs a freshly spawned entity into a free slot.
    pub fn spawn(&mut self, type_id: u16, field_mask: u8) {
        debug_assert!(!self.is_live(), "spawn into a live slot");
        self.reset();
        self.type_id = Some(type_id);
        self.field_mask = field_mask;
        self.last_update.fill(0);
    }
}

/// One snapshot record, keyed by inbound package sequence.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub server_time: i32,
}

/// The client's replicated view: the entity table, the consumer lists, the
/// snapshot record cache, and the server clock.
#[derive(Debug)]
pub struct SnapshotState {
    entities: Vec<EntitySlot>,
    /// Entity ids spawned by the latest decoded snapshot. Drained by the
    /// consumer.
    pub spawns: Vec<u32>,
    /// Entity ids despawned by the latest decoded snapshot. Drained by the
    /// consumer.
    pub despawns: Vec<u32>,
    /// Entity ids updated by the latest decoded snapshot. Drained by the
    /// consumer.
    pub updates: Vec<u32>,
    /// Ids spawned within the snapshot currently being decoded.
    pub(crate) temp_spawns: Vec<u32>,
    /// Every id the current snapshot's despawn list has named, including
    /// skipped ones; a repeat here is a protocol violation.
    pub(crate) temp_despawns: Vec<u32>,
    /// Snapshot records keyed by package sequence.
    pub snapshots: SequenceBuffer<SnapshotInfo>,
    /// Time of the newest accepted snapshot.
    pub server_time: i32,
    /// Wall-clock milliseconds at which `server_time` last advanced.
    pub snapshot_received_time: u64,
    /// Server-reported simulation duration in milliseconds.
    pub server_sim_time: f32,
    pub(crate) scratch0: Vec<u8>,
    pub(crate) scratch1: Vec<u8>,
    pub(crate) scratch2: Vec<u8>,
}

impl Default for SnapshotState {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotState {
    /// Creates an empty snapshot state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            spawns: Vec::new(),
            despawns: Vec::new(),
            updates: Vec::new(),
            temp_spawns: Vec::new(),
            temp_despawns: Vec::new(),
            snapshots: SequenceBuffer::new(SNAPSHOT_DELTA_CACHE_SIZE),
            server_time: 0,
            snapshot_received_time: 0,
            server_sim_time: 0.0,
            scratch0: vec![0u8; MAX_ENTITY_SNAPSHOT_DATA_SIZE],
            scratch1: vec![0u8; MAX_ENTITY_SNAPSHOT_DATA_SIZE],
            scratch2: vec![0u8; MAX_ENTITY_SNAPSHOT_DATA_SIZE],
        }
    }

    /// Clears everything for a map reset.
    pub fn reset(&mut self) {
        for slot in &mut self.entities {
            slot.reset();
        }
        self.spawns.clear();
        self.despawns.clear();
        self.updates.clear();
        self.temp_spawns.clear();
        self.temp_despawns.clear();
        self.snapshots.clear_all();
        self.server_time = 0;
    }

    /// Returns the slot for `id`, if the table reaches that far.
    #[must_use]
    pub fn entity(&self, id: u32) -> Option<&EntitySlot> {
        self.entities.get(id as usize)
    }

    /// Mutable variant of [`entity`](Self::entity).
    pub fn entity_mut(&mut self, id: u32) -> Option<&mut EntitySlot> {
        self.entities.get_mut(id as usize)
    }

    /// Current length of the entity table.
    #[must_use]
    pub fn entity_capacity(&self) -> usize {
        self.entities.len()
    }

    /// Number of live entities.
    #[must_use]
    pub fn live_entity_count(&self) -> usize {
        self.entities.iter().filter(|slot| slot.is_live()).count()
    }

    /// Grows the table so `id` indexes a valid slot.
    pub(crate) fn ensure_entity(&mut self, id: u32) {
        let needed = id as usize + 1;
        if self.entities.len() < needed {
            self.entities.resize_with(needed, EntitySlot::new);
        }
    }

    pub(crate) fn entities_mut(&mut self) -> &mut [EntitySlot] {
        &mut self.entities
    }

    /// Splits the borrows the prediction step needs: mutable entity slots
    /// alongside shared snapshot records and the baseline scratch buffers.
    #[allow(clippy::type_complexity)]
    pub(crate) fn split_predict(
        &mut self,
    ) -> (
        &mut [EntitySlot],
        &SequenceBuffer<SnapshotInfo>,
        &mut [u8],
        &mut [u8],
        &mut [u8],
        &[u32],
    ) {
        (
            self.entities.as_mut_slice(),
            &self.snapshots,
            self.scratch0.as_mut_slice(),
            self.scratch1.as_mut_slice(),
            self.scratch2.as_mut_slice(),
            self.temp_spawns.as_slice(),
        )
    }

    /// Splits the borrows the commit step needs.
    pub(crate) fn split_commit(&mut self) -> (&mut [EntitySlot], &mut Vec<u32>) {
        (self.entities.as_mut_slice(), &mut self.updates)
    }
}
