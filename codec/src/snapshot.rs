//! Snapshot body encoding and decoding.
//!
//! One snapshot body carries, in normative order: the baseline sequence
//! (0 = delta against schema baselines, i.e. a full snapshot), the
//! prediction/hashing flags, the two extra predictor baselines, the server
//! clock, newly announced schemas, spawns, despawns, and delta-coded entity
//! updates against the predicted image. The decoder commits the result into
//! the entity table and leaves the spawn/update/despawn lists populated for
//! the consumer.

use bitstream::{InputStream, OutputStream};
use schema::{Schema, FIELDS_CHANGED_BYTES};

use crate::delta::{delta_read_overwrite, delta_write};
use crate::entity::{EntityType, EntityTypeRegistry, SnapshotState};
use crate::error::{CodecError, CodecResult};
use crate::hash::simple_hash;
use crate::limits::{MAX_ENTITIES, SNAPSHOT_DELTA_CACHE_SIZE};
use crate::predict::{PredictionInput, Predictor};

/// Entropy contexts owned by the snapshot body.
pub mod contexts {
    use bitstream::DeltaContext;

    pub const BASE_SEQUENCE: DeltaContext = DeltaContext::new(40);
    pub const SERVER_TIME: DeltaContext = DeltaContext::new(41);
    pub const SCHEMA_COUNT: DeltaContext = DeltaContext::new(42);
    pub const SCHEMA_TYPE_ID: DeltaContext = DeltaContext::new(43);
    pub const SPAWN_COUNT: DeltaContext = DeltaContext::new(44);
    pub const DESPAWN_COUNT: DeltaContext = DeltaContext::new(45);
    pub const UPDATE_COUNT: DeltaContext = DeltaContext::new(46);
    pub const ENTITY_ID: DeltaContext = DeltaContext::new(47);
}

/// Initial value of the running delta-coded entity id. Wire constant shared
/// with the server; never change it.
const INITIAL_PREVIOUS_ID: i32 = 1;

/// Outcome of decoding one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotStats {
    /// The package sequence the snapshot arrived in.
    pub sequence: u32,
    /// The snapshot's server time.
    pub server_time: i32,
    /// Whether the snapshot advanced the client's server clock. A stale
    /// snapshot is still decoded and cached, it just doesn't advance time.
    pub advanced_time: bool,
    /// Per-entity delta hash mismatches observed (sender had hashing on).
    pub hash_mismatches: u32,
    /// Sum of per-entity image hashes over the committed set.
    pub snapshot_hash: u32,
}

fn read_entity_id<I: InputStream>(input: &mut I, previous_id: &mut i32) -> CodecResult<u32> {
    let id = input.read_packed_int_delta(*previous_id, contexts::ENTITY_ID)?;
    *previous_id = id;
    if id < 0 || id as usize >= MAX_ENTITIES {
        return Err(CodecError::InvalidEntityId { raw: id });
    }
    Ok(id as u32)
}

/// Decodes one snapshot body and commits it to the entity table.
///
/// On return `state.spawns`, `state.updates`, and `state.despawns` hold the
/// consumer's work list for this snapshot. The caller must have drained all
/// three lists beforehand.
///
/// # Panics
///
/// Panics if any consumer list is non-empty on entry; that is a bug in the
/// caller, not in the peer.
pub fn read_snapshot<I: InputStream, P: Predictor>(
    input: &mut I,
    sequence: u32,
    state: &mut SnapshotState,
    registry: &mut EntityTypeRegistry,
    predictor: &P,
    now_ms: u64,
) -> CodecResult<SnapshotStats> {
    assert!(
        state.spawns.is_empty() && state.despawns.is_empty() && state.updates.is_empty(),
        "snapshot consumer lists not drained before decode"
    );

    // Baseline sequence; 0 means delta against the schema baselines.
    let base_raw = input.read_packed_int_delta(sequence as i32 - 1, contexts::BASE_SEQUENCE)?;
    let base_sequence = u32::try_from(base_raw).map_err(|_| CodecError::InvalidBaseSequence {
        sequence,
        base_sequence: 0,
    })?;
    if base_sequence != 0
        && (base_sequence >= sequence
            || (sequence - base_sequence) as usize >= SNAPSHOT_DELTA_CACHE_SIZE)
    {
        return Err(CodecError::InvalidBaseSequence {
            sequence,
            base_sequence,
        });
    }

    let enable_prediction = input.read_raw_bits(1)? == 1;
    let enable_hashing = input.read_raw_bits(1)? == 1;

    // Two extra baselines, used only by the predictor.
    let mut base_sequence1 = 0u32;
    let mut base_sequence2 = 0u32;
    if enable_prediction {
        let b1 = input.read_packed_int_delta(base_sequence as i32 - 1, contexts::BASE_SEQUENCE)?;
        let b2 = input.read_packed_int_delta(b1 - 1, contexts::BASE_SEQUENCE)?;
        base_sequence1 = b1.max(0) as u32;
        base_sequence2 = b2.max(0) as u32;
    }

    // Snapshot record and server clock.
    let base_time = if base_sequence != 0 {
        state
            .snapshots
            .try_get(base_sequence)
            .ok_or(CodecError::MissingSnapshotRecord { base_sequence })?
            .server_time
    } else {
        0
    };
    let server_time = input.read_packed_int_delta(base_time, contexts::SERVER_TIME)?;
    state.snapshots.acquire(sequence).server_time = server_time;

    state.server_sim_time = input.read_raw_bits(8)? as f32 * 0.1;

    let advanced_time = server_time > state.server_time;
    if advanced_time {
        state.server_time = server_time;
        state.snapshot_received_time = now_ms;
    }

    // Newly announced schemas; repeats of known type ids are ignored.
    let schema_count = input.read_packed_uint(contexts::SCHEMA_COUNT)?;
    for _ in 0..schema_count {
        let type_id = input.read_packed_uint(contexts::SCHEMA_TYPE_ID)? as u16;
        let schema = Schema::read(input)?;
        let mut baseline = schema.zero_baseline();
        schema.copy_fields_to_buffer(input, &mut baseline)?;
        registry.intern(EntityType {
            type_id,
            schema,
            baseline,
        });
    }

    // The server has confirmed it will never delta against these again.
    for slot in state.entities_mut() {
        if slot.is_live() && slot.despawn_sequence > 0 && slot.despawn_sequence <= base_sequence {
            slot.reset();
        }
    }

    // Spawns. Ids are delta-coded against a running previous id that also
    // spans the despawn and update lists below.
    state.temp_spawns.clear();
    let mut previous_id = INITIAL_PREVIOUS_ID;
    let spawn_count = input.read_packed_uint(contexts::SPAWN_COUNT)?;
    for _ in 0..spawn_count {
        let id = read_entity_id(input, &mut previous_id)?;
        let type_id = input.read_packed_uint(contexts::SCHEMA_TYPE_ID)? as u16;
        let field_mask = input.read_raw_bits(8)? as u8;
        state.ensure_entity(id);
        if !state.entity(id).is_some_and(|slot| slot.is_live()) {
            if registry.get(type_id).is_none() {
                return Err(CodecError::UnknownEntityType { type_id });
            }
            state
                .entity_mut(id)
                .expect("slot grown above")
                .spawn(type_id, field_mask);
            state.spawns.push(id);
        }
        state.temp_spawns.push(id);
    }

    // Despawns. A despawn of an entity spawned in this same snapshot is
    // deferred; the slot stays reserved until the server's baseline passes
    // this sequence. Anything else is finalised immediately.
    //
    // Repeats are checked against every id this snapshot has named, not the
    // slot: the first occurrence already freed or deferred the slot, so the
    // slot alone cannot tell a repeat apart from a stale resend.
    state.temp_despawns.clear();
    let despawn_count = input.read_packed_uint(contexts::DESPAWN_COUNT)?;
    for _ in 0..despawn_count {
        let id = read_entity_id(input, &mut previous_id)?;
        if state.temp_despawns.contains(&id) {
            return Err(CodecError::DuplicateDespawn { entity: id });
        }
        state.temp_despawns.push(id);
        let actionable = state
            .entity(id)
            .is_some_and(|slot| slot.is_live() && slot.despawn_sequence == 0);
        if !actionable {
            continue;
        }
        if state.temp_spawns.contains(&id) {
            state.entity_mut(id).expect("slot is live").despawn_sequence = sequence;
        } else {
            state.entity_mut(id).expect("slot is live").reset();
        }
        state.despawns.push(id);
    }

    // Predict every entity the commit step will touch, not just those with
    // updates: the server encoded its deltas against the same predicted
    // images, and skipped entities still need a baseline stored at this
    // sequence for later snapshots to reference.
    {
        let (entities, snapshots, scratch0, scratch1, scratch2, temp_spawns) =
            state.split_predict();
        for (idx, slot) in entities.iter_mut().enumerate() {
            let id = idx as u32;
            let Some(type_id) = slot.type_id() else {
                continue;
            };
            if slot.despawn_sequence != 0 && slot.despawn_sequence != sequence {
                continue;
            }
            let entity_type = registry
                .get(type_id)
                .ok_or(CodecError::UnknownEntityType { type_id })?;
            let size = entity_type.schema.byte_size();
            let spawned_now = temp_spawns.contains(&id);

            let mut num_baselines = 1usize;
            let mut times = [0i32; 3];
            if base_sequence == 0 || spawned_now {
                scratch0[..size].copy_from_slice(&entity_type.baseline[..size]);
            } else {
                let (found, data) = slot
                    .baselines
                    .find_max(base_sequence)
                    .ok_or(CodecError::MissingBaseline {
                        entity: id,
                        base_sequence,
                    })?;
                scratch0[..size].copy_from_slice(&data[..size]);
                times[0] = snapshots
                    .try_get(found)
                    .map_or(0, |info| info.server_time);

                if enable_prediction && base_sequence1 != 0 {
                    if let Some((found1, data1)) = slot.baselines.find_max(base_sequence1) {
                        scratch1[..size].copy_from_slice(&data1[..size]);
                        times[1] = snapshots
                            .try_get(found1)
                            .map_or(0, |info| info.server_time);
                        num_baselines = 2;
                        if base_sequence2 != 0 {
                            if let Some((found2, data2)) = slot.baselines.find_max(base_sequence2)
                            {
                                scratch2[..size].copy_from_slice(&data2[..size]);
                                times[2] = snapshots
                                    .try_get(found2)
                                    .map_or(0, |info| info.server_time);
                                num_baselines = 3;
                            }
                        }
                    }
                }
            }

            if enable_prediction {
                let prediction_input = PredictionInput {
                    schema: &entity_type.schema,
                    num_baselines,
                    times,
                    baselines: [&scratch0[..size], &scratch1[..size], &scratch2[..size]],
                    new_time: server_time,
                    field_mask: slot.field_mask,
                };
                predictor.predict_snapshot(
                    &prediction_input,
                    &mut slot.prediction,
                    &mut slot.fields_changed_prediction,
                );
            } else {
                slot.prediction[..size].copy_from_slice(&scratch0[..size]);
                slot.fields_changed_prediction.fill(0);
            }
        }
    }

    // Updates, delta-coded against the prediction buffer.
    let update_count = input.read_packed_uint(contexts::UPDATE_COUNT)?;
    let mut hash_mismatches = 0u32;
    let mut changed_scratch = [0u8; FIELDS_CHANGED_BYTES];
    for _ in 0..update_count {
        let id = read_entity_id(input, &mut previous_id)?;
        let slot = state
            .entity_mut(id)
            .ok_or(CodecError::UpdateForDeadEntity { entity: id })?;
        let Some(type_id) = slot.type_id() else {
            return Err(CodecError::UpdateForDeadEntity { entity: id });
        };
        let entity_type = registry
            .get(type_id)
            .ok_or(CodecError::UnknownEntityType { type_id })?;
        let field_mask = slot.field_mask;
        let hash = delta_read_overwrite(
            input,
            &entity_type.schema,
            &mut slot.prediction,
            &mut changed_scratch,
            field_mask,
        )?;
        if enable_hashing {
            let wire_hash = input.read_raw_bits(32)?;
            if wire_hash != hash {
                hash_mismatches += 1;
            }
        }
    }

    // Commit: store the decoded image as the baseline for this sequence and
    // refresh the consumer-facing latest image.
    let mut num_ents = 0u32;
    let mut snapshot_hash = 0u32;
    {
        let (entities, updates) = state.split_commit();
        for (idx, slot) in entities.iter_mut().enumerate() {
            let id = idx as u32;
            let Some(type_id) = slot.type_id() else {
                continue;
            };
            if slot.despawn_sequence != 0 && slot.despawn_sequence != sequence {
                continue;
            }
            let entity_type = registry
                .get(type_id)
                .ok_or(CodecError::UnknownEntityType { type_id })?;
            let size = entity_type.schema.byte_size();

            let was_empty = slot.baselines.is_empty();
            let baseline = slot.baselines.insert(sequence);
            baseline[..size].copy_from_slice(&slot.prediction[..size]);

            if sequence > slot.last_update_sequence {
                let differs = slot.prediction[..size] != slot.last_update[..size];
                if was_empty || differs {
                    slot.last_update[..size].copy_from_slice(&slot.prediction[..size]);
                    if !updates.contains(&id) {
                        updates.push(id);
                    }
                }
                slot.last_update_sequence = sequence;
            }

            if enable_hashing {
                snapshot_hash = snapshot_hash.wrapping_add(simple_hash(&slot.prediction[..size]));
                num_ents += 1;
            }
        }
    }

    if enable_hashing {
        let check = input.read_raw_bits(32)?;
        if check != num_ents {
            return Err(CodecError::EntityCountMismatch {
                expected: check,
                actual: num_ents,
            });
        }
    }

    Ok(SnapshotStats {
        sequence,
        server_time,
        advanced_time,
        hash_mismatches,
        snapshot_hash,
    })
}

/// A schema announcement inside a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotSchemaRef<'a> {
    pub type_id: u16,
    pub schema: &'a Schema,
    pub baseline: &'a [u8],
}

/// One spawn entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotSpawn {
    pub id: u32,
    pub type_id: u16,
    pub field_mask: u8,
}

/// One update entry: the new image and the baseline it is coded against.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotUpdateRef<'a> {
    pub id: u32,
    pub schema: &'a Schema,
    pub field_mask: u8,
    pub baseline: &'a [u8],
    pub value: &'a [u8],
}

/// Everything needed to serialise one snapshot body.
#[derive(Debug)]
pub struct SnapshotWrite<'a> {
    pub sequence: u32,
    pub base_sequence: u32,
    pub base_sequence1: u32,
    pub base_sequence2: u32,
    pub enable_prediction: bool,
    pub enable_hashing: bool,
    pub server_time: i32,
    /// Server time of the baseline snapshot, 0 when `base_sequence` is 0.
    pub base_server_time: i32,
    /// Simulation duration in 0.1 ms units.
    pub server_sim_time_tenths: u8,
    pub schemas: &'a [SnapshotSchemaRef<'a>],
    pub spawns: &'a [SnapshotSpawn],
    pub despawns: &'a [u32],
    pub updates: &'a [SnapshotUpdateRef<'a>],
    /// Committed-entity count transmitted when hashing is on.
    pub num_ents: u32,
}

/// Serialises one snapshot body. The exact mirror of [`read_snapshot`].
pub fn write_snapshot<O: OutputStream>(
    out: &mut O,
    snapshot: &SnapshotWrite<'_>,
) -> CodecResult<()> {
    out.write_packed_int_delta(
        snapshot.base_sequence as i32,
        snapshot.sequence as i32 - 1,
        contexts::BASE_SEQUENCE,
    )?;
    out.write_raw_bits(u32::from(snapshot.enable_prediction), 1)?;
    out.write_raw_bits(u32::from(snapshot.enable_hashing), 1)?;
    if snapshot.enable_prediction {
        out.write_packed_int_delta(
            snapshot.base_sequence1 as i32,
            snapshot.base_sequence as i32 - 1,
            contexts::BASE_SEQUENCE,
        )?;
        out.write_packed_int_delta(
            snapshot.base_sequence2 as i32,
            snapshot.base_sequence1 as i32 - 1,
            contexts::BASE_SEQUENCE,
        )?;
    }
    out.write_packed_int_delta(
        snapshot.server_time,
        snapshot.base_server_time,
        contexts::SERVER_TIME,
    )?;
    out.write_raw_bits(u32::from(snapshot.server_sim_time_tenths), 8)?;

    out.write_packed_uint(snapshot.schemas.len() as u32, contexts::SCHEMA_COUNT)?;
    for entry in snapshot.schemas {
        out.write_packed_uint(u32::from(entry.type_id), contexts::SCHEMA_TYPE_ID)?;
        entry.schema.write(out)?;
        entry.schema.write_fields_from_buffer(entry.baseline, out)?;
    }

    let mut previous_id = INITIAL_PREVIOUS_ID;
    out.write_packed_uint(snapshot.spawns.len() as u32, contexts::SPAWN_COUNT)?;
    for spawn in snapshot.spawns {
        out.write_packed_int_delta(spawn.id as i32, previous_id, contexts::ENTITY_ID)?;
        previous_id = spawn.id as i32;
        out.write_packed_uint(u32::from(spawn.type_id), contexts::SCHEMA_TYPE_ID)?;
        out.write_raw_bits(u32::from(spawn.field_mask), 8)?;
    }

    out.write_packed_uint(snapshot.despawns.len() as u32, contexts::DESPAWN_COUNT)?;
    for &id in snapshot.despawns {
        out.write_packed_int_delta(id as i32, previous_id, contexts::ENTITY_ID)?;
        previous_id = id as i32;
    }

    out.write_packed_uint(snapshot.updates.len() as u32, contexts::UPDATE_COUNT)?;
    for update in snapshot.updates {
        out.write_packed_int_delta(update.id as i32, previous_id, contexts::ENTITY_ID)?;
        previous_id = update.id as i32;
        let hash = delta_write(
            out,
            update.schema,
            update.value,
            update.baseline,
            update.field_mask,
        )?;
        if snapshot.enable_hashing {
            out.write_raw_bits(hash, 32)?;
        }
    }

    if snapshot.enable_hashing {
        out.write_raw_bits(snapshot.num_ents, 32)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::CopyPredictor;
    use bitstream::{CompressionModel, DeltaContext, RawStreamCodec, StreamCodec};
    use schema::FieldDef;

    fn one_field_schema() -> Schema {
        Schema::new(vec![FieldDef::uint(8, DeltaContext::new(100))]).unwrap()
    }

    fn decode(body: &[u8], sequence: u32, state: &mut SnapshotState) -> CodecResult<SnapshotStats> {
        let model = CompressionModel::empty();
        let mut registry = EntityTypeRegistry::new();
        let mut input = RawStreamCodec::input(&model, body);
        read_snapshot(&mut input, sequence, state, &mut registry, &CopyPredictor, 0)
    }

    fn encode(snapshot: &SnapshotWrite<'_>) -> Vec<u8> {
        let model = CompressionModel::empty();
        let mut buf = vec![0u8; 1024];
        let mut out = RawStreamCodec::output(&model, &mut buf);
        write_snapshot(&mut out, snapshot).unwrap();
        let len = out.flush();
        buf.truncate(len);
        buf
    }

    fn full_snapshot<'a>(
        schemas: &'a [SnapshotSchemaRef<'a>],
        spawns: &'a [SnapshotSpawn],
        despawns: &'a [u32],
    ) -> SnapshotWrite<'a> {
        SnapshotWrite {
            sequence: 20,
            base_sequence: 0,
            base_sequence1: 0,
            base_sequence2: 0,
            enable_prediction: false,
            enable_hashing: false,
            server_time: 2000,
            base_server_time: 0,
            server_sim_time_tenths: 16,
            schemas,
            spawns,
            despawns,
            updates: &[],
            num_ents: 0,
        }
    }

    #[test]
    fn duplicate_despawn_of_deferred_slot_is_fatal() {
        let schema = one_field_schema();
        let baseline = schema.zero_baseline();
        let schemas = [SnapshotSchemaRef {
            type_id: 5,
            schema: &schema,
            baseline: &baseline,
        }];
        let spawns = [SnapshotSpawn {
            id: 4,
            type_id: 5,
            field_mask: 0xFF,
        }];
        // The first despawn defers the slot, which would otherwise hide the
        // repeat behind the free-or-pending skip.
        let body = encode(&full_snapshot(&schemas, &spawns, &[4, 4]));

        let mut state = SnapshotState::new();
        let err = decode(&body, 20, &mut state).unwrap_err();
        assert!(matches!(err, CodecError::DuplicateDespawn { entity: 4 }));
    }

    #[test]
    fn duplicate_despawn_of_unknown_slot_is_fatal() {
        // Neither occurrence touches a live slot; the repeat is still a
        // violation of the wire contract.
        let body = encode(&full_snapshot(&[], &[], &[7, 7]));

        let mut state = SnapshotState::new();
        let err = decode(&body, 20, &mut state).unwrap_err();
        assert!(matches!(err, CodecError::DuplicateDespawn { entity: 7 }));
    }

    #[test]
    fn distinct_despawns_still_pass() {
        let schema = one_field_schema();
        let baseline = schema.zero_baseline();
        let schemas = [SnapshotSchemaRef {
            type_id: 5,
            schema: &schema,
            baseline: &baseline,
        }];
        let spawns = [
            SnapshotSpawn {
                id: 4,
                type_id: 5,
                field_mask: 0xFF,
            },
            SnapshotSpawn {
                id: 6,
                type_id: 5,
                field_mask: 0xFF,
            },
        ];
        let body = encode(&full_snapshot(&schemas, &spawns, &[4, 6]));

        let mut state = SnapshotState::new();
        decode(&body, 20, &mut state).unwrap();
        assert_eq!(state.despawns, vec![4, 6]);
    }
}
