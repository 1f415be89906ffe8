//! A minimal server session: the exact encoding mirror of the client.
//!
//! This drives the integration tests and the loopback demo. It keeps one
//! client's view: per-package world records, the newest acked
//! snapshot-bearing package (the delta baseline), schema announcement
//! tracking, and the received command window. It is not a game server.

use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;

use bitstream::{CompressionModel, OutputStream as _, StreamCodec};
use codec::{
    write_snapshot, SnapshotSchemaRef, SnapshotSpawn, SnapshotUpdateRef, SnapshotWrite,
    SNAPSHOT_DELTA_CACHE_SIZE,
};
use schema::Schema;
use tracing::debug;
use wire::{
    read_package_header, write_package_header, ContentFlags, DeliveryTracker, InboundTracker,
    Limits, SequenceBuffer,
};

use crate::command::{CommandReceiver, CommandRecord};
use crate::error::ClientResult;
use crate::event::{read_events, write_events, Event};
use crate::session::{ClientConfigMessage, ClientInfoMessage, MapInfoMessage};

/// Static configuration of a server session.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub client_id: u8,
    pub server_tick_rate: u8,
    pub protocol_id: String,
    pub model_data: Vec<u8>,
    pub enable_prediction: bool,
    pub enable_hashing: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            client_id: 1,
            server_tick_rate: 60,
            protocol_id: "build.1.a".to_string(),
            model_data: Vec::new(),
            enable_prediction: false,
            enable_hashing: false,
        }
    }
}

#[derive(Debug)]
struct ServerType {
    type_id: u16,
    schema: Schema,
    baseline: Vec<u8>,
    acked: bool,
}

#[derive(Debug)]
struct ServerEntity {
    type_id: u16,
    field_mask: u8,
    data: Vec<u8>,
    despawned: bool,
    /// Package sequence that first carried the despawn, once sent.
    despawned_at: Option<u32>,
}

#[derive(Debug, Clone, Default)]
struct WorldEntity {
    data: Vec<u8>,
}

/// Alive entity images as of one sent snapshot.
#[derive(Debug, Default)]
struct WorldRecord {
    server_time: i32,
    entities: BTreeMap<u32, WorldEntity>,
}

/// What an outbound server package carried.
#[derive(Debug, Default)]
struct ServerPackageInfo {
    snapshot: bool,
    map_sequence: u16,
    schema_types: Vec<u16>,
    events: Vec<Event>,
}

/// One client's server-side session.
pub struct ServerSession<C: StreamCodec = bitstream::RawStreamCodec> {
    config: ServerConfig,
    model: CompressionModel,
    limits: Limits,
    out_sequence: u32,
    inbound: InboundTracker,
    delivery: DeliveryTracker<ServerPackageInfo>,
    acked_snapshot: u32,
    types: Vec<ServerType>,
    entities: BTreeMap<u32, ServerEntity>,
    worlds: SequenceBuffer<WorldRecord>,
    map: Option<MapInfoMessage>,
    map_acked: bool,
    commands: CommandReceiver,
    client_config: Option<ClientConfigMessage>,
    events_out: VecDeque<Event>,
    events_in: VecDeque<Event>,
    send_buffer: Vec<u8>,
    _codec: PhantomData<C>,
}

impl<C: StreamCodec> ServerSession<C> {
    /// Creates a session for one client.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let limits = Limits::default();
        let model = CompressionModel::from_blob(&config.model_data);
        Self {
            config,
            model,
            out_sequence: 0,
            inbound: InboundTracker::new(),
            delivery: DeliveryTracker::new(limits.max_outstanding_packages),
            acked_snapshot: 0,
            types: Vec::new(),
            entities: BTreeMap::new(),
            worlds: SequenceBuffer::new(SNAPSHOT_DELTA_CACHE_SIZE),
            map: None,
            map_acked: true,
            commands: CommandReceiver::new(),
            client_config: None,
            events_out: VecDeque::new(),
            events_in: VecDeque::new(),
            send_buffer: vec![0u8; limits.max_package_bytes],
            limits,
            _codec: PhantomData,
        }
    }

    /// Registers an entity type to announce to the client.
    pub fn register_entity_type(&mut self, type_id: u16, schema: Schema, baseline: Vec<u8>) {
        debug_assert_eq!(baseline.len(), schema.byte_size());
        self.types.push(ServerType {
            type_id,
            schema,
            baseline,
            acked: false,
        });
    }

    /// Installs a new map generation; sent until acked.
    ///
    /// The client resets its snapshot state when it adopts the map, so the
    /// delta baseline is dropped and the next snapshots go out full.
    pub fn set_map(&mut self, data: Vec<u8>, schema: Option<Schema>) {
        let map_sequence = self.map.as_ref().map_or(0, |m| m.map_sequence) + 1;
        self.map = Some(MapInfoMessage {
            map_sequence,
            schema,
            data,
        });
        self.map_acked = false;
        self.acked_snapshot = 0;
        self.worlds.clear_all();
    }

    /// Spawns an entity with its type's baseline image.
    pub fn spawn_entity(&mut self, id: u32, type_id: u16, field_mask: u8) {
        let baseline = self
            .types
            .iter()
            .find(|ty| ty.type_id == type_id)
            .map(|ty| ty.baseline.clone())
            .unwrap_or_default();
        self.entities.insert(
            id,
            ServerEntity {
                type_id,
                field_mask,
                data: baseline,
                despawned: false,
                despawned_at: None,
            },
        );
    }

    /// Replaces an entity's authoritative field image.
    pub fn set_entity_state(&mut self, id: u32, data: &[u8]) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.data.clear();
            entity.data.extend_from_slice(data);
        }
    }

    /// Marks an entity despawned; the despawn rides snapshots until acked.
    pub fn despawn_entity(&mut self, id: u32) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.despawned = true;
        }
    }

    /// Queues a reliable event to the client.
    pub fn queue_event(&mut self, event: Event) {
        self.events_out.push_back(event);
    }

    /// Pops the next event received from the client.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events_in.pop_front()
    }

    /// Newest received command.
    #[must_use]
    pub fn latest_command(&self) -> Option<(u32, &CommandRecord)> {
        self.commands.latest()
    }

    /// Command at an exact sequence, if resident.
    #[must_use]
    pub fn command(&self, sequence: u32) -> Option<&CommandRecord> {
        self.commands.get(sequence)
    }

    /// Configuration uploaded by the client, once received.
    #[must_use]
    pub fn client_config(&self) -> Option<ClientConfigMessage> {
        self.client_config
    }

    /// Newest accepted inbound sequence.
    #[must_use]
    pub fn in_sequence(&self) -> u32 {
        self.inbound.in_sequence()
    }

    /// Authoritative field image of an alive entity.
    #[must_use]
    pub fn entity_state(&self, id: u32) -> Option<&[u8]> {
        self.entities
            .get(&id)
            .filter(|e| !e.despawned)
            .map(|e| e.data.as_slice())
    }

    /// Ids of all alive entities, ascending.
    #[must_use]
    pub fn alive_entities(&self) -> Vec<u32> {
        self.entities
            .iter()
            .filter(|(_, e)| !e.despawned)
            .map(|(&id, _)| id)
            .collect()
    }

    /// The package sequence currently used as the delta baseline.
    #[must_use]
    pub fn acked_snapshot(&self) -> u32 {
        self.acked_snapshot
    }

    /// Consumes one package from the client.
    pub fn receive(&mut self, data: &[u8], now_ms: u64) -> ClientResult<()> {
        let model = self.model.clone();
        let mut input = C::input(&model, data);
        let raw = read_package_header(&mut input)?;
        if self.inbound.accept(raw.sequence_lsb, now_ms).is_none() {
            return Ok(());
        }

        let ack_sequence = self.delivery.expand_ack(self.out_sequence, raw.ack_sequence_lsb);
        if ack_sequence > 0 {
            let acked_snapshot = &mut self.acked_snapshot;
            let map_acked = &mut self.map_acked;
            let current_map = self.map.as_ref().map_or(0, |m| m.map_sequence);
            let types = &mut self.types;
            let events_out = &mut self.events_out;
            self.delivery
                .process_ack(ack_sequence, raw.ack_mask, |seq, info, made_it| {
                    if made_it {
                        if info.snapshot && seq > *acked_snapshot {
                            *acked_snapshot = seq;
                        }
                        if info.map_sequence != 0 && info.map_sequence == current_map {
                            *map_acked = true;
                        }
                        for type_id in &info.schema_types {
                            if let Some(ty) = types.iter_mut().find(|t| t.type_id == *type_id) {
                                ty.acked = true;
                            }
                        }
                    } else {
                        debug!(sequence = seq, "client-bound package lost");
                        for event in info.events.into_iter().rev() {
                            events_out.push_front(event);
                        }
                    }
                });
        }

        if raw.content.contains(ContentFlags::CLIENT_CONFIG) {
            self.client_config = Some(ClientConfigMessage::read(&mut input)?);
        }
        if raw.content.contains(ContentFlags::COMMANDS) {
            self.commands.read_commands(&mut input)?;
        }
        if raw.content.contains(ContentFlags::EVENTS) {
            let events = read_events(&mut input, &self.limits)?;
            self.events_in.extend(events);
        }
        Ok(())
    }

    /// Builds one package to the client and returns its bytes.
    pub fn write_package(&mut self, server_time: i32) -> ClientResult<Vec<u8>> {
        self.out_sequence += 1;
        let sequence = self.out_sequence;
        let (evicted, _) = self.delivery.register(sequence);
        if let Some((_, info)) = evicted {
            for event in info.events.into_iter().rev() {
                self.events_out.push_front(event);
            }
        }

        let send_client_info = self.inbound.in_sequence() == 0;
        let send_map = self.map.is_some() && !self.map_acked;
        let mut events = Vec::new();
        while events.len() < self.limits.max_events_per_package {
            let Some(event) = self.events_out.pop_front() else {
                break;
            };
            events.push(event);
        }

        let mut content = ContentFlags::empty();
        if send_client_info {
            content.add_message(ContentFlags::CLIENT_INFO);
        }
        if send_map {
            content.add_message(ContentFlags::MAP_INFO);
        }
        if !events.is_empty() {
            content.add_message(ContentFlags::EVENTS);
        }
        content.add_message(ContentFlags::SNAPSHOT);

        let base_sequence = if self.acked_snapshot > 0
            && self.worlds.exists(self.acked_snapshot)
            && (sequence - self.acked_snapshot) < SNAPSHOT_DELTA_CACHE_SIZE as u32
        {
            self.acked_snapshot
        } else {
            0
        };

        let mut schema_types = Vec::new();
        let mut fresh_ghosts = Vec::new();
        let len = {
            let base_world = if base_sequence > 0 {
                self.worlds.try_get(base_sequence)
            } else {
                None
            };
            let base_server_time = base_world.map_or(0, |world| world.server_time);
            let in_base =
                |id: u32| base_world.is_some_and(|world| world.entities.contains_key(&id));

            let schemas: Vec<SnapshotSchemaRef<'_>> = self
                .types
                .iter()
                .filter(|ty| base_sequence == 0 || !ty.acked)
                .map(|ty| SnapshotSchemaRef {
                    type_id: ty.type_id,
                    schema: &ty.schema,
                    baseline: &ty.baseline,
                })
                .collect();
            schema_types.extend(schemas.iter().map(|s| s.type_id));

            let mut spawns = Vec::new();
            let mut despawns = Vec::new();
            let mut updates = Vec::new();
            let mut num_ents = 0u32;
            for (&id, entity) in &self.entities {
                let in_baseline = in_base(id);
                if entity.despawned {
                    if entity.despawned_at.is_none() && !in_baseline {
                        // Short-lived entity: spawn and despawn in one
                        // snapshot; the pair is sent exactly once.
                        spawns.push(SnapshotSpawn {
                            id,
                            type_id: entity.type_id,
                            field_mask: entity.field_mask,
                        });
                        despawns.push(id);
                        fresh_ghosts.push(id);
                        num_ents += 1;
                    } else if in_baseline || base_sequence == 0 {
                        despawns.push(id);
                    }
                    continue;
                }

                if !in_baseline {
                    spawns.push(SnapshotSpawn {
                        id,
                        type_id: entity.type_id,
                        field_mask: entity.field_mask,
                    });
                }
                let ty = self
                    .types
                    .iter()
                    .find(|t| t.type_id == entity.type_id)
                    .expect("entity type registered");
                let baseline: &[u8] = base_world
                    .and_then(|world| world.entities.get(&id))
                    .map_or(ty.baseline.as_slice(), |e| e.data.as_slice());
                if entity.data != baseline {
                    updates.push(SnapshotUpdateRef {
                        id,
                        schema: &ty.schema,
                        field_mask: entity.field_mask,
                        baseline,
                        value: &entity.data,
                    });
                }
                num_ents += 1;
            }
            despawns.sort_unstable();

            let enable_prediction = self.config.enable_prediction && base_sequence != 0;
            let snapshot = SnapshotWrite {
                sequence,
                base_sequence,
                base_sequence1: if enable_prediction {
                    base_sequence.saturating_sub(1)
                } else {
                    0
                },
                base_sequence2: if enable_prediction {
                    base_sequence.saturating_sub(2)
                } else {
                    0
                },
                enable_prediction,
                enable_hashing: self.config.enable_hashing,
                server_time,
                base_server_time,
                server_sim_time_tenths: 16,
                schemas: &schemas,
                spawns: &spawns,
                despawns: &despawns,
                updates: &updates,
                num_ents,
            };

            let mut out = C::output(&self.model, &mut self.send_buffer);
            write_package_header(
                &mut out,
                sequence,
                self.inbound.in_sequence(),
                self.inbound.receive_mask(),
                content,
            )?;
            if send_client_info {
                ClientInfoMessage {
                    client_id: self.config.client_id,
                    server_tick_rate: self.config.server_tick_rate,
                    protocol_id: self.config.protocol_id.clone(),
                    model_data: self.config.model_data.clone(),
                }
                .write(&mut out)?;
            }
            if send_map {
                self.map.as_ref().expect("checked above").write(&mut out)?;
            }
            if !events.is_empty() {
                write_events(&mut out, &events)?;
            }
            write_snapshot(&mut out, &snapshot)?;
            out.flush()
        };

        // Record the world this snapshot described.
        let record = self.worlds.acquire(sequence);
        record.server_time = server_time;
        record.entities = self
            .entities
            .iter()
            .filter(|(_, e)| !e.despawned)
            .map(|(&id, e)| (id, WorldEntity { data: e.data.clone() }))
            .collect();

        // Despawn bookkeeping: stamp first-sent despawns, purge ghosts
        // immediately and ordinary despawns once the baseline passed them.
        for entity in self.entities.values_mut() {
            if entity.despawned && entity.despawned_at.is_none() {
                entity.despawned_at = Some(sequence);
            }
        }
        let acked = self.acked_snapshot;
        self.entities.retain(|id, entity| {
            if !entity.despawned {
                return true;
            }
            if fresh_ghosts.contains(id) {
                return false;
            }
            match entity.despawned_at {
                Some(at) => acked < at,
                None => true,
            }
        });

        let sent_map_sequence = if send_map {
            self.map.as_ref().map_or(0, |m| m.map_sequence)
        } else {
            0
        };
        if let Some(info) = self.delivery.info_mut(sequence) {
            *info = ServerPackageInfo {
                snapshot: true,
                map_sequence: sent_map_sequence,
                schema_types,
                events,
            };
        }

        Ok(self.send_buffer[..len].to_vec())
    }
}
