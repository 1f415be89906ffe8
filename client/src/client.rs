//! The client facade: drives framing, session state, snapshot decode, and
//! upload from the game's tick.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::time::Instant;

use bitstream::{CompressionModel, OutputStream as _, RawStreamCodec, StreamCodec};
use codec::{
    read_snapshot, CopyPredictor, EntityTypeRegistry, Predictor, SnapshotState,
};
use schema::Schema;
use tracing::{debug, error, info, warn};
use wire::{read_package_header, write_package_header, ContentFlags, Limits};

use crate::command::{CommandRing, MAX_COMMAND_DATA_SIZE};
use crate::config::{protocol_suffix, ClientConfig};
use crate::connection::{ClientConnection, PackageInfo};
use crate::error::{ClientError, ClientResult};
use crate::event::{read_events, write_events, Event};
use crate::command;
use crate::session::{ClientConfigMessage, ClientInfoMessage, MapInfo, MapInfoMessage};
use crate::transport::{parse_endpoint, ConnectionId, Transport, TransportEvent};

/// Connection lifecycle of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,
    /// Transport dialled, handshake not yet accepted.
    Connecting,
    /// Handshake accepted, snapshots flowing.
    Connected,
}

/// Receives the replicated world, one snapshot at a time.
pub trait SnapshotConsumer {
    /// A new entity appeared.
    fn process_entity_spawn(&mut self, server_time: i32, id: u32, type_id: u16);
    /// An entity's latest field image changed. `data` is the canonical
    /// image described by the entity type's schema.
    fn process_entity_update(&mut self, server_time: i32, id: u32, data: &[u8]);
    /// An entity went away.
    fn process_entity_despawn(&mut self, server_time: i32, id: u32);
    /// End of one snapshot's deliveries; a good moment to swap buffers.
    fn process_snapshot(&mut self, server_time: i32);
}

/// Receives map reset payloads, exactly once per new map.
pub trait MapUpdateConsumer {
    /// A new map payload was adopted.
    fn on_map_update(&mut self, data: &[u8]);
}

/// Per-session state, created on transport connect and dropped on
/// disconnect.
struct Session {
    connection: ClientConnection,
    client_id: Option<u8>,
    server_tick_rate: u8,
    compression_model: CompressionModel,
    map_info: MapInfo,
    snapshot: SnapshotState,
    registry: EntityTypeRegistry,
    command_schema: Option<Schema>,
    commands: CommandRing,
    last_sent_command_sequence: u32,
    events_out: VecDeque<Event>,
    events_in: VecDeque<Event>,
    send_buffer: Vec<u8>,
}

impl Session {
    fn new(connection_id: ConnectionId, limits: &Limits, command_schema: Option<Schema>) -> Self {
        Self {
            connection: ClientConnection::new(connection_id, limits),
            client_id: None,
            server_tick_rate: 0,
            compression_model: CompressionModel::empty(),
            map_info: MapInfo::default(),
            snapshot: SnapshotState::new(),
            registry: EntityTypeRegistry::new(),
            command_schema,
            commands: CommandRing::new(),
            last_sent_command_sequence: 0,
            events_out: VecDeque::new(),
            events_in: VecDeque::new(),
            send_buffer: vec![0u8; limits.max_package_bytes],
        }
    }
}

/// The snapshot protocol client.
///
/// Single-threaded and polled: call [`update`](Self::update) every tick,
/// [`send_data`](Self::send_data) when the tick wants to upload, and
/// [`process_snapshot`](Self::process_snapshot) to drain the latest
/// snapshot into the game.
pub struct Client<T: Transport, C: StreamCodec = RawStreamCodec> {
    config: ClientConfig,
    limits: Limits,
    transport: T,
    state: ConnectionState,
    connection_id: ConnectionId,
    session: Option<Session>,
    predictor: Box<dyn Predictor>,
    command_schema: Option<Schema>,
    epoch: Instant,
    _codec: PhantomData<C>,
}

impl<T: Transport, C: StreamCodec> Client<T, C> {
    /// Creates a client over the given transport.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        Self {
            config,
            limits: Limits::default(),
            transport,
            state: ConnectionState::Disconnected,
            connection_id: -1,
            session: None,
            predictor: Box::new(CopyPredictor),
            command_schema: None,
            epoch: Instant::now(),
            _codec: PhantomData,
        }
    }

    /// Replaces the snapshot predictor. Must match the server's.
    pub fn set_predictor(&mut self, predictor: Box<dyn Predictor>) {
        self.predictor = predictor;
    }

    /// Installs the schema for outbound commands.
    pub fn set_command_schema(&mut self, schema: Schema) {
        if let Some(session) = self.session.as_mut() {
            session.command_schema = Some(schema.clone());
        }
        self.command_schema = Some(schema);
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Server-assigned client id, once connected.
    #[must_use]
    pub fn client_id(&self) -> Option<u8> {
        self.session.as_ref().and_then(|s| s.client_id)
    }

    /// Server tick rate from the handshake.
    #[must_use]
    pub fn server_tick_rate(&self) -> u8 {
        self.session.as_ref().map_or(0, |s| s.server_tick_rate)
    }

    /// Time of the newest accepted snapshot.
    #[must_use]
    pub fn server_time(&self) -> i32 {
        self.session.as_ref().map_or(0, |s| s.snapshot.server_time)
    }

    /// The replicated view, for inspection.
    #[must_use]
    pub fn snapshot_state(&self) -> Option<&SnapshotState> {
        self.session.as_ref().map(|s| &s.snapshot)
    }

    /// Newest sent outbound package sequence.
    #[must_use]
    pub fn out_sequence(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.connection.out_sequence())
    }

    /// Newest accepted inbound package sequence.
    #[must_use]
    pub fn in_sequence(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.connection.in_sequence())
    }

    /// Newest command sequence the server has confirmed.
    #[must_use]
    pub fn command_sequence_ack(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.connection.command_sequence_ack)
    }

    /// Whether the next send will (re)upload the client configuration.
    #[must_use]
    pub fn will_send_client_config(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.connection.send_client_config)
    }

    /// The transport, for test instrumentation.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Starts connecting to `host[:port]`.
    pub fn connect(&mut self, endpoint: &str) -> ClientResult<()> {
        if self.state != ConnectionState::Disconnected {
            self.disconnect();
        }
        let (host, port) = parse_endpoint(endpoint)?;
        let connection_id = self.transport.connect(&host, port);
        if connection_id < 0 {
            warn!(endpoint, "transport refused connection");
            return Err(ClientError::TransportFailed {
                endpoint: endpoint.to_string(),
            });
        }
        self.connection_id = connection_id;
        self.state = ConnectionState::Connecting;
        info!(endpoint, connection_id, "connecting");
        Ok(())
    }

    /// Tells the transport to close. Idempotent; the session is dropped when
    /// the transport reports the disconnect.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.transport.disconnect(self.connection_id);
    }

    /// Updates the client's requested server rates and re-arms the upload.
    pub fn update_client_config(&mut self, server_update_rate: u32, server_update_send_rate: u16) {
        self.config.server_update_rate = server_update_rate;
        self.config.server_update_send_rate = server_update_send_rate;
        if let Some(session) = self.session.as_mut() {
            session.connection.send_client_config = true;
        }
    }

    /// Queues a command for upload. The body is zero-extended to the
    /// command schema's image size.
    pub fn queue_command(&mut self, time: i32, data: &[u8]) -> ClientResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        let Some(schema) = &session.command_schema else {
            return Err(ClientError::NoCommandSchema);
        };
        let size = schema.byte_size().min(MAX_COMMAND_DATA_SIZE);
        if data.len() > size {
            return Err(ClientError::CommandTooLarge {
                size: data.len(),
                max: size,
            });
        }
        let mut image = vec![0u8; schema.byte_size()];
        image[..data.len()].copy_from_slice(data);
        session.commands.queue(time, image);
        Ok(())
    }

    /// Queues a reliable event for upload.
    pub fn queue_event(&mut self, event: Event) -> ClientResult<()> {
        if event.data.len() > self.limits.max_event_bytes {
            return Err(wire::WireError::PackageTooLarge {
                actual: event.data.len(),
                limit: self.limits.max_event_bytes,
            }
            .into());
        }
        let Some(session) = self.session.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        session.events_out.push_back(event);
        Ok(())
    }

    /// Pops the next inbound event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.session.as_mut()?.events_in.pop_front()
    }

    /// Pumps the transport, decodes inbound packages, and notifies the map
    /// consumer once per newly adopted map.
    ///
    /// A desync-class decode error tears the session down and is returned.
    pub fn update(&mut self, map_consumer: &mut dyn MapUpdateConsumer) -> ClientResult<()> {
        self.transport.update();
        let mut result = Ok(());
        while let Some(event) = self.transport.next_event() {
            match event {
                TransportEvent::Connect(connection_id) => {
                    if connection_id != self.connection_id {
                        continue;
                    }
                    if self.state == ConnectionState::Connecting && self.session.is_none() {
                        self.session = Some(Session::new(
                            connection_id,
                            &self.limits,
                            self.command_schema.clone(),
                        ));
                        if self.config.debug {
                            debug!(connection_id, "transport connected");
                        }
                    }
                }
                TransportEvent::Disconnect(connection_id) => {
                    if connection_id != self.connection_id {
                        continue;
                    }
                    info!(connection_id, "disconnected");
                    self.session = None;
                    self.state = ConnectionState::Disconnected;
                }
                TransportEvent::Data { connection, data } => {
                    if connection != self.connection_id || self.config.block_in {
                        continue;
                    }
                    if result.is_err() {
                        continue;
                    }
                    if let Err(err) = self.read_package(&data) {
                        error!(error = %err, "package decode failed, dropping session");
                        self.transport.disconnect(self.connection_id);
                        self.session = None;
                        self.state = ConnectionState::Disconnected;
                        result = Err(err);
                    }
                }
            }
        }

        if let Some(session) = self.session.as_mut() {
            if !session.map_info.processed && session.map_info.map_sequence > 0 {
                map_consumer.on_map_update(&session.map_info.data);
                session.map_info.processed = true;
            }
        }
        result
    }

    fn read_package(&mut self, data: &[u8]) -> ClientResult<()> {
        let now_ms = self.now_ms();
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let model = session.compression_model.clone();
        let mut input = C::input(&model, data);

        let raw = read_package_header(&mut input)?;
        if raw.content.contains(ContentFlags::FRAGMENT) {
            warn!("fragmented package not supported, dropping");
            return Ok(());
        }
        let Some(sequence) =
            session
                .connection
                .process_header(&raw, now_ms, &mut session.events_out)
        else {
            if self.config.debug {
                debug!("stale or duplicate package dropped");
            }
            return Ok(());
        };

        if raw.content.contains(ContentFlags::CLIENT_INFO) {
            let client_info = ClientInfoMessage::read(&mut input)?;
            match self.state {
                ConnectionState::Connected => {
                    if let Some(current) = session.client_id {
                        if current != client_info.client_id {
                            return Err(ClientError::ClientIdChanged {
                                old: current,
                                new: client_info.client_id,
                            });
                        }
                    }
                }
                ConnectionState::Connecting => {
                    let ours = protocol_suffix(&self.config.protocol_version);
                    let theirs = protocol_suffix(&client_info.protocol_id);
                    if ours != theirs && self.config.verify_protocol {
                        warn!(ours, theirs, "protocol mismatch, disconnecting");
                        return Err(ClientError::ProtocolMismatch {
                            ours: ours.to_string(),
                            theirs: theirs.to_string(),
                        });
                    }
                    if ours != theirs {
                        warn!(ours, theirs, "protocol mismatch (verification off)");
                    }
                    session.client_id = Some(client_info.client_id);
                    session.server_tick_rate = client_info.server_tick_rate;
                    session.compression_model =
                        CompressionModel::from_blob(&client_info.model_data);
                    self.state = ConnectionState::Connected;
                    info!(
                        client_id = client_info.client_id,
                        tick_rate = client_info.server_tick_rate,
                        "connected"
                    );
                }
                ConnectionState::Disconnected => {}
            }
        }

        if raw.content.contains(ContentFlags::MAP_INFO) {
            let map = MapInfoMessage::read(&mut input)?;
            if map.map_sequence > session.map_info.map_sequence {
                if self.config.debug {
                    debug!(map_sequence = map.map_sequence, "map reset");
                }
                session.map_info.map_sequence = map.map_sequence;
                session.map_info.ack_sequence = sequence;
                session.map_info.processed = false;
                session.map_info.data = map.data;
                session.map_info.schema = map.schema;
                session.snapshot.reset();
            }
        }

        if raw.content.contains(ContentFlags::EVENTS) {
            let events = read_events(&mut input, &self.limits)?;
            session.events_in.extend(events);
        }

        if raw.content.contains(ContentFlags::SNAPSHOT) {
            let gated = self.state != ConnectionState::Connected
                || sequence < session.map_info.ack_sequence;
            if gated {
                if self.config.debug {
                    debug!(sequence, "snapshot skipped");
                }
            } else {
                let predictor: &dyn Predictor = &*self.predictor;
                let stats = read_snapshot(
                    &mut input,
                    sequence,
                    &mut session.snapshot,
                    &mut session.registry,
                    &predictor,
                    now_ms,
                )?;
                if !stats.advanced_time {
                    debug!(
                        server_time = stats.server_time,
                        current = session.snapshot.server_time,
                        "out-of-order snapshot, cached without advancing time"
                    );
                }
                if stats.hash_mismatches > 0 {
                    warn!(
                        mismatches = stats.hash_mismatches,
                        sequence, "entity delta hash mismatch"
                    );
                    debug_assert_eq!(stats.hash_mismatches, 0, "entity delta hash mismatch");
                }
            }
        }

        Ok(())
    }

    /// Builds and sends one upload package.
    ///
    /// A no-op until the server has spoken to us, and when there is nothing
    /// to say: no pending config, no new commands, no queued events.
    pub fn send_data(&mut self) -> ClientResult<()> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        let debug_enabled = self.config.debug;
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if session.connection.in_sequence() == 0 {
            return Ok(());
        }

        let send_config = session.connection.send_client_config;
        let new_commands = session.commands.sequence > session.last_sent_command_sequence;
        let have_events = !session.events_out.is_empty();
        if !send_config && !new_commands && !have_events {
            return Ok(());
        }

        let include_commands = session.commands.sequence > 0 && session.command_schema.is_some();
        let mut content = ContentFlags::empty();
        if send_config {
            content.add_message(ContentFlags::CLIENT_CONFIG);
        }
        if include_commands {
            content.add_message(ContentFlags::COMMANDS);
        }
        let mut events = Vec::new();
        while events.len() < self.limits.max_events_per_package {
            let Some(event) = session.events_out.pop_front() else {
                break;
            };
            events.push(event);
        }
        if !events.is_empty() {
            content.add_message(ContentFlags::EVENTS);
        }

        let sequence = session.connection.begin_package(&mut session.events_out);
        let ack_sequence = session.connection.in_sequence();
        let ack_mask = session.connection.receive_mask();
        let model = session.compression_model.clone();

        let mut out = C::output(&model, &mut session.send_buffer);
        write_package_header(&mut out, sequence, ack_sequence, ack_mask, content)?;
        if send_config {
            ClientConfigMessage {
                server_update_rate: self.config.server_update_rate,
                server_update_send_rate: self.config.server_update_send_rate,
            }
            .write(&mut out)?;
        }
        if include_commands {
            let schema = session.command_schema.as_ref().expect("checked above");
            let include_schema = session.connection.command_sequence_ack == 0;
            command::write_commands(&mut out, &session.commands, schema, include_schema)?;
        }
        if !events.is_empty() {
            write_events(&mut out, &events)?;
        }
        let len = out.flush();
        drop(out);

        session.connection.commit_package(
            sequence,
            PackageInfo {
                content,
                command_sequence: session.commands.sequence,
                command_time: session.commands.latest_time(),
                events,
            },
        );
        if send_config {
            session.connection.send_client_config = false;
        }
        session.last_sent_command_sequence = session.commands.sequence;

        if self.config.block_out {
            if debug_enabled {
                debug!(sequence, "blockout set, dropping outbound package");
            }
            return Ok(());
        }
        self.transport
            .send(self.connection_id, &session.send_buffer[..len]);
        Ok(())
    }

    /// Replays the latest snapshot's lists into the consumer, draining them.
    pub fn process_snapshot(&mut self, consumer: &mut dyn SnapshotConsumer) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let server_time = session.snapshot.server_time;
        let spawns = std::mem::take(&mut session.snapshot.spawns);
        let updates = std::mem::take(&mut session.snapshot.updates);
        let despawns = std::mem::take(&mut session.snapshot.despawns);

        for &id in &spawns {
            let type_id = session
                .snapshot
                .entity(id)
                .and_then(|slot| slot.type_id())
                .unwrap_or(0);
            consumer.process_entity_spawn(server_time, id, type_id);
        }
        for &id in &updates {
            let Some(slot) = session.snapshot.entity(id) else {
                continue;
            };
            let Some(type_id) = slot.type_id() else {
                continue;
            };
            let size = session
                .registry
                .get(type_id)
                .map_or(0, |ty| ty.schema.byte_size());
            consumer.process_entity_update(server_time, id, &slot.last_update[..size]);
        }
        for &id in &despawns {
            consumer.process_entity_despawn(server_time, id);
        }
        consumer.process_snapshot(server_time);
    }

    /// The adopted map, for inspection.
    #[must_use]
    pub fn map_info(&self) -> Option<&MapInfo> {
        self.session.as_ref().map(|s| &s.map_info)
    }
}
