//! The literal end-to-end session scenarios: handshake, snapshots, loss.

use bitstream::{DeltaContext, RawStreamCodec};
use client::{
    Client, ClientConfig, ClientError, ConnectionState, Event, LoopbackTransport,
    MapUpdateConsumer, ServerConfig, ServerSession, SnapshotConsumer, Transport, TransportEvent,
};
use schema::{FieldDef, Schema};

fn entity_schema() -> Schema {
    Schema::new(vec![
        FieldDef::uint(8, DeltaContext::new(100)),
        FieldDef::uint(8, DeltaContext::new(101)),
    ])
    .unwrap()
}

fn image(values: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    for &v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

#[derive(Default)]
struct RecordingConsumer {
    spawns: Vec<(u32, u16)>,
    updates: Vec<(u32, Vec<u8>)>,
    despawns: Vec<u32>,
    snapshot_times: Vec<i32>,
}

impl RecordingConsumer {
    fn clear(&mut self) {
        self.spawns.clear();
        self.updates.clear();
        self.despawns.clear();
        self.snapshot_times.clear();
    }
}

impl SnapshotConsumer for RecordingConsumer {
    fn process_entity_spawn(&mut self, _server_time: i32, id: u32, type_id: u16) {
        self.spawns.push((id, type_id));
    }

    fn process_entity_update(&mut self, _server_time: i32, id: u32, data: &[u8]) {
        self.updates.push((id, data.to_vec()));
    }

    fn process_entity_despawn(&mut self, _server_time: i32, id: u32) {
        self.despawns.push(id);
    }

    fn process_snapshot(&mut self, server_time: i32) {
        self.snapshot_times.push(server_time);
    }
}

#[derive(Default)]
struct RecordingMap {
    maps: Vec<Vec<u8>>,
}

impl MapUpdateConsumer for RecordingMap {
    fn on_map_update(&mut self, data: &[u8]) {
        self.maps.push(data.to_vec());
    }
}

/// One client and one server session joined by a loopback pair.
struct Net {
    client: Client<LoopbackTransport, RawStreamCodec>,
    server_transport: LoopbackTransport,
    server: ServerSession<RawStreamCodec>,
    map: RecordingMap,
    now: u64,
}

impl Net {
    fn new(client_config: ClientConfig, server_config: ServerConfig) -> Self {
        let (client_side, server_side) = LoopbackTransport::pair();
        Self {
            client: Client::new(client_config, client_side),
            server_transport: server_side,
            server: ServerSession::new(server_config),
            map: RecordingMap::default(),
            now: 0,
        }
    }

    fn connect(&mut self) {
        self.client.connect("server.example").unwrap();
        // Drain the transport's connect handshake on both sides.
        self.pump_server();
        self.client.update(&mut self.map).unwrap();
    }

    /// Server emits one package carrying the given server time.
    fn server_send(&mut self, server_time: i32) {
        let package = self.server.write_package(server_time).unwrap();
        self.server_transport.send(LoopbackTransport::CONNECTION, &package);
    }

    /// Server consumes everything the client sent.
    fn pump_server(&mut self) {
        self.now += 1;
        self.server_transport.update();
        while let Some(event) = self.server_transport.next_event() {
            if let TransportEvent::Data { data, .. } = event {
                self.server.receive(&data, self.now).unwrap();
            }
        }
    }

    fn client_update(&mut self) -> Result<(), ClientError> {
        self.client.update(&mut self.map)
    }
}

#[test]
fn handshake_protocol_match() {
    let mut net = Net::new(
        ClientConfig {
            protocol_version: "build.42.a".to_string(),
            ..ClientConfig::default()
        },
        ServerConfig {
            client_id: 7,
            server_tick_rate: 60,
            protocol_id: "build.42.a".to_string(),
            model_data: vec![1, 2, 3],
            ..ServerConfig::default()
        },
    );
    net.connect();
    assert_eq!(net.client.connection_state(), ConnectionState::Connecting);

    net.server_send(1000);
    net.client_update().unwrap();
    assert_eq!(net.client.connection_state(), ConnectionState::Connected);
    assert_eq!(net.client.client_id(), Some(7));
    assert_eq!(net.client.server_tick_rate(), 60);

    // The pending ClientConfig goes out with the next send.
    assert!(net.client.will_send_client_config());
    net.client.send_data().unwrap();
    assert!(!net.client.will_send_client_config());
    net.pump_server();
    let config = net.server.client_config().unwrap();
    assert_eq!(config.server_update_rate, 60);
    assert_eq!(config.server_update_send_rate, 20);
}

#[test]
fn handshake_protocol_mismatch_verify_on() {
    let mut net = Net::new(
        ClientConfig {
            protocol_version: "build.42.a".to_string(),
            verify_protocol: true,
            ..ClientConfig::default()
        },
        ServerConfig {
            protocol_id: "build.42.b".to_string(),
            ..ServerConfig::default()
        },
    );
    net.connect();
    net.server_send(1000);
    let err = net.client_update().unwrap_err();
    assert!(matches!(err, ClientError::ProtocolMismatch { .. }));
    assert_eq!(net.client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(net.client.client_id(), None);
}

#[test]
fn handshake_protocol_mismatch_verify_off() {
    let mut net = Net::new(
        ClientConfig {
            protocol_version: "build.42.a".to_string(),
            verify_protocol: false,
            ..ClientConfig::default()
        },
        ServerConfig {
            protocol_id: "build.42.b".to_string(),
            ..ServerConfig::default()
        },
    );
    net.connect();
    net.server_send(1000);
    net.client_update().unwrap();
    assert_eq!(net.client.connection_state(), ConnectionState::Connected);
}

#[test]
fn full_snapshot_then_delta() {
    let schema = entity_schema();
    let mut net = Net::new(ClientConfig::default(), ServerConfig::default());
    net.server
        .register_entity_type(5, schema.clone(), schema.zero_baseline());
    net.server.spawn_entity(3, 5, 0xFF);
    net.server.set_entity_state(3, &image(&[7, 9]));

    net.connect();
    net.server_send(1000);
    net.client_update().unwrap();

    let mut consumer = RecordingConsumer::default();
    net.client.process_snapshot(&mut consumer);
    assert_eq!(consumer.spawns, vec![(3, 5)]);
    assert_eq!(consumer.updates, vec![(3, image(&[7, 9]))]);
    assert!(consumer.despawns.is_empty());
    assert_eq!(consumer.snapshot_times, vec![1000]);

    // Ack the full snapshot so the next one deltas against it.
    net.client.send_data().unwrap();
    net.pump_server();
    assert!(net.server.acked_snapshot() > 0);

    net.server.set_entity_state(3, &image(&[8, 9]));
    net.server_send(1016);
    net.client_update().unwrap();

    consumer.clear();
    net.client.process_snapshot(&mut consumer);
    assert!(consumer.spawns.is_empty());
    assert_eq!(consumer.updates, vec![(3, image(&[8, 9]))]);
    assert_eq!(net.client.server_time(), 1016);
}

#[test]
fn same_snapshot_spawn_and_despawn() {
    let schema = entity_schema();
    let mut net = Net::new(ClientConfig::default(), ServerConfig::default());
    net.server
        .register_entity_type(5, schema.clone(), schema.zero_baseline());

    net.connect();
    net.server_send(1000);
    net.client_update().unwrap();
    let mut consumer = RecordingConsumer::default();
    net.client.process_snapshot(&mut consumer);

    // Entity 4 lives and dies between two server sends.
    net.server.spawn_entity(4, 5, 0xFF);
    net.server.despawn_entity(4);
    net.server_send(1016);
    net.client_update().unwrap();

    consumer.clear();
    net.client.process_snapshot(&mut consumer);
    assert_eq!(consumer.spawns, vec![(4, 5)]);
    assert_eq!(consumer.despawns, vec![4]);

    let state = net.client.snapshot_state().unwrap();
    let slot = state.entity(4).unwrap();
    assert!(slot.is_live(), "slot reserved until the baseline passes it");
    assert_eq!(slot.despawn_sequence, net.client.in_sequence());

    // Ack, then a delta whose baseline has passed the despawn finalises it.
    net.client.send_data().unwrap();
    net.pump_server();
    net.server_send(1032);
    net.client_update().unwrap();
    consumer.clear();
    net.client.process_snapshot(&mut consumer);
    assert!(!net.client.snapshot_state().unwrap().entity(4).unwrap().is_live());
}

#[test]
fn lost_client_config_is_resent() {
    let mut net = Net::new(ClientConfig::default(), ServerConfig::default());
    net.connect();
    net.server_send(1000);
    net.client_update().unwrap();

    // The config-carrying package is eaten by the wire.
    net.client.transport_mut().script_drops([true]);
    net.client.send_data().unwrap();
    assert!(!net.client.will_send_client_config());
    net.pump_server();
    assert!(net.server.client_config().is_none());

    // A later package gets through; its ack bitfield reveals the loss.
    net.client.queue_event(Event::new(1, vec![1])).unwrap();
    net.client.send_data().unwrap();
    net.pump_server();
    net.server_send(1016);
    net.client_update().unwrap();
    assert!(
        net.client.will_send_client_config(),
        "loss re-arms the config upload"
    );

    net.client.send_data().unwrap();
    net.pump_server();
    let config = net.server.client_config().unwrap();
    assert_eq!(config.server_update_rate, 60);
}

#[test]
fn out_of_order_snapshot_does_not_advance_time() {
    let schema = entity_schema();
    let mut net = Net::new(ClientConfig::default(), ServerConfig::default());
    net.server
        .register_entity_type(5, schema.clone(), schema.zero_baseline());
    net.server.spawn_entity(1, 5, 0xFF);

    net.connect();
    net.server_send(4000);
    net.client_update().unwrap();
    let mut consumer = RecordingConsumer::default();
    net.client.process_snapshot(&mut consumer);
    assert_eq!(net.client.server_time(), 4000);
    let received_at = net.client.snapshot_state().unwrap().snapshot_received_time;

    // The next package claims an older simulation time.
    net.server_send(3900);
    net.client_update().unwrap();
    consumer.clear();
    net.client.process_snapshot(&mut consumer);

    assert_eq!(net.client.server_time(), 4000);
    let state = net.client.snapshot_state().unwrap();
    assert_eq!(state.snapshot_received_time, received_at);
    // The stale snapshot still contributed a baseline.
    let newest = net.client.in_sequence();
    assert!(state.entity(1).unwrap().baselines.get(newest).is_some());
}

#[test]
fn map_update_delivered_once() {
    let mut net = Net::new(ClientConfig::default(), ServerConfig::default());
    net.server.set_map(vec![0xAB, 0xCD], None);
    net.connect();
    net.server_send(1000);
    net.client_update().unwrap();
    assert_eq!(net.map.maps, vec![vec![0xAB, 0xCD]]);

    // The map keeps riding packages until acked, but the consumer is only
    // told once per generation.
    net.server_send(1016);
    net.client_update().unwrap();
    assert_eq!(net.map.maps.len(), 1);

    // A new generation resets the snapshot state and notifies again; the
    // snapshot riding the same package then restarts the clock.
    net.server.set_map(vec![0xEE], None);
    net.server_send(1032);
    net.client_update().unwrap();
    assert_eq!(net.map.maps.len(), 2);
    assert_eq!(net.map.maps[1], vec![0xEE]);
    assert_eq!(net.client.server_time(), 1032);
    assert_eq!(net.client.snapshot_state().unwrap().live_entity_count(), 0);
}

#[test]
fn events_flow_both_ways() {
    let mut net = Net::new(ClientConfig::default(), ServerConfig::default());
    net.connect();
    net.server.queue_event(Event::new(4, vec![40]));
    net.server_send(1000);
    net.client_update().unwrap();
    assert_eq!(net.client.poll_event(), Some(Event::new(4, vec![40])));
    assert_eq!(net.client.poll_event(), None);

    net.client.queue_event(Event::new(9, vec![90, 91])).unwrap();
    net.client.send_data().unwrap();
    net.pump_server();
    assert_eq!(net.server.poll_event(), Some(Event::new(9, vec![90, 91])));
}

#[test]
fn commands_reach_server_and_ack_trims_window() {
    let command_schema = Schema::new(vec![
        FieldDef::int(16, DeltaContext::new(110)),
        FieldDef::uint(4, DeltaContext::new(111)),
    ])
    .unwrap();

    let mut net = Net::new(ClientConfig::default(), ServerConfig::default());
    net.client.set_command_schema(command_schema.clone());
    net.connect();
    net.server_send(1000);
    net.client_update().unwrap();

    net.client.queue_command(16, &image(&[3, 1])).unwrap();
    net.client.queue_command(32, &image(&[4, 1])).unwrap();
    net.client.send_data().unwrap();
    net.pump_server();

    let (sequence, latest) = net.server.latest_command().unwrap();
    assert_eq!(sequence, 2);
    assert_eq!(latest.time, 32);
    assert_eq!(latest.data, image(&[4, 1]));
    assert_eq!(net.server.command(1).unwrap().time, 16);

    // The server's next package acks the command-carrying package.
    net.server_send(1016);
    net.client_update().unwrap();
    assert_eq!(net.client.command_sequence_ack(), 2);
}
