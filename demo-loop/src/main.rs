use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bitstream::{DeltaContext, RawStreamCodec, StreamKind};
use clap::Parser;
use client::{
    Client, ClientConfig, Event, LoopbackTransport, MapUpdateConsumer, ServerConfig,
    ServerSession, SnapshotConsumer, Transport, TransportEvent,
};
use schema::{FieldDef, Schema};
use serde::Serialize;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "demo-loop",
    version,
    about = "Deterministic client/server loopback run"
)]
struct Cli {
    /// Number of simulated entities.
    #[arg(long, default_value_t = 8)]
    entities: u32,
    /// Number of ticks to simulate.
    #[arg(long, default_value_t = 300)]
    ticks: i32,
    /// RNG seed for deterministic results.
    #[arg(long, default_value_t = 1)]
    seed: u32,
    /// Drop every Nth datagram (0 = lossless) in each direction.
    #[arg(long, default_value_t = 0)]
    drop_every: usize,
    /// Stream variant; only `raw` is built in.
    #[arg(long, default_value = "raw")]
    stream: StreamKind,
    /// Enable per-entity hashing on the server.
    #[arg(long, default_value_t = false)]
    hashing: bool,
    /// Optional path for a JSON run summary.
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Serialize)]
struct Summary {
    entities: u32,
    ticks: i32,
    seed: u32,
    drop_every: usize,
    packages_sent: u32,
    packages_dropped: u64,
    snapshots_applied: u32,
    entity_updates: u32,
    converged: bool,
}

#[derive(Default)]
struct Stats {
    snapshots: u32,
    updates: u32,
}

impl SnapshotConsumer for Stats {
    fn process_entity_spawn(&mut self, _t: i32, _id: u32, _ty: u16) {}
    fn process_entity_update(&mut self, _t: i32, _id: u32, _data: &[u8]) {
        self.updates += 1;
    }
    fn process_entity_despawn(&mut self, _t: i32, _id: u32) {}
    fn process_snapshot(&mut self, _t: i32) {
        self.snapshots += 1;
    }
}

struct MapLogger;
impl MapUpdateConsumer for MapLogger {
    fn on_map_update(&mut self, data: &[u8]) {
        info!(bytes = data.len(), "map payload adopted");
    }
}

fn entity_schema() -> Schema {
    Schema::new(vec![
        FieldDef::uint(10, DeltaContext::new(100)),
        FieldDef::int(12, DeltaContext::new(101)),
        FieldDef::uint(8, DeltaContext::new(102)),
    ])
    .unwrap()
}

fn command_schema() -> Schema {
    Schema::new(vec![
        FieldDef::int(16, DeltaContext::new(110)),
        FieldDef::uint(8, DeltaContext::new(111)),
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

struct Rng(u32);

impl Rng {
    fn next(&mut self) -> u32 {
        let mut x = self.0.max(1);
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();
    let cli = Cli::parse();
    anyhow::ensure!(
        cli.stream == StreamKind::Raw,
        "only the raw stream variant is built into the demo"
    );

    let schema = entity_schema();
    let (client_side, server_side) = LoopbackTransport::pair();
    let mut client: Client<LoopbackTransport, RawStreamCodec> =
        Client::new(ClientConfig::default(), client_side);
    client.set_command_schema(command_schema());

    let mut server_transport = server_side;
    let mut server: ServerSession<RawStreamCodec> = ServerSession::new(ServerConfig {
        enable_hashing: cli.hashing,
        ..ServerConfig::default()
    });
    server.register_entity_type(5, schema.clone(), schema.zero_baseline());
    server.set_map(vec![cli.seed as u8, 0xAB], None);

    if cli.drop_every > 0 {
        let pattern: Vec<bool> = (0..cli.ticks as usize)
            .map(|i| i % cli.drop_every == cli.drop_every - 1)
            .collect();
        server_transport.script_drops(pattern.clone());
        client.transport_mut().script_drops(pattern);
    }

    client
        .connect("server.example")
        .context("loopback connect")?;
    pump(&mut server_transport, &mut server)?;
    client.update(&mut MapLogger)?;

    let mut rng = Rng(cli.seed);
    let mut stats = Stats::default();
    let mut packages_sent = 0u32;

    for tick in 0..cli.ticks {
        for id in 0..cli.entities {
            if tick == 0 {
                server.spawn_entity(id, 5, 0xFF);
            }
            let a = rng.next() & 0x3FF;
            let b = (rng.next() & 0xFFF) as i32 - 2048;
            let c = rng.next() & 0xFF;
            server.set_entity_state(id, &image(&[a, b as u32, c]));
        }
        if tick % 64 == 32 {
            server.queue_event(Event::new(1, vec![tick as u8]));
        }

        let package = server.write_package(1000 + tick * 16)?;
        server_transport.send(LoopbackTransport::CONNECTION, &package);
        packages_sent += 1;

        client.update(&mut MapLogger)?;
        client.process_snapshot(&mut stats);

        client.queue_command(tick, &image(&[1, (tick & 0xFF) as u32]))?;
        client.send_data()?;
        pump(&mut server_transport, &mut server)?;
    }

    // Settle without loss so the final states line up.
    for tick in cli.ticks..cli.ticks + 8 {
        let package = server.write_package(1000 + tick * 16)?;
        server_transport.send(LoopbackTransport::CONNECTION, &package);
        packages_sent += 1;
        client.update(&mut MapLogger)?;
        client.process_snapshot(&mut stats);
        client.queue_command(tick, &image(&[1, 0]))?;
        client.send_data()?;
        pump(&mut server_transport, &mut server)?;
    }

    let converged = check_converged(&client, &server, &schema);
    info!(
        packages_sent,
        snapshots = stats.snapshots,
        updates = stats.updates,
        converged,
        "run complete"
    );

    let summary = Summary {
        entities: cli.entities,
        ticks: cli.ticks,
        seed: cli.seed,
        drop_every: cli.drop_every,
        packages_sent,
        packages_dropped: server_transport.dropped() + client.transport_mut().dropped(),
        snapshots_applied: stats.snapshots,
        entity_updates: stats.updates,
        converged,
    };
    if let Some(path) = &cli.summary {
        let contents = serde_json::to_string_pretty(&summary).context("serialize summary")?;
        fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
    }
    anyhow::ensure!(converged, "client diverged from server state");
    Ok(())
}

fn pump(
    transport: &mut LoopbackTransport,
    server: &mut ServerSession<RawStreamCodec>,
) -> Result<()> {
    transport.update();
    while let Some(event) = transport.next_event() {
        if let TransportEvent::Data { data, .. } = event {
            server.receive(&data, 0).context("server receive")?;
        }
    }
    Ok(())
}

fn check_converged(
    client: &Client<LoopbackTransport, RawStreamCodec>,
    server: &ServerSession<RawStreamCodec>,
    schema: &Schema,
) -> bool {
    let Some(state) = client.snapshot_state() else {
        return false;
    };
    server.alive_entities().into_iter().all(|id| {
        let server_image = server.entity_state(id).unwrap_or(&[]);
        state
            .entity(id)
            .filter(|slot| slot.is_live())
            .map(|slot| &slot.last_update[..schema.byte_size()] == server_image)
            .unwrap_or(false)
    })
}
