//! The snapwire client session engine.
//!
//! Consumes datagrams from an unreliable transport and reconstructs a
//! coherent, ordered view of the server simulation: a table of replicated
//! entities, their latest field values, and the server clock. Uploads
//! per-tick commands and reliable events, attaches configuration changes,
//! and tracks per-package delivery so losses are repaired.
//!
//! The [`Client`] facade is polled from the game's tick; the
//! [`server::ServerSession`] mirror exists for tests and the loopback demo.
//!
//! # Design Principles
//!
//! - **Single-threaded, polled** - No operation suspends; the transport is
//!   polled, never awaited.
//! - **Desync is fatal** - Semantic mismatches tear the session down rather
//!   than drifting silently.
//! - **Reliable by feedback** - Config, events, and schemas ride unreliable
//!   packages and are retransmitted on delivery failure.

mod client;
mod command;
mod config;
mod connection;
mod error;
mod event;
pub mod server;
mod session;
mod transport;

pub use client::{Client, ConnectionState, MapUpdateConsumer, SnapshotConsumer};
pub use command::{
    CommandReceiver, CommandRecord, CommandRing, COMMAND_RING_SIZE, MAX_COMMAND_DATA_SIZE,
};
pub use config::{protocol_suffix, ClientConfig, DEFAULT_PORT};
pub use connection::{ClientConnection, PackageInfo};
pub use error::{ClientError, ClientResult};
pub use event::{read_events, write_events, Event};
pub use server::{ServerConfig, ServerSession};
pub use session::{ClientConfigMessage, ClientInfoMessage, MapInfo, MapInfoMessage};
pub use transport::{
    parse_endpoint, resolve_first_ipv4, ConnectionId, LoopbackTransport, Transport, TransportEvent,
};
