//! The transport contract and an in-process loopback implementation.
//!
//! The engine owns no sockets. A transport hands it datagrams and
//! connect/disconnect events; the engine polls it every tick and never
//! awaits. The loopback transport pairs two endpoints over channels and is
//! what the tests and the demo run on.

use std::collections::VecDeque;
use std::net::{SocketAddr, SocketAddrV4, ToSocketAddrs};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::config::DEFAULT_PORT;
use crate::error::{ClientError, ClientResult};

/// Transport connection handle; `-1` means the connect failed.
pub type ConnectionId = i32;

/// Events surfaced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection identified by the id is established.
    Connect(ConnectionId),
    /// The connection dropped.
    Disconnect(ConnectionId),
    /// One inbound datagram.
    Data {
        connection: ConnectionId,
        data: Vec<u8>,
    },
}

/// A polled datagram transport.
pub trait Transport {
    /// Starts connecting; returns a connection id or `-1` on failure.
    fn connect(&mut self, host: &str, port: u16) -> ConnectionId;

    /// Closes a connection. Completion is observed via
    /// [`TransportEvent::Disconnect`].
    fn disconnect(&mut self, connection: ConnectionId);

    /// Pumps the transport.
    fn update(&mut self);

    /// Pops the next pending event, FIFO.
    fn next_event(&mut self) -> Option<TransportEvent>;

    /// Sends one datagram.
    fn send(&mut self, connection: ConnectionId, data: &[u8]);
}

/// Splits `host[:port]`, applying [`DEFAULT_PORT`] when the port is absent.
pub fn parse_endpoint(endpoint: &str) -> ClientResult<(String, u16)> {
    if endpoint.is_empty() {
        return Err(ClientError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
        });
    }
    match endpoint.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| ClientError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
            })?;
            if host.is_empty() {
                return Err(ClientError::InvalidEndpoint {
                    endpoint: endpoint.to_string(),
                });
            }
            Ok((host.to_string(), port))
        }
        None => Ok((endpoint.to_string(), DEFAULT_PORT)),
    }
}

/// Resolves a host name and picks the first IPv4 address.
pub fn resolve_first_ipv4(host: &str, port: u16) -> Option<SocketAddrV4> {
    (host, port).to_socket_addrs().ok()?.find_map(|addr| match addr {
        SocketAddr::V4(v4) => Some(v4),
        SocketAddr::V6(_) => None,
    })
}

#[derive(Debug, Clone)]
enum Frame {
    Connect,
    Disconnect,
    Data(Vec<u8>),
}

/// An in-process transport: two endpoints joined by channels.
///
/// Deterministic by construction. A drop script can be installed on either
/// endpoint to simulate loss: each queued `true` drops the next outbound
/// datagram.
#[derive(Debug)]
pub struct LoopbackTransport {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    events: VecDeque<TransportEvent>,
    connected: bool,
    drop_script: VecDeque<bool>,
    dropped: u64,
}

impl LoopbackTransport {
    /// Connection id used by both ends of a loopback pair.
    pub const CONNECTION: ConnectionId = 0;

    /// Creates a joined pair of endpoints.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = unbounded();
        let (tx_b, rx_a) = unbounded();
        let make = |tx, rx| Self {
            tx,
            rx,
            events: VecDeque::new(),
            connected: false,
            drop_script: VecDeque::new(),
            dropped: 0,
        };
        (make(tx_a, rx_a), make(tx_b, rx_b))
    }

    /// Queues a loss pattern; each `true` drops one future outbound datagram.
    pub fn script_drops<I: IntoIterator<Item = bool>>(&mut self, pattern: I) {
        self.drop_script.extend(pattern);
    }

    /// Number of datagrams dropped by the script so far.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Marks the peer-initiated side of the pair as connected. The
    /// client-facing side connects through [`Transport::connect`].
    pub fn accept(&mut self) {
        if !self.connected {
            self.connected = true;
            self.events.push_back(TransportEvent::Connect(Self::CONNECTION));
        }
    }
}

impl Transport for LoopbackTransport {
    fn connect(&mut self, _host: &str, _port: u16) -> ConnectionId {
        self.connected = true;
        self.events.push_back(TransportEvent::Connect(Self::CONNECTION));
        let _ = self.tx.send(Frame::Connect);
        Self::CONNECTION
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        if connection != Self::CONNECTION || !self.connected {
            return;
        }
        self.connected = false;
        let _ = self.tx.send(Frame::Disconnect);
        self.events.push_back(TransportEvent::Disconnect(Self::CONNECTION));
    }

    fn update(&mut self) {
        while let Ok(frame) = self.rx.try_recv() {
            match frame {
                Frame::Connect => {
                    if !self.connected {
                        self.connected = true;
                        self.events.push_back(TransportEvent::Connect(Self::CONNECTION));
                    }
                }
                Frame::Disconnect => {
                    if self.connected {
                        self.connected = false;
                        self.events
                            .push_back(TransportEvent::Disconnect(Self::CONNECTION));
                    }
                }
                Frame::Data(data) => {
                    self.events.push_back(TransportEvent::Data {
                        connection: Self::CONNECTION,
                        data,
                    });
                }
            }
        }
    }

    fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }

    fn send(&mut self, connection: ConnectionId, data: &[u8]) {
        if connection != Self::CONNECTION {
            return;
        }
        if self.drop_script.pop_front().unwrap_or(false) {
            self.dropped += 1;
            return;
        }
        let _ = self.tx.send(Frame::Data(data.to_vec()));
    }
}
