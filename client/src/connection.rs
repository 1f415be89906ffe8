//! Per-session framing glue: sequence tracking, the outstanding-package
//! table, and the client's delivery-feedback overrides.

use std::collections::VecDeque;

use tracing::debug;
use wire::{ContentFlags, DeliveryTracker, InboundTracker, Limits, RawHeader};

use crate::event::Event;
use crate::transport::ConnectionId;

/// What an outbound package carried, kept until its fate is known.
///
/// Reliable events are owned by this record while the package is in flight;
/// they are dropped on delivery and moved back to the outbound queue on
/// loss.
#[derive(Debug, Default)]
pub struct PackageInfo {
    /// Declared payload segments.
    pub content: ContentFlags,
    /// Newest command sequence the package carried.
    pub command_sequence: u32,
    /// Time of that command.
    pub command_time: i32,
    /// Reliable events riding the package.
    pub events: Vec<Event>,
}

/// Framing state for one client session.
#[derive(Debug)]
pub struct ClientConnection {
    /// Transport handle this session is bound to.
    pub connection_id: ConnectionId,
    out_sequence: u32,
    inbound: InboundTracker,
    delivery: DeliveryTracker<PackageInfo>,
    /// Newest command sequence the server has confirmed receiving.
    pub command_sequence_ack: u32,
    /// Time of the newest acknowledged command.
    pub last_acknowledged_command_time: i32,
    /// Set while a ClientConfig upload awaits a delivered package.
    pub send_client_config: bool,
}

impl ClientConnection {
    /// Creates framing state for a fresh session. The pending ClientConfig
    /// flag starts set so the first package uploads our configuration.
    #[must_use]
    pub fn new(connection_id: ConnectionId, limits: &Limits) -> Self {
        Self {
            connection_id,
            out_sequence: 0,
            inbound: InboundTracker::new(),
            delivery: DeliveryTracker::new(limits.max_outstanding_packages),
            command_sequence_ack: 0,
            last_acknowledged_command_time: 0,
            send_client_config: true,
        }
    }

    /// Newest accepted inbound sequence; 0 until the server has spoken.
    #[must_use]
    pub const fn in_sequence(&self) -> u32 {
        self.inbound.in_sequence()
    }

    /// Wall-clock milliseconds of the newest accepted package.
    #[must_use]
    pub const fn in_sequence_time(&self) -> u64 {
        self.inbound.in_sequence_time()
    }

    /// Newest sent outbound sequence.
    #[must_use]
    pub const fn out_sequence(&self) -> u32 {
        self.out_sequence
    }

    /// Receipt bitfield to attach to the next outbound header.
    #[must_use]
    pub const fn receive_mask(&self) -> u16 {
        self.inbound.receive_mask()
    }

    /// Accepts an inbound header and walks its ack bitfield against the
    /// outstanding table.
    ///
    /// Returns the expanded package sequence, or `None` for duplicates and
    /// stale packages, which the caller drops without reading further.
    ///
    /// Delivery overrides: a delivered package advances the command ack; a
    /// lost package re-arms the ClientConfig upload if it carried one, and
    /// its reliable events go back to the front of `events_out`.
    pub fn process_header(
        &mut self,
        raw: &RawHeader,
        now_ms: u64,
        events_out: &mut VecDeque<Event>,
    ) -> Option<u32> {
        let sequence = self.inbound.accept(raw.sequence_lsb, now_ms)?;

        let ack_sequence = self.delivery.expand_ack(self.out_sequence, raw.ack_sequence_lsb);
        if ack_sequence > 0 {
            let command_sequence_ack = &mut self.command_sequence_ack;
            let last_acknowledged_command_time = &mut self.last_acknowledged_command_time;
            let send_client_config = &mut self.send_client_config;
            self.delivery
                .process_ack(ack_sequence, raw.ack_mask, |seq, info, made_it| {
                    if made_it {
                        if info.content.contains(ContentFlags::COMMANDS)
                            && info.command_sequence > *command_sequence_ack
                        {
                            *command_sequence_ack = info.command_sequence;
                            *last_acknowledged_command_time = info.command_time;
                        }
                    } else {
                        if info.content.contains(ContentFlags::CLIENT_CONFIG) {
                            *send_client_config = true;
                        }
                        if !info.events.is_empty() {
                            debug!(
                                sequence = seq,
                                events = info.events.len(),
                                "package lost, re-queueing reliable events"
                            );
                        }
                        for event in info.events.into_iter().rev() {
                            events_out.push_front(event);
                        }
                    }
                });
        }
        Some(sequence)
    }

    /// Allocates the next outbound sequence and its outstanding slot.
    ///
    /// A still-tracked package evicted by the slot reuse is treated as lost
    /// on the spot: its events re-queue and its config re-arms.
    pub fn begin_package(&mut self, events_out: &mut VecDeque<Event>) -> u32 {
        self.out_sequence += 1;
        let (evicted, _) = self.delivery.register(self.out_sequence);
        if let Some((seq, info)) = evicted {
            debug!(sequence = seq, "outstanding package evicted unacked");
            if info.content.contains(ContentFlags::CLIENT_CONFIG) {
                self.send_client_config = true;
            }
            for event in info.events.into_iter().rev() {
                events_out.push_front(event);
            }
        }
        self.out_sequence
    }

    /// Records what the package at `sequence` ended up carrying.
    pub fn commit_package(&mut self, sequence: u32, info: PackageInfo) {
        if let Some(slot) = self.delivery.info_mut(sequence) {
            *slot = info;
        }
    }
}
