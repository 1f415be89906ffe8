//! Command upload: the sliding window of recent per-tick inputs.
//!
//! Outbound commands live in a 3-slot ring keyed by a monotonically growing
//! command sequence. Every commands section re-sends the resident window as
//! a delta chain, newest first, each command coded against the previously
//! written one (the newest against the all-zero command). The server
//! tolerates overwritten slots because the chain always starts from zero.
//!
//! The window size is a wire contract shared with the server; never change
//! it.

use bitstream::{InputStream, OutputStream};
use codec::{delta_read, delta_write};
use schema::{Schema, FIELDS_CHANGED_BYTES, MASK_ALL};
use wire::{expand_sequence, SequenceBuffer};

use crate::error::{ClientError, ClientResult};

/// Number of unacked commands kept in flight.
pub const COMMAND_RING_SIZE: usize = 3;

/// Upper bound on one command body.
pub const MAX_COMMAND_DATA_SIZE: usize = 512;

/// Entropy contexts owned by the commands section.
pub mod contexts {
    use bitstream::DeltaContext;

    pub const COMMAND_TIME: DeltaContext = DeltaContext::new(73);
}

/// One queued command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandRecord {
    /// Simulation tick time the command applies to.
    pub time: i32,
    /// Canonical field image of the command, sized by the command schema.
    pub data: Vec<u8>,
}

/// The outbound 3-slot command window.
#[derive(Debug)]
pub struct CommandRing {
    /// Newest queued command sequence; 0 before the first command.
    pub sequence: u32,
    ring: SequenceBuffer<CommandRecord>,
}

impl Default for CommandRing {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRing {
    /// Creates an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sequence: 0,
            ring: SequenceBuffer::new(COMMAND_RING_SIZE),
        }
    }

    /// Queues a command, assigning it the next sequence. The oldest resident
    /// command is overwritten once three are in flight.
    pub fn queue(&mut self, time: i32, data: Vec<u8>) -> u32 {
        self.sequence += 1;
        *self.ring.acquire(self.sequence) = CommandRecord { time, data };
        self.sequence
    }

    /// Returns the command at `sequence` if still resident.
    #[must_use]
    pub fn get(&self, sequence: u32) -> Option<&CommandRecord> {
        self.ring.try_get(sequence)
    }

    /// Time of the newest queued command, 0 when none.
    #[must_use]
    pub fn latest_time(&self) -> i32 {
        self.get(self.sequence).map_or(0, |cmd| cmd.time)
    }
}

/// Writes one package's commands section.
///
/// `include_schema` is set until the server has acked any command.
pub fn write_commands<O: OutputStream>(
    out: &mut O,
    ring: &CommandRing,
    schema: &Schema,
    include_schema: bool,
) -> ClientResult<()> {
    out.write_raw_bits(u32::from(include_schema), 1)?;
    if include_schema {
        schema.write(out)?;
    }
    out.write_raw_bits(ring.sequence & 0xFFFF, 16)?;

    let zero = schema.zero_baseline();
    let mut prev_time = 0i32;
    let mut prev_data: &[u8] = &zero;
    let mut sequence = ring.sequence;
    while sequence > 0 {
        let Some(command) = ring.get(sequence) else {
            break;
        };
        out.write_raw_bits(1, 1)?;
        out.write_packed_int_delta(command.time, prev_time, contexts::COMMAND_TIME)?;
        delta_write(out, schema, &command.data, prev_data, MASK_ALL)?;
        prev_time = command.time;
        prev_data = &command.data;
        sequence -= 1;
    }
    out.write_raw_bits(0, 1)?;
    Ok(())
}

/// Server-side view of a client's command stream.
#[derive(Debug)]
pub struct CommandReceiver {
    /// Schema announced by the client, installed on first sight.
    pub schema: Option<Schema>,
    /// Newest command sequence seen.
    pub sequence: u32,
    ring: SequenceBuffer<CommandRecord>,
}

impl Default for CommandReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandReceiver {
    /// Creates an empty receiver.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema: None,
            sequence: 0,
            ring: SequenceBuffer::new(COMMAND_RING_SIZE),
        }
    }

    /// Returns the newest received command.
    #[must_use]
    pub fn latest(&self) -> Option<(u32, &CommandRecord)> {
        self.ring.try_get(self.sequence).map(|cmd| (self.sequence, cmd))
    }

    /// Returns the command at an exact sequence if resident.
    #[must_use]
    pub fn get(&self, sequence: u32) -> Option<&CommandRecord> {
        self.ring.try_get(sequence)
    }

    /// Reads one package's commands section.
    pub fn read_commands<I: InputStream>(&mut self, input: &mut I) -> ClientResult<()> {
        let include_schema = input.read_raw_bits(1)? == 1;
        if include_schema {
            let schema = Schema::read(input)?;
            if self.schema.is_none() {
                self.schema = Some(schema);
            }
        }
        let sequence_lsb = input.read_raw_bits(16)? as u16;
        let sequence = expand_sequence(self.sequence, sequence_lsb);

        let Some(schema) = self.schema.clone() else {
            return Err(ClientError::NoCommandSchema);
        };
        let size = schema.byte_size();

        let mut prev_time = 0i32;
        let mut prev_data = vec![0u8; size];
        let mut index = 0u32;
        let mut changed = [0u8; FIELDS_CHANGED_BYTES];
        while input.read_raw_bits(1)? == 1 {
            if index >= COMMAND_RING_SIZE as u32 {
                return Err(ClientError::Wire(wire::WireError::InvalidContent {
                    raw: wire::ContentFlags::COMMANDS,
                }));
            }
            let time = input.read_packed_int_delta(prev_time, contexts::COMMAND_TIME)?;
            let mut data = vec![0u8; size];
            delta_read(input, &schema, &prev_data, &mut data, &mut changed, MASK_ALL)?;

            let command_sequence = sequence.saturating_sub(index);
            if command_sequence > 0 {
                *self.ring.acquire(command_sequence) = CommandRecord {
                    time,
                    data: data.clone(),
                };
            }
            prev_time = time;
            prev_data = data;
            index += 1;
        }
        if sequence > self.sequence {
            self.sequence = sequence;
        }
        Ok(())
    }
}
