//! Reliable game events.
//!
//! Events are opaque to the engine. They are reliable: an event rides a
//! package, its ownership moves into the outstanding-package slot, and on a
//! delivery failure it moves back to the front of the outbound queue.

use bitstream::{InputStream, OutputStream};
use wire::Limits;

use crate::error::ClientResult;

/// Entropy contexts owned by the event section.
pub mod contexts {
    use bitstream::DeltaContext;

    pub const EVENT_COUNT: DeltaContext = DeltaContext::new(70);
    pub const EVENT_TYPE: DeltaContext = DeltaContext::new(71);
    pub const EVENT_LENGTH: DeltaContext = DeltaContext::new(72);
}

/// One reliable game message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Event {
    /// Game-defined event type.
    pub type_id: u16,
    /// Opaque payload.
    pub data: Vec<u8>,
}

impl Event {
    /// Creates an event.
    #[must_use]
    pub fn new(type_id: u16, data: Vec<u8>) -> Self {
        Self { type_id, data }
    }
}

/// Writes one package's event section.
pub fn write_events<O: OutputStream>(out: &mut O, events: &[Event]) -> ClientResult<()> {
    out.write_packed_uint(events.len() as u32, contexts::EVENT_COUNT)?;
    for event in events {
        out.write_packed_uint(u32::from(event.type_id), contexts::EVENT_TYPE)?;
        out.write_packed_uint(event.data.len() as u32, contexts::EVENT_LENGTH)?;
        out.write_raw_bytes(&event.data)?;
    }
    Ok(())
}

/// Reads one package's event section.
///
/// Counts and lengths beyond the configured limits are malformed input;
/// truncating them would desynchronise the rest of the package.
pub fn read_events<I: InputStream>(input: &mut I, limits: &Limits) -> ClientResult<Vec<Event>> {
    let count = input.read_packed_uint(contexts::EVENT_COUNT)? as usize;
    if count > limits.max_events_per_package {
        return Err(wire::WireError::PackageTooLarge {
            actual: count,
            limit: limits.max_events_per_package,
        }
        .into());
    }
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        let type_id = input.read_packed_uint(contexts::EVENT_TYPE)? as u16;
        let len = input.read_packed_uint(contexts::EVENT_LENGTH)? as usize;
        if len > limits.max_event_bytes {
            return Err(wire::WireError::PackageTooLarge {
                actual: len,
                limit: limits.max_event_bytes,
            }
            .into());
        }
        let mut data = vec![0u8; len];
        input.read_raw_bytes(&mut data)?;
        events.push(Event { type_id, data });
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream::{CompressionModel, RawStreamCodec, StreamCodec};

    #[test]
    fn events_roundtrip() {
        let events = vec![
            Event::new(1, vec![1, 2, 3]),
            Event::new(9, Vec::new()),
            Event::new(2, vec![0xFF; 16]),
        ];
        let model = CompressionModel::empty();
        let mut buf = [0u8; 256];
        let mut out = RawStreamCodec::output(&model, &mut buf);
        write_events(&mut out, &events).unwrap();
        let len = out.flush();

        let mut input = RawStreamCodec::input(&model, &buf[..len]);
        let decoded = read_events(&mut input, &Limits::default()).unwrap();
        assert_eq!(decoded, events);
    }

    #[test]
    fn empty_event_section_roundtrip() {
        let model = CompressionModel::empty();
        let mut buf = [0u8; 16];
        let mut out = RawStreamCodec::output(&model, &mut buf);
        write_events(&mut out, &[]).unwrap();
        let len = out.flush();

        let mut input = RawStreamCodec::input(&model, &buf[..len]);
        let decoded = read_events(&mut input, &Limits::default()).unwrap();
        assert!(decoded.is_empty());
    }
}
