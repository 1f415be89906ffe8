//! Session-level messages: handshake, map resets, and config upload.

use bitstream::{InputStream, OutputStream};
use schema::Schema;

use crate::error::ClientResult;

/// Upper bound on the protocol id string.
pub const MAX_PROTOCOL_ID_BYTES: usize = 255;

/// Server handshake. Sent by the server until the client's first package
/// acks one; acted on only while the session is connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfoMessage {
    /// Id the server assigned to this client.
    pub client_id: u8,
    /// Server simulation rate in ticks per second.
    pub server_tick_rate: u8,
    /// Dotted protocol id; only the suffix after the last `.` is compared.
    pub protocol_id: String,
    /// Compression model blob for the entropy coder.
    pub model_data: Vec<u8>,
}

impl ClientInfoMessage {
    /// Writes the handshake.
    pub fn write<O: OutputStream>(&self, out: &mut O) -> ClientResult<()> {
        out.write_raw_bits(u32::from(self.client_id), 8)?;
        out.write_raw_bits(u32::from(self.server_tick_rate), 8)?;
        let protocol = self.protocol_id.as_bytes();
        let protocol_len = protocol.len().min(MAX_PROTOCOL_ID_BYTES);
        out.write_raw_bits(protocol_len as u32, 8)?;
        out.write_raw_bytes(&protocol[..protocol_len])?;
        out.write_raw_bits(self.model_data.len() as u32, 16)?;
        out.write_raw_bytes(&self.model_data)?;
        Ok(())
    }

    /// Reads the handshake.
    pub fn read<I: InputStream>(input: &mut I) -> ClientResult<Self> {
        let client_id = input.read_raw_bits(8)? as u8;
        let server_tick_rate = input.read_raw_bits(8)? as u8;
        let protocol_len = input.read_raw_bits(8)? as usize;
        let mut protocol = vec![0u8; protocol_len];
        input.read_raw_bytes(&mut protocol)?;
        let model_size = input.read_raw_bits(16)? as usize;
        let mut model_data = vec![0u8; model_size];
        input.read_raw_bytes(&mut model_data)?;
        Ok(Self {
            client_id,
            server_tick_rate,
            protocol_id: String::from_utf8_lossy(&protocol).into_owned(),
            model_data,
        })
    }
}

/// Map reset payload, sent whenever the server's map changes.
#[derive(Debug, Clone, PartialEq)]
pub struct MapInfoMessage {
    /// Monotonically increasing map generation.
    pub map_sequence: u16,
    /// Optional schema describing the map payload.
    pub schema: Option<Schema>,
    /// Opaque map payload handed to the map consumer.
    pub data: Vec<u8>,
}

impl MapInfoMessage {
    /// Writes the map message.
    pub fn write<O: OutputStream>(&self, out: &mut O) -> ClientResult<()> {
        out.write_raw_bits(u32::from(self.map_sequence), 16)?;
        out.write_raw_bits(u32::from(self.schema.is_some()), 1)?;
        if let Some(schema) = &self.schema {
            schema.write(out)?;
        }
        out.write_raw_bits(self.data.len() as u32, 16)?;
        out.write_raw_bytes(&self.data)?;
        Ok(())
    }

    /// Reads the map message.
    pub fn read<I: InputStream>(input: &mut I) -> ClientResult<Self> {
        let map_sequence = input.read_raw_bits(16)? as u16;
        let schema = if input.read_raw_bits(1)? == 1 {
            Some(Schema::read(input)?)
        } else {
            None
        };
        let len = input.read_raw_bits(16)? as usize;
        let mut data = vec![0u8; len];
        input.read_raw_bytes(&mut data)?;
        Ok(Self {
            map_sequence,
            schema,
            data,
        })
    }
}

/// The client's view of the current map.
#[derive(Debug, Default)]
pub struct MapInfo {
    /// Generation of the adopted map; 0 before the first MapInfo.
    pub map_sequence: u16,
    /// Inbound package sequence at which the map was adopted. Snapshots
    /// from older packages are not processed.
    pub ack_sequence: u32,
    /// Whether the map consumer has been notified of this generation.
    pub processed: bool,
    /// The map payload.
    pub data: Vec<u8>,
    /// Optional schema describing the payload.
    pub schema: Option<Schema>,
}

/// Client configuration upload, resent until a carrying package is acked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfigMessage {
    /// Requested server simulation rate.
    pub server_update_rate: u32,
    /// Requested snapshot send rate.
    pub server_update_send_rate: u16,
}

impl ClientConfigMessage {
    /// Writes the config upload.
    pub fn write<O: OutputStream>(&self, out: &mut O) -> ClientResult<()> {
        out.write_raw_bits(self.server_update_rate, 32)?;
        out.write_raw_bits(u32::from(self.server_update_send_rate), 16)?;
        Ok(())
    }

    /// Reads the config upload.
    pub fn read<I: InputStream>(input: &mut I) -> ClientResult<Self> {
        let server_update_rate = input.read_raw_bits(32)?;
        let server_update_send_rate = input.read_raw_bits(16)? as u16;
        Ok(Self {
            server_update_rate,
            server_update_send_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream::{
        CompressionModel, DeltaContext, OutputStream as _, RawInputStream, RawOutputStream,
        RawStreamCodec, StreamCodec,
    };
    use schema::FieldDef;

    fn roundtrip<W, R, M>(write: W, read: R) -> M
    where
        W: FnOnce(&mut RawOutputStream<'_>),
        R: FnOnce(&mut RawInputStream<'_>) -> M,
    {
        let model = CompressionModel::empty();
        let mut buf = vec![0u8; 2048];
        let mut out = RawStreamCodec::output(&model, &mut buf);
        write(&mut out);
        let len = out.flush();
        let mut input = RawStreamCodec::input(&model, &buf[..len]);
        read(&mut input)
    }

    #[test]
    fn client_info_roundtrip() {
        let msg = ClientInfoMessage {
            client_id: 7,
            server_tick_rate: 60,
            protocol_id: "build.42.a".to_string(),
            model_data: vec![1, 2, 3],
        };
        let decoded = roundtrip(
            |out| msg.write(out).unwrap(),
            |input| ClientInfoMessage::read(input).unwrap(),
        );
        assert_eq!(decoded, msg);
    }

    #[test]
    fn map_info_roundtrip_with_schema() {
        let schema = Schema::new(vec![FieldDef::uint(8, DeltaContext::new(120))]).unwrap();
        let msg = MapInfoMessage {
            map_sequence: 3,
            schema: Some(schema),
            data: vec![9, 9, 9],
        };
        let decoded = roundtrip(
            |out| msg.write(out).unwrap(),
            |input| MapInfoMessage::read(input).unwrap(),
        );
        assert_eq!(decoded, msg);
    }

    #[test]
    fn map_info_roundtrip_without_schema() {
        let msg = MapInfoMessage {
            map_sequence: 1,
            schema: None,
            data: Vec::new(),
        };
        let decoded = roundtrip(
            |out| msg.write(out).unwrap(),
            |input| MapInfoMessage::read(input).unwrap(),
        );
        assert_eq!(decoded, msg);
    }

    #[test]
    fn client_config_roundtrip() {
        let msg = ClientConfigMessage {
            server_update_rate: 60,
            server_update_send_rate: 20,
        };
        let decoded = roundtrip(
            |out| msg.write(out).unwrap(),
            |input| ClientConfigMessage::read(input).unwrap(),
        );
        assert_eq!(decoded, msg);
    }
}
