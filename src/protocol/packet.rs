//! Binary voice packet codec
//!
//! Little-endian layout, one packet per UDP datagram:
//!
//! ```text
//! ┌────────┬─────────────┬───────────┬─────────┬──────────┬─────────┬──────┐
//! │ cid    │ transmitter │ frequency │ cs len  │ callsign │ payload │ 0x0A │
//! │ i32    │ u8          │ i32       │ u8      │ n bytes  │ ...     │ u8   │
//! └────────┴─────────────┴───────────┴─────────┴──────────┴─────────┴──────┘
//! ```
//!
//! Frequencies above 100000 travel as `frequency - 100000`. The receiving side
//! always adds 100000 back, so parsed frequencies are reported in the upper
//! band even if the sender used the lower one.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::PacketError;

/// Trailing frame delimiter
pub const PACKET_TERMINATOR: u8 = 0x0A;

/// Fixed header: cid + transmitter + frequency + callsign length
pub const HEADER_SIZE: usize = 4 + 1 + 4 + 1;

/// Datagrams shorter than this are rejected without inspection
pub const MIN_PACKET_SIZE: usize = 10;

/// Longest callsign in UTF-8 bytes
pub const MAX_CALLSIGN_LEN: usize = u8::MAX as usize;

/// Exclusive upper bound for transmitted frequencies
pub const MAX_FREQUENCY: u32 = 200_000;

/// Offset removed from upper-band frequencies on the wire
pub const FREQUENCY_OFFSET: u32 = 100_000;

/// A received voice packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicePacket {
    pub cid: i32,
    pub transmitter: u8,
    /// Frequency in kHz x 1000, always expanded into the upper band
    pub frequency: u32,
    pub callsign: String,
    /// Opaque encoded audio
    pub payload: Bytes,
}

/// Serialize a voice packet
pub fn serialize_packet(
    cid: i32,
    transmitter: u8,
    frequency: u32,
    callsign: &str,
    payload: &[u8],
) -> Result<Bytes, PacketError> {
    let callsign_bytes = callsign.as_bytes();
    if callsign_bytes.len() > MAX_CALLSIGN_LEN {
        return Err(PacketError::CallsignTooLong(callsign_bytes.len()));
    }
    if frequency >= MAX_FREQUENCY {
        return Err(PacketError::FrequencyOutOfRange(frequency));
    }

    let wire_frequency = if frequency > FREQUENCY_OFFSET {
        frequency - FREQUENCY_OFFSET
    } else {
        frequency
    };

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + callsign_bytes.len() + payload.len() + 1);
    buf.put_i32_le(cid);
    buf.put_u8(transmitter);
    // < 200000, always fits
    buf.put_i32_le(wire_frequency as i32);
    buf.put_u8(callsign_bytes.len() as u8);
    buf.put_slice(callsign_bytes);
    buf.put_slice(payload);
    buf.put_u8(PACKET_TERMINATOR);

    Ok(buf.freeze())
}

/// Parse a datagram into a voice packet, or `None` if it is malformed
pub fn parse_packet(data: &[u8]) -> Option<VoicePacket> {
    if data.len() < MIN_PACKET_SIZE {
        return None;
    }
    let (body, terminator) = data.split_at(data.len() - 1);
    if terminator[0] != PACKET_TERMINATOR || body.len() < HEADER_SIZE {
        return None;
    }

    let mut cursor = body;
    let cid = cursor.get_i32_le();
    let transmitter = cursor.get_u8();
    let wire_frequency = cursor.get_i32_le();
    let callsign_len = cursor.get_u8() as usize;

    // The callsign must end before the terminator
    if callsign_len > cursor.remaining() {
        return None;
    }
    let callsign = std::str::from_utf8(&cursor[..callsign_len]).ok()?.to_owned();
    cursor.advance(callsign_len);

    let frequency = u32::try_from(i64::from(wire_frequency) + i64::from(FREQUENCY_OFFSET)).ok()?;

    Some(VoicePacket {
        cid,
        transmitter,
        frequency,
        callsign,
        payload: Bytes::copy_from_slice(cursor),
    })
}
