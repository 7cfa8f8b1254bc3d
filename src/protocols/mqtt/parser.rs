//! MQTT fixed header decoding and CONNACK encoding.

use clap::ValueEnum;
use serde::Deserialize;

/// Size of the fixed header when the remaining length fits in one byte.
pub const HEADER_LEN: usize = 2;

/// Maximum number of remaining-length bytes in the variable encoding.
pub const MAX_LENGTH_BYTES: usize = 4;

/// CONNACK: packet type 2, remaining length 2, session-present 0, return code 0.
pub const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

/// Decoded fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    /// Control packet type (high nibble of byte 0).
    pub packet_type: u8,
    /// Packet-specific flags (low nibble of byte 0). Not interpreted.
    pub flags: u8,
    /// Declared byte count of everything after the fixed header.
    pub remaining_length: usize,
    /// Bytes the fixed header occupied on the wire.
    pub header_len: usize,
}

/// MQTT control packet types, used for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect,
    Connack,
    Publish,
    Puback,
    Pubrec,
    Pubrel,
    Pubcomp,
    Subscribe,
    Suback,
    Unsubscribe,
    Unsuback,
    Pingreq,
    Pingresp,
    Disconnect,
    Auth,
}

impl PacketType {
    /// Map a 4-bit packet type tag to its name. Tag 0 is reserved.
    pub fn from_tag(tag: u8) -> Option<Self> {
        let kind = match tag {
            1 => PacketType::Connect,
            2 => PacketType::Connack,
            3 => PacketType::Publish,
            4 => PacketType::Puback,
            5 => PacketType::Pubrec,
            6 => PacketType::Pubrel,
            7 => PacketType::Pubcomp,
            8 => PacketType::Subscribe,
            9 => PacketType::Suback,
            10 => PacketType::Unsubscribe,
            11 => PacketType::Unsuback,
            12 => PacketType::Pingreq,
            13 => PacketType::Pingresp,
            14 => PacketType::Disconnect,
            15 => PacketType::Auth,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PacketType::Connect => "CONNECT",
            PacketType::Connack => "CONNACK",
            PacketType::Publish => "PUBLISH",
            PacketType::Puback => "PUBACK",
            PacketType::Pubrec => "PUBREC",
            PacketType::Pubrel => "PUBREL",
            PacketType::Pubcomp => "PUBCOMP",
            PacketType::Subscribe => "SUBSCRIBE",
            PacketType::Suback => "SUBACK",
            PacketType::Unsubscribe => "UNSUBSCRIBE",
            PacketType::Unsuback => "UNSUBACK",
            PacketType::Pingreq => "PINGREQ",
            PacketType::Pingresp => "PINGRESP",
            PacketType::Disconnect => "DISCONNECT",
            PacketType::Auth => "AUTH",
        }
    }
}

/// Label for a packet type tag in log lines.
pub fn packet_type_name(tag: u8) -> &'static str {
    PacketType::from_tag(tag)
        .map(|kind| kind.as_str())
        .unwrap_or("RESERVED")
}

/// How the remaining-length field is encoded on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LengthEncoding {
    /// Byte 1 is the whole remaining length (0-255).
    #[default]
    SingleByte,
    /// 1-4 bytes of 7 data bits each, continuation bit 0x80.
    Variable,
}

/// Remaining-length decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedLength;

/// Decode a two-byte fixed header.
///
/// Total over all inputs: the packet type is not validated.
pub fn decode_fixed_header(bytes: [u8; HEADER_LEN]) -> FixedHeader {
    FixedHeader {
        packet_type: bytes[0] >> 4,
        flags: bytes[0] & 0x0F,
        remaining_length: bytes[1] as usize,
        header_len: HEADER_LEN,
    }
}

/// Decode a variable-length remaining length from the start of `input`.
///
/// Returns `Ok(Some((value, bytes_used)))` when complete, `Ok(None)` when
/// `input` ends on a continuation byte, and `Err` when a fourth byte still
/// has the continuation bit set.
pub fn decode_remaining_length(input: &[u8]) -> Result<Option<(usize, usize)>, MalformedLength> {
    let mut value = 0usize;

    for (i, &byte) in input.iter().enumerate() {
        if i == MAX_LENGTH_BYTES {
            return Err(MalformedLength);
        }
        value |= ((byte & 0x7F) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }

    if input.len() >= MAX_LENGTH_BYTES {
        return Err(MalformedLength);
    }
    Ok(None)
}

/// Complete a fixed header whose remaining length uses the variable encoding.
///
/// `header` comes from [`decode_fixed_header`]; `length` holds the length
/// bytes read so far, starting with the header's byte 1. `Ok(None)` means
/// another length byte is needed.
pub fn with_variable_length(
    header: FixedHeader,
    length: &[u8],
) -> Result<Option<FixedHeader>, MalformedLength> {
    Ok(decode_remaining_length(length)?.map(|(remaining_length, used)| FixedHeader {
        remaining_length,
        header_len: 1 + used,
        ..header
    }))
}

/// The fixed success acknowledgment.
pub fn encode_connack() -> [u8; 4] {
    CONNACK
}
