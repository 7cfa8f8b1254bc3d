//! MQTT handshake protocol.
//!
//! Accepts the first packet of an MQTT session and acknowledges it:
//! - Client sends: fixed header + `remaining_length` bytes (normally CONNECT)
//! - Server responds: CONNACK `20 02 00 00` and closes the connection
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  [type << 4 | flags] [remaining length] [payload ...]
//! Response: 0x20 0x02 0x00 0x00
//!
//! Example:
//! Request:  10 02 00 04
//! Response: 20 02 00 00
//! ```
//!
//! The remaining length is a single byte by default. With
//! [`LengthEncoding::Variable`] the standard 1-4 byte encoding is decoded.
//!
//! The packet type is decoded for diagnostics only; every packet with a
//! complete header is acknowledged. Short payloads are tolerated and
//! reported as [`handler::Payload::Partial`].

pub mod async_handler;
pub mod handler;
pub mod parser;

pub use handler::{handle_connection, ConnectionError, HandlerSettings, Handshake};
pub use parser::LengthEncoding;
