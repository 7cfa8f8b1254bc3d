//! Protocol implementations.
//!
//! Each protocol has a parser module plus blocking and Tokio handlers used by
//! the runtimes.
//!
//! ## Protocols
//! - `mqtt`: MQTT handshake (CONNECT in, CONNACK out)

pub mod mqtt;
