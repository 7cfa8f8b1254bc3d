//! Blocking MQTT handshake handler.
//!
//! Processes exactly one packet per connection:
//! read fixed header, drain the declared payload, send CONNACK, close.

use bytes::{Bytes, BytesMut};
use std::io::{self, Read, Write};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace};

use super::parser::{
    decode_fixed_header, encode_connack, packet_type_name, with_variable_length, FixedHeader,
    LengthEncoding, HEADER_LEN, MAX_LENGTH_BYTES,
};

/// Largest single read issued while draining a payload.
pub(crate) const READ_CHUNK: usize = 8 * 1024;

/// Per-connection handler settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerSettings {
    pub length_encoding: LengthEncoding,
    /// Limit on each individual read. The blocking runtimes set it on the
    /// socket; the async handler applies it per read. `None` blocks forever.
    pub read_timeout: Option<Duration>,
}

/// Connection progress, logged at trace level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitHeader,
    AwaitPayload,
    SendAck,
    Closed,
}

/// Result of draining a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Every declared byte arrived.
    Complete(Bytes),
    /// The peer half-closed early.
    Partial { received: Bytes, missing: usize },
}

impl Payload {
    pub(crate) fn finish(received: Bytes, expected: usize) -> Self {
        if received.len() == expected {
            Payload::Complete(received)
        } else {
            let missing = expected - received.len();
            Payload::Partial { received, missing }
        }
    }

    /// Bytes actually received.
    pub fn bytes(&self) -> &Bytes {
        match self {
            Payload::Complete(bytes) => bytes,
            Payload::Partial { received, .. } => received,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Payload::Complete(_))
    }
}

/// An acknowledged handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub header: FixedHeader,
    pub payload: Payload,
}

impl Handshake {
    /// Bytes read from the peer: header plus whatever payload arrived.
    pub fn received_len(&self) -> usize {
        self.header.header_len + self.payload.len()
    }
}

/// Reasons a connection was abandoned without acknowledgment
/// (or, for `Acknowledge`, with a failed acknowledgment).
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("incomplete header: peer closed after {received} bytes")]
    ShortHeader { received: usize },

    #[error("failed to read header: {0}")]
    Header(#[source] io::Error),

    #[error("malformed remaining length")]
    MalformedRemainingLength,

    #[error("failed to read payload: {0}")]
    Payload(#[source] io::Error),

    #[error("failed to send CONNACK: {0}")]
    Acknowledge(#[source] io::Error),
}

/// Handle one connection: header, payload, CONNACK.
///
/// The stream is consumed and dropped before returning, so the connection is
/// closed on every path. Pass `&mut stream` to keep access to it.
pub fn handle_connection<S: Read + Write>(
    mut stream: S,
    settings: &HandlerSettings,
) -> Result<Handshake, ConnectionError> {
    trace!(state = ?ConnectionState::AwaitHeader);
    let header = read_header(&mut stream, settings.length_encoding)?;

    info!(
        packet_type = header.packet_type,
        kind = packet_type_name(header.packet_type),
        flags = header.flags,
        remaining_length = header.remaining_length,
        "Decoded fixed header"
    );

    trace!(state = ?ConnectionState::AwaitPayload);
    let payload =
        drain_payload(&mut stream, header.remaining_length).map_err(ConnectionError::Payload)?;

    if let Payload::Partial { missing, .. } = &payload {
        debug!(
            received = payload.len(),
            missing, "Peer closed before full payload arrived"
        );
    }

    trace!(state = ?ConnectionState::SendAck);
    stream
        .write_all(&encode_connack())
        .and_then(|_| stream.flush())
        .map_err(ConnectionError::Acknowledge)?;

    let handshake = Handshake { header, payload };
    info!(total_len = handshake.received_len(), "Sent CONNACK");

    trace!(state = ?ConnectionState::Closed);
    Ok(handshake)
}

/// Read and decode the fixed header.
pub fn read_header<R: Read>(
    reader: &mut R,
    encoding: LengthEncoding,
) -> Result<FixedHeader, ConnectionError> {
    let mut buf = [0u8; HEADER_LEN];
    let n = read_full(reader, &mut buf).map_err(ConnectionError::Header)?;
    if n < HEADER_LEN {
        return Err(ConnectionError::ShortHeader { received: n });
    }

    let header = decode_fixed_header(buf);
    if encoding == LengthEncoding::SingleByte {
        return Ok(header);
    }

    let mut length = [0u8; MAX_LENGTH_BYTES];
    length[0] = buf[1];
    let mut len = 1;

    loop {
        match with_variable_length(header, &length[..len]) {
            Ok(Some(header)) => return Ok(header),
            Ok(None) => {
                let n = read_full(reader, &mut length[len..len + 1])
                    .map_err(ConnectionError::Header)?;
                if n == 0 {
                    return Err(ConnectionError::ShortHeader { received: 1 + len });
                }
                len += 1;
            }
            Err(_) => return Err(ConnectionError::MalformedRemainingLength),
        }
    }
}

/// Read exactly `expected` bytes, or fewer if the peer half-closes.
///
/// Reads are bounded by the outstanding byte count, so nothing past the
/// payload is consumed. A zero-length drain never touches the reader.
pub fn drain_payload<R: Read>(reader: &mut R, expected: usize) -> io::Result<Payload> {
    let mut payload = BytesMut::with_capacity(expected.min(READ_CHUNK));

    while payload.len() < expected {
        let start = payload.len();
        let chunk = (expected - start).min(READ_CHUNK);
        payload.resize(start + chunk, 0);

        match reader.read(&mut payload[start..]) {
            Ok(0) => {
                payload.truncate(start);
                break;
            }
            Ok(n) => payload.truncate(start + n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => payload.truncate(start),
            Err(e) => return Err(e),
        }
    }

    Ok(Payload::finish(payload.freeze(), expected))
}

/// Fill `buf` across as many reads as needed. Returns the bytes filled,
/// which is short only on EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::mqtt::parser::CONNACK;
    use std::collections::VecDeque;

    /// Stream that replays scripted read chunks, then reports EOF.
    #[derive(Default)]
    struct ScriptedStream {
        reads: VecDeque<io::Result<Vec<u8>>>,
        read_calls: usize,
        written: Vec<u8>,
        fail_writes: bool,
    }

    impl ScriptedStream {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                reads: chunks.iter().map(|c| Ok(c.to_vec())).collect(),
                ..Default::default()
            }
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.read_calls += 1;
            match self.reads.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(mut chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.reads.push_front(Ok(chunk.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_drain_zero_length_skips_read() {
        let mut stream = ScriptedStream::new(&[b"should not be read"]);
        let payload = drain_payload(&mut stream, 0).unwrap();
        assert_eq!(payload, Payload::Complete(Bytes::new()));
        assert_eq!(stream.read_calls, 0);
    }

    #[test]
    fn test_drain_reassembles_fragments() {
        let mut stream = ScriptedStream::new(&[b"a", b"bcd", b"ef"]);
        let payload = drain_payload(&mut stream, 6).unwrap();
        assert_eq!(payload, Payload::Complete(Bytes::from_static(b"abcdef")));
    }

    #[test]
    fn test_drain_never_reads_past_payload() {
        let mut stream = ScriptedStream::new(&[b"abcNEXT"]);
        let payload = drain_payload(&mut stream, 3).unwrap();
        assert_eq!(payload.bytes().as_ref(), b"abc");

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"NEXT");
    }

    #[test]
    fn test_drain_partial_on_eof() {
        let mut stream = ScriptedStream::new(&[b"ab"]);
        let payload = drain_payload(&mut stream, 5).unwrap();
        assert_eq!(
            payload,
            Payload::Partial {
                received: Bytes::from_static(b"ab"),
                missing: 3
            }
        );
        assert!(!payload.is_complete());
    }

    #[test]
    fn test_drain_retries_interrupted() {
        let mut stream = ScriptedStream::new(&[b"x"]);
        stream
            .reads
            .push_front(Err(io::Error::new(io::ErrorKind::Interrupted, "signal")));
        let payload = drain_payload(&mut stream, 1).unwrap();
        assert_eq!(payload.bytes().as_ref(), b"x");
    }

    #[test]
    fn test_drain_propagates_hard_errors() {
        let mut stream = ScriptedStream::new(&[b"x"]);
        stream
            .reads
            .push_back(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")));
        let err = drain_payload(&mut stream, 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_drain_large_payload_in_chunks() {
        let data = vec![0x5Au8; READ_CHUNK * 2 + 17];
        let mut stream = ScriptedStream::new(&[&data[..]]);
        let payload = drain_payload(&mut stream, data.len()).unwrap();
        assert!(payload.is_complete());
        assert_eq!(payload.len(), data.len());
        assert_eq!(stream.read_calls, 3);
    }

    #[test]
    fn test_handle_connect_packet() {
        let mut stream = ScriptedStream::new(&[&[0x10, 0x02, 0x00, 0x04]]);
        let handshake = handle_connection(&mut stream, &HandlerSettings::default()).unwrap();

        assert_eq!(handshake.header.packet_type, 1);
        assert_eq!(handshake.header.remaining_length, 2);
        assert_eq!(handshake.payload, Payload::Complete(Bytes::from_static(&[0x00, 0x04])));
        assert_eq!(handshake.received_len(), 4);
        assert_eq!(stream.written, CONNACK);
    }

    #[test]
    fn test_handle_fragmented_header() {
        let mut stream = ScriptedStream::new(&[&[0x10], &[0x01], &[0xAB]]);
        let handshake = handle_connection(&mut stream, &HandlerSettings::default()).unwrap();
        assert_eq!(handshake.payload.bytes().as_ref(), &[0xAB]);
        assert_eq!(stream.written, CONNACK);
    }

    #[test]
    fn test_handle_acknowledges_any_packet_type() {
        let mut stream = ScriptedStream::new(&[&[0xC0, 0x00]]);
        let handshake = handle_connection(&mut stream, &HandlerSettings::default()).unwrap();
        assert_eq!(handshake.header.packet_type, 12);
        assert!(handshake.payload.bytes().is_empty());
        assert_eq!(stream.written, CONNACK);
    }

    #[test]
    fn test_handle_partial_payload_still_acknowledged() {
        let mut stream = ScriptedStream::new(&[&[0x10, 0x0A, 1, 2, 3]]);
        let handshake = handle_connection(&mut stream, &HandlerSettings::default()).unwrap();
        assert_eq!(
            handshake.payload,
            Payload::Partial {
                received: Bytes::from_static(&[1, 2, 3]),
                missing: 7
            }
        );
        assert_eq!(stream.written, CONNACK);
    }

    #[test]
    fn test_handle_short_header_not_acknowledged() {
        for chunks in [&[][..], &[&[0x10u8][..]][..]] {
            let mut stream = ScriptedStream::new(chunks);
            let err = handle_connection(&mut stream, &HandlerSettings::default()).unwrap_err();
            assert!(matches!(
                err,
                ConnectionError::ShortHeader { received } if received == chunks.len()
            ));
            assert!(stream.written.is_empty());
        }
    }

    #[test]
    fn test_handle_payload_error_not_acknowledged() {
        let mut stream = ScriptedStream::new(&[&[0x10, 0x04]]);
        stream
            .reads
            .push_back(Err(io::Error::new(io::ErrorKind::TimedOut, "stalled")));
        let err = handle_connection(&mut stream, &HandlerSettings::default()).unwrap_err();
        assert!(matches!(err, ConnectionError::Payload(_)));
        assert!(stream.written.is_empty());
    }

    #[test]
    fn test_handle_write_failure() {
        let mut stream = ScriptedStream::new(&[&[0x10, 0x00]]);
        stream.fail_writes = true;
        let err = handle_connection(&mut stream, &HandlerSettings::default()).unwrap_err();
        assert!(matches!(err, ConnectionError::Acknowledge(_)));
    }

    #[test]
    fn test_single_byte_mode_ignores_continuation_bit() {
        let mut stream = ScriptedStream::new(&[&[0x10, 0xC1], &[0x02]]);
        let header = read_header(&mut stream, LengthEncoding::SingleByte).unwrap();
        assert_eq!(header.remaining_length, 0xC1);
        assert_eq!(header.header_len, 2);
    }

    #[test]
    fn test_variable_length_header() {
        let mut stream = ScriptedStream::new(&[&[0x10, 0xC1], &[0x02]]);
        let header = read_header(&mut stream, LengthEncoding::Variable).unwrap();
        assert_eq!(header.packet_type, 1);
        assert_eq!(header.remaining_length, 321);
        assert_eq!(header.header_len, 3);
    }

    #[test]
    fn test_variable_length_handshake() {
        let body = vec![9u8; 200];
        let mut stream = ScriptedStream::new(&[&[0x10, 0xC8, 0x01], &body[..50], &body[50..]]);
        let settings = HandlerSettings {
            length_encoding: LengthEncoding::Variable,
            read_timeout: None,
        };
        let handshake = handle_connection(&mut stream, &settings).unwrap();
        assert_eq!(handshake.header.remaining_length, 200);
        assert_eq!(handshake.payload.bytes().as_ref(), &body[..]);
        assert_eq!(handshake.received_len(), 203);
        assert_eq!(stream.written, CONNACK);
    }

    #[test]
    fn test_variable_length_malformed() {
        let mut stream = ScriptedStream::new(&[&[0x10, 0xFF, 0xFF, 0xFF, 0xFF]]);
        let err = read_header(&mut stream, LengthEncoding::Variable).unwrap_err();
        assert!(matches!(err, ConnectionError::MalformedRemainingLength));
    }

    #[test]
    fn test_variable_length_truncated() {
        let mut stream = ScriptedStream::new(&[&[0x10, 0x80, 0x80]]);
        let err = read_header(&mut stream, LengthEncoding::Variable).unwrap_err();
        assert!(matches!(err, ConnectionError::ShortHeader { received: 3 }));
    }
}
