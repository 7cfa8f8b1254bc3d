//! MQTT handshake handler for the Tokio runtime.
//!
//! Same per-connection semantics as the blocking handler.

use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace};

use super::handler::{
    ConnectionError, ConnectionState, HandlerSettings, Handshake, Payload, READ_CHUNK,
};
use super::parser::{
    decode_fixed_header, encode_connack, packet_type_name, with_variable_length, FixedHeader,
    LengthEncoding, HEADER_LEN, MAX_LENGTH_BYTES,
};

/// Handle one connection: header, payload, CONNACK.
///
/// When `settings.read_timeout` is set it bounds every individual read, the
/// same as a socket read timeout on the blocking path.
pub async fn handle_connection<S>(
    mut stream: S,
    settings: &HandlerSettings,
) -> Result<Handshake, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    trace!(state = ?ConnectionState::AwaitHeader);
    let header = read_header(&mut stream, settings.length_encoding, settings.read_timeout).await?;

    info!(
        packet_type = header.packet_type,
        kind = packet_type_name(header.packet_type),
        flags = header.flags,
        remaining_length = header.remaining_length,
        "Decoded fixed header"
    );

    trace!(state = ?ConnectionState::AwaitPayload);
    let payload = drain_payload(&mut stream, header.remaining_length, settings.read_timeout)
        .await
        .map_err(ConnectionError::Payload)?;

    if let Payload::Partial { missing, .. } = &payload {
        debug!(
            received = payload.len(),
            missing, "Peer closed before full payload arrived"
        );
    }

    trace!(state = ?ConnectionState::SendAck);
    stream
        .write_all(&encode_connack())
        .await
        .map_err(ConnectionError::Acknowledge)?;
    stream.flush().await.map_err(ConnectionError::Acknowledge)?;

    let handshake = Handshake { header, payload };
    info!(total_len = handshake.received_len(), "Sent CONNACK");

    trace!(state = ?ConnectionState::Closed);
    Ok(handshake)
}

/// Read and decode the fixed header.
pub async fn read_header<R: AsyncRead + Unpin>(
    reader: &mut R,
    encoding: LengthEncoding,
    read_timeout: Option<Duration>,
) -> Result<FixedHeader, ConnectionError> {
    let mut buf = [0u8; HEADER_LEN];
    let n = read_full(reader, &mut buf, read_timeout)
        .await
        .map_err(ConnectionError::Header)?;
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
                let n = read_full(reader, &mut length[len..len + 1], read_timeout)
                    .await
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
pub async fn drain_payload<R: AsyncRead + Unpin>(
    reader: &mut R,
    expected: usize,
    read_timeout: Option<Duration>,
) -> io::Result<Payload> {
    let mut payload = BytesMut::with_capacity(expected.min(READ_CHUNK));

    while payload.len() < expected {
        let start = payload.len();
        let chunk = (expected - start).min(READ_CHUNK);
        payload.resize(start + chunk, 0);

        let n = read_some(reader, &mut payload[start..], read_timeout).await?;
        payload.truncate(start + n);
        if n == 0 {
            break;
        }
    }

    Ok(Payload::finish(payload.freeze(), expected))
}

async fn read_full<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    read_timeout: Option<Duration>,
) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = read_some(reader, &mut buf[filled..], read_timeout).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// A single read, failing with `TimedOut` if no data arrives within `read_timeout`.
async fn read_some<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    read_timeout: Option<Duration>,
) -> io::Result<usize> {
    match read_timeout {
        Some(limit) => tokio::time::timeout(limit, reader.read(buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))?,
        None => reader.read(buf).await,
    }
}
