//! Listening socket construction shared by all runtimes.

use std::io;
use std::net::{SocketAddr, TcpListener};

/// Bind a TCP listener with `SO_REUSEADDR` and the given backlog.
///
/// `SO_REUSEPORT` is left off so a second process cannot share the port.
/// The returned listener is blocking; the tokio runtime switches it to
/// non-blocking before registering it.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
