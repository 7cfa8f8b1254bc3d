//! Sequential acceptor.
//!
//! Accepts one connection, handles it to completion, then accepts the next.
//! A stalled peer blocks every client queued behind it.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use tracing::error;

use crate::protocols::mqtt::{ConnectionError, HandlerSettings, Handshake};
use crate::runtime::listener::bind_listener;
use crate::runtime::process_connection;

/// Owns the listening endpoint for the life of the process.
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Acceptor {
    /// Bind the listening endpoint. Failure here is fatal to the caller.
    pub fn bind(addr: SocketAddr, backlog: i32) -> io::Result<Self> {
        let listener = bind_listener(addr, backlog)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until the next connection arrives.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept()
    }

    /// Accept and fully handle exactly one connection.
    ///
    /// The outer error is an accept failure; the inner result is the
    /// connection outcome, already logged.
    pub fn serve_one(
        &self,
        settings: &HandlerSettings,
    ) -> io::Result<Result<Handshake, ConnectionError>> {
        let (stream, peer) = self.accept()?;
        Ok(process_connection(stream, peer, settings))
    }

    /// Serve connections one at a time until the process is terminated.
    pub fn serve(&self, settings: &HandlerSettings) -> io::Result<()> {
        loop {
            if let Err(e) = self.serve_one(settings) {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
