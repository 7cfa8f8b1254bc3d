//! Blocking runtimes for accepting and handling connections.
//!
//! - `sequential`: one connection at a time on the calling thread
//! - `pool`: an acceptor thread passing connections to worker threads
//!
//! The Tokio runtime lives in `crate::server`.
//!
//! All runtimes share listener construction (`listener`) and per-connection
//! logging (`log_outcome`).

pub mod listener;
pub mod pool;
pub mod sequential;

use std::io;
use std::net::{SocketAddr, TcpStream};
use tracing::{info, warn};

use crate::config::Config;
use crate::protocols::mqtt::{handle_connection, ConnectionError, HandlerSettings, Handshake};
use pool::WorkerPool;
use sequential::Acceptor;

/// Run the sequential acceptor until the process is terminated.
pub fn run_sequential(config: &Config) -> io::Result<()> {
    let acceptor = Acceptor::bind(config.listen, config.backlog)?;
    info!(address = %acceptor.local_addr(), "Listening");

    acceptor.serve(&config.handler_settings())
}

/// Run the acceptor thread with a pool of worker threads.
pub fn run_threads(config: &Config) -> io::Result<()> {
    let acceptor = Acceptor::bind(config.listen, config.backlog)?;
    let pool = WorkerPool::new(config.worker_count(), config.handler_settings())?;
    info!(
        address = %acceptor.local_addr(),
        workers = pool.size(),
        "Listening"
    );

    pool::serve(&acceptor, &pool)
}

/// Handle one accepted blocking connection and log its outcome.
///
/// The stream is closed before this returns.
pub(crate) fn process_connection(
    stream: TcpStream,
    peer: SocketAddr,
    settings: &HandlerSettings,
) -> Result<Handshake, ConnectionError> {
    info!(peer = %peer, "Connected");

    if let Err(e) = stream.set_read_timeout(settings.read_timeout) {
        warn!(peer = %peer, error = %e, "Failed to set read timeout");
    }

    let outcome = handle_connection(stream, settings);
    log_outcome(peer, &outcome);
    outcome
}

/// Log how a connection ended.
pub(crate) fn log_outcome(peer: SocketAddr, outcome: &Result<Handshake, ConnectionError>) {
    match outcome {
        Ok(handshake) => info!(
            peer = %peer,
            complete = handshake.payload.is_complete(),
            "Closing connection"
        ),
        Err(e @ ConnectionError::ShortHeader { .. }) => {
            info!(peer = %peer, error = %e, "Incomplete header, closing connection")
        }
        Err(e) => warn!(peer = %peer, error = %e, "Connection abandoned"),
    }
}
