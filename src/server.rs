//! Tokio server for handling MQTT handshakes.
//!
//! Accepts connections and spawns one task per connection, bounded by a
//! semaphore of `max_connections` permits.

use crate::config::Config;
use crate::protocols::mqtt::async_handler::handle_connection;
use crate::protocols::mqtt::HandlerSettings;
use crate::runtime::listener::bind_listener;
use crate::runtime::log_outcome;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info};

/// Server instance
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    settings: HandlerSettings,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the listening endpoint. Must be called inside a Tokio runtime.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let listener = bind_listener(config.listen, config.backlog)?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        let local_addr = listener.local_addr()?;

        Ok(Server {
            listener,
            local_addr,
            settings: config.handler_settings(),
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until the task is dropped.
    pub async fn run(&self) -> io::Result<()> {
        info!(address = %self.local_addr, "Listening");

        loop {
            // Wait for a connection slot
            let permit = self
                .connection_limit
                .clone()
                .acquire_owned()
                .await
                .map_err(io::Error::other)?;

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "Connected");
                    let settings = self.settings;

                    tokio::spawn(async move {
                        let outcome = handle_connection(stream, &settings).await;
                        log_outcome(peer, &outcome);
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Run the Tokio server on a multi-threaded runtime.
pub fn run(config: Config) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_count())
        .thread_name("worker")
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = Server::bind(&config)?;
        server.run().await
    })
}
