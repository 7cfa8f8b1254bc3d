//! connack-endpoint: a minimal MQTT handshake endpoint
//!
//! Accepts a connection, decodes the fixed header of the first packet,
//! drains its payload, replies with CONNACK and closes the connection.
//!
//! Features:
//! - Single-byte or variable-length remaining length decoding
//! - Sequential, worker-pool, or Tokio connection runtimes
//! - Configuration via CLI arguments or TOML file
//!
//! Not a broker: no authentication, subscriptions, routing or sessions.

mod config;
mod protocols;
mod runtime;
mod server;

use config::{Config, RuntimeType};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        runtime = ?config.runtime,
        workers = config.worker_count(),
        length_encoding = ?config.length_encoding,
        read_timeout = ?config.read_timeout,
        "Starting connack-endpoint"
    );

    match config.runtime {
        RuntimeType::Sequential => run_sequential(config),
        RuntimeType::Threads => run_threads(config),
        RuntimeType::Tokio => run_tokio(config),
    }
}

/// Run one connection at a time on the main thread
fn run_sequential(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Using sequential runtime");
    runtime::run_sequential(&config)?;
    Ok(())
}

/// Run with an acceptor thread and a worker pool
fn run_threads(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Using worker thread runtime");
    runtime::run_threads(&config)?;
    Ok(())
}

/// Run with a task per connection on Tokio
fn run_tokio(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Using tokio runtime");
    server::run(config)?;
    Ok(())
}
