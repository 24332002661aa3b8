//! uring-echo: a single-threaded io_uring TCP echo server
//!
//! Every byte a client sends is written back on the same connection.
//!
//! Features:
//! - One completion-driven event loop, no per-connection threads
//! - Fixed connection table and buffer pool, allocated at startup
//! - Short-write continuation and transparent retry of interrupted I/O
//! - Optional idle timeout for connections that stop making progress
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod runtime;
#[cfg(target_os = "linux")]
mod server;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load().map_err(error::Error::from)?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        max_connections = config.max_connections,
        message_len = config.message_len,
        "Starting uring-echo server"
    );

    serve(&config)?;
    Ok(())
}

/// Run with io_uring runtime (Linux only)
#[cfg(target_os = "linux")]
fn serve(config: &Config) -> error::Result<()> {
    let server = server::Server::bind(config)?;
    info!(addr = %server.local_addr()?, "Listening");
    server.run()
}

#[cfg(not(target_os = "linux"))]
fn serve(_config: &Config) -> error::Result<()> {
    Err(error::Error::Unsupported("io_uring runtime requires Linux"))
}
