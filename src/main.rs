//! pingback: a thread-per-connection TCP server
//!
//! Protocol modes:
//! - echo: every chunk received is sent back unchanged
//! - http: one GET request line answered with one HTML page, then close
//!
//! Features:
//! - One worker thread per accepted connection
//! - Graceful shutdown on SIGINT/SIGTERM: stop accepting, close live
//!   connections, join every worker
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocols;
mod runtime;
mod server;
mod shutdown;

use config::Config;
use server::Server;
use shutdown::{install_signal_handler, ShutdownToken};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// How often the main thread checks for a shutdown request.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

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
        host = %config.host,
        port = config.port,
        protocol = ?config.protocol,
        "Starting pingback server"
    );

    let shutdown = ShutdownToken::new();
    install_signal_handler(shutdown.clone())?;

    let server = Arc::new(Server::new(config, shutdown.clone()));
    if let Err(e) = server.start() {
        error!(error = %e, "Failed to start server");
        return Err(e.into());
    }

    let acceptor = {
        let server = Arc::clone(&server);
        thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || server.run())?
    };

    while !shutdown.is_triggered() {
        thread::sleep(SHUTDOWN_POLL_INTERVAL);
    }

    info!(
        active_connections = server.active_connections(),
        "Shutting down"
    );
    server.stop();

    match acceptor.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Accept loop failed"),
        Err(_) => error!("Accept loop panicked"),
    }

    info!("Server shutdown complete");
    Ok(())
}
