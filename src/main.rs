//! aesdsocket: a TCP record log server
//!
//! Clients send newline-terminated packets on port 9000. Each packet is
//! appended to a log file and the whole log is sent back to the client.
//!
//! Features:
//! - One connection served at a time, in arrival order
//! - Optional daemon mode (`-d`), entered only after the port is bound
//! - Graceful shutdown on SIGINT/SIGTERM, removing the log file
//! - Logging to syslog; configuration via an optional TOML file

mod config;
mod logging;
mod runtime;
mod server;
mod storage;

use config::Config;
use runtime::{signal, Lifecycle};
use server::{Server, ServerError};
use tracing::{error, info};

/// Shutdown state shared with the signal handlers.
static LIFECYCLE: Lifecycle = Lifecycle::new();

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    logging::init(&config.log_level, config.log_target);

    info!(
        port = config.port,
        daemon = config.daemon,
        data_file = %config.data_file.display(),
        "Starting aesdsocket"
    );

    if let Err(e) = signal::install(&LIFECYCLE) {
        let e = ServerError::Signal(e);
        error!(error = %e, "Startup failed");
        return Err(e.into());
    }

    let daemon = config.daemon;
    let mut server = Server::bind(config, &LIFECYCLE).inspect_err(|e| {
        error!(error = %e, "Startup failed");
    })?;

    if daemon {
        server.daemonize().inspect_err(|e| {
            error!(error = %e, "Startup failed");
        })?;
    }

    let state = server.run();
    info!(?state, "Server stopped");
    Ok(())
}
