//! `tasksync-server`: batch reconciliation endpoint for `tasksync` clients.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8787
//! cargo run --bin tasksync-server
//!
//! # Run on custom address
//! cargo run --bin tasksync-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! TASKSYNC_SERVER_ADDR=127.0.0.1:8080 cargo run --bin tasksync-server
//! ```

use std::sync::Arc;

use clap::Parser;
use tasksync_server::config::{ServerCliArgs, ServerConfig};
use tasksync_server::server::{self, SyncState};
use tasksync_server::store::ServerStore;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting tasksync server");

    let state = Arc::new(SyncState::with_config(
        config.max_batch_items,
        ServerStore::new(),
    ));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "sync server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "sync server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start sync server");
            std::process::exit(1);
        }
    }
}
