mod advisory;
mod cli;
mod config;
mod ingest;
mod server;
mod sources;
mod status;


use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use statecast_core::{SnapshotPresenter, SnapshotStore};

use crate::config::Config;
use crate::ingest::IngestWorker;
use crate::status::StatusReporter;

/// Initialize tracing: RUST_LOG wins, then `debug_level` when debugging
///
/// With `debug` set, a plain-text copy of the log is appended to `debug_file`.
fn init_tracing(config: &Config) {
    let default_level = if config.debug {
        config.debug_level.as_str()
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let mut file_error = None;
    let file_layer = if config.debug {
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.debug_file)
        {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
            Err(e) => {
                file_error = Some(e);
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        warn!(path = ?config.debug_file, error = %e, "failed to open debug log file");
    }
}

#[tokio::main]
async fn main() {
    // Parse CLI arguments and resolve configuration
    let cli = cli::Cli::parse();
    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("statecast: error: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config);

    info!(
        version = %config.version,
        host = %config.host,
        port = config.port,
        data_source = ?config.data_source,
        stream_timeout = config.stream_timeout,
        "statecast starting"
    );

    let status = Arc::new(StatusReporter::new(config.status_file()));
    status.emit(&format!("statecast {} starting.", config.version));

    let store = SnapshotStore::new(config.stream_timeout());
    let presenter = SnapshotPresenter::new(store.clone());

    advisory::spawn_version_check(
        config.release_url.clone(),
        config.version.clone(),
        store.clone(),
        status.clone(),
    );

    // Start the ingestion worker in a background task
    let cancel = CancellationToken::new();
    let worker = IngestWorker::new(
        sources::from_config(&config),
        store,
        status.clone(),
        config.retry_policy(),
    );
    let worker_cancel = cancel.clone();
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run(worker_cancel).await {
            // keep serving the last known snapshot
            error!("ingestion stopped: {}", e);
        }
    });

    // Ctrl-C triggers a graceful shutdown
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_cancel.cancel();
        }
    });

    // Start server (blocks until shutdown)
    let served = server::run_server(&config.host, config.port, presenter, cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = worker_handle.await {
        error!("ingestion task panicked: {}", e);
    }

    if let Err(e) = served {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
    info!("statecast shut down");
}
