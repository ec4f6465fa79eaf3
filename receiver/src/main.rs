//! OpenData Receiver binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use common::InMemoryStorage;
use tracing_subscriber::EnvFilter;

use receiver::{
    AppState, CliArgs, MemoryGate, MemoryMonitor, Metrics, ProcessMemorySampler, ReceiverServer,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();

    let config = match args.load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("Starting receiver with config: {:?}", config);

    let storage = match config.storage.min_valid_timestamp_ms {
        Some(min) => InMemoryStorage::with_min_valid_timestamp(min),
        None => InMemoryStorage::new(),
    };

    let gate = MemoryGate::new();
    let state = match AppState::new(
        Arc::new(storage),
        gate.clone(),
        Arc::new(Metrics::new()),
        &config,
    ) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let monitor = MemoryMonitor::new(
        gate,
        config.memory.limits(),
        ProcessMemorySampler::new(),
        state.retry_after,
    )
    .spawn();

    let server = ReceiverServer::new(state, config.server.port);
    if let Err(e) = server.run(monitor).await {
        tracing::error!(error = %e, "server failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
