//! HTTP server for the receiver.

use std::io;
use std::net::SocketAddr;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tokio::signal;
use tokio::task::JoinHandle;

use super::handlers::{AppState, handle_healthy, handle_metrics, handle_ready, handle_receive};
use super::middleware::track_requests;

/// Builds the receiver's routes around `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/receive", post(handle_receive))
        .route("/metrics", get(handle_metrics))
        .route("/-/healthy", get(handle_healthy))
        .route("/-/ready", get(handle_ready))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_requests,
        ))
        .with_state(state)
}

/// HTTP server for remote-write ingestion.
pub struct ReceiverServer {
    state: AppState,
    port: u16,
}

impl ReceiverServer {
    pub fn new(state: AppState, port: u16) -> Self {
        Self { state, port }
    }

    /// Run the HTTP server until SIGINT or SIGTERM.
    ///
    /// `monitor` is the memory monitor task; it is aborted once the server
    /// has drained.
    pub async fn run(self, monitor: JoinHandle<()>) -> io::Result<()> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("Starting remote-write receiver on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        monitor.abort();
        served?;
        tracing::info!("Server shut down gracefully");
        Ok(())
    }
}

/// Listen for SIGTERM (K8s pod termination) and SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
