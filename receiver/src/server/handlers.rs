//! HTTP route handlers for the receiver.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use common::Appendable;
use futures::StreamExt;

use super::error::ApiError;
use super::metrics::Metrics;
use crate::admission::MemoryGate;
use crate::append::{PartialFailurePolicy, append_batch};
use crate::codec::FrameDecoder;
use crate::config::ReceiverConfig;
use crate::error::{Error, Result};
use crate::pool::{BufferPool, PooledBuffer};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Appendable>,
    pub decoder: Arc<FrameDecoder>,
    pub pool: Arc<BufferPool>,
    pub gate: MemoryGate,
    pub metrics: Arc<Metrics>,
    pub policy: PartialFailurePolicy,
    /// Largest request body accepted.
    pub max_request_bytes: usize,
    /// Sent as `Retry-After` while the gate refuses writes.
    pub retry_after: Duration,
}

impl AppState {
    /// Builds the state for `storage` from a validated configuration.
    pub fn new(
        storage: Arc<dyn Appendable>,
        gate: MemoryGate,
        metrics: Arc<Metrics>,
        config: &ReceiverConfig,
    ) -> Result<Self> {
        let pool = Arc::new(BufferPool::new(
            config.buffer_pool.buffer_size.as_usize(),
            config.buffer_pool.max_buffer_size.as_usize(),
            config.buffer_pool.capacity,
        ));
        let decoder = Arc::new(FrameDecoder::new(
            Arc::clone(&pool),
            config.ingest.max_decoded_bytes.as_usize(),
        ));
        Ok(Self {
            storage,
            decoder,
            pool,
            gate,
            metrics,
            policy: config.ingest.partial_failure,
            max_request_bytes: config.server.max_request_bytes.as_usize(),
            retry_after: config.memory.check_interval()?,
        })
    }
}

/// Handle POST /api/v1/receive
///
/// The gate is checked before the body is touched, so a refused request
/// costs no decode work. Answers `204` when every sample was stored and
/// `200` with an `err count:N` body when `N` samples were rejected.
pub async fn handle_receive(
    State(state): State<AppState>,
    request: Request,
) -> std::result::Result<Response, ApiError> {
    if !state.gate.is_accepting() {
        state.metrics.remote_write_requests_rejected_total.inc();
        return Err(ApiError::memory_full(state.retry_after));
    }

    receive(&state, request).await.map_err(|e| {
        let error = ApiError::from(e);
        if let Some(reason) = error.reason() {
            state.metrics.record_request_error(reason);
        }
        error
    })
}

async fn receive(state: &AppState, request: Request) -> Result<Response> {
    let body = read_body(request, &state.pool, state.max_request_bytes).await?;
    let batch = state.decoder.decode(&body).inspect_err(|e| {
        tracing::error!(error = %e, bytes = body.len(), "failed to decode remote-write frame");
    })?;
    drop(body);

    let series = batch.timeseries.len();
    tracing::debug!(series, samples = batch.sample_count(), "decoded remote-write frame");
    let result = append_batch(state.storage.as_ref(), batch, state.policy)
        .await
        .inspect_err(|e| match e {
            Error::SampleRejected(_) => tracing::warn!(error = %e, "batch rolled back"),
            _ => tracing::error!(error = %e, "failed to commit batch"),
        })?;

    state
        .metrics
        .remote_write_samples_ingested_total
        .inc_by(result.appended);
    state
        .metrics
        .remote_write_samples_failed_total
        .inc_by(result.failed);

    if result.failed == 0 {
        tracing::debug!(series, appended = result.appended, "batch committed");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    if let Some(first) = &result.first_error {
        tracing::warn!(
            series,
            appended = result.appended,
            failed = result.failed,
            first_error = %first,
            "batch committed with rejected samples"
        );
    }
    Ok((StatusCode::OK, format!("err count:{}\n", result.failed)).into_response())
}

/// Streams the body into a pooled buffer, refusing anything over `limit`.
async fn read_body(
    request: Request,
    pool: &Arc<BufferPool>,
    limit: usize,
) -> Result<PooledBuffer> {
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(Error::PayloadTooLarge { limit });
    }

    let mut buf = pool.acquire(declared.unwrap_or(0));
    let mut stream = request.into_body().into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::Transport(e.to_string()))?;
        if buf.len() + chunk.len() > limit {
            return Err(Error::PayloadTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// Handle GET /metrics
pub async fn handle_metrics(State(state): State<AppState>) -> String {
    state.metrics.observe_gate(&state.gate);
    state.metrics.encode()
}

/// Handle GET /-/healthy
pub async fn handle_healthy() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK\n")
}

/// Handle GET /-/ready
///
/// Not ready while the memory gate refuses writes.
pub async fn handle_ready(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.gate.is_accepting() {
        (StatusCode::OK, "OK\n")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "receiver memory full\n")
    }
}
