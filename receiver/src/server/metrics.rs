//! Prometheus metrics for the receiver.

use axum::http::Method;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

use crate::admission::MemoryGate;

/// Labels for HTTP request metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabelsWithStatus {
    pub method: HttpMethod,
    pub endpoint: String,
    pub status: u16,
}

/// HTTP method label value.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Other,
}

impl From<&Method> for HttpMethod {
    fn from(method: &Method) -> Self {
        match *method {
            Method::GET => HttpMethod::Get,
            Method::POST => HttpMethod::Post,
            Method::PUT => HttpMethod::Put,
            Method::DELETE => HttpMethod::Delete,
            _ => HttpMethod::Other,
        }
    }
}

/// Labels for HTTP request latency histogram (without status, since status is unknown at start).
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: HttpMethod,
    pub endpoint: String,
}

/// Labels for failed remote-write requests.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub reason: &'static str,
}

/// Container for all Prometheus metrics.
///
/// Counters are registered without the `_total` suffix, which the encoder
/// appends.
pub struct Metrics {
    registry: Registry,

    /// Samples accepted by `append` in committed transactions. See
    /// [`AppendResult::appended`](crate::append::AppendResult::appended).
    pub remote_write_samples_ingested_total: Counter,

    /// Samples rejected by the storage engine.
    pub remote_write_samples_failed_total: Counter,

    /// Failed remote-write requests by reason.
    pub remote_write_request_errors_total: Family<ErrorLabels, Counter>,

    /// Remote-write requests refused by the memory gate.
    pub remote_write_requests_rejected_total: Counter,

    /// Resident memory at the last sample.
    pub process_resident_memory_bytes: Gauge,

    /// 1 while the memory gate accepts writes.
    pub remote_write_accepting: Gauge,

    /// Counter of HTTP requests.
    pub http_requests_total: Family<HttpLabelsWithStatus, Counter>,

    /// Histogram of HTTP request latency in seconds.
    pub http_request_duration_seconds: Family<HttpLabels, Histogram>,

    /// Gauge of currently in-flight requests.
    pub http_requests_in_flight: Gauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics registry with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let remote_write_samples_ingested_total = Counter::default();
        registry.register(
            "remote_write_samples_ingested",
            "Total number of samples accepted by storage in committed batches",
            remote_write_samples_ingested_total.clone(),
        );

        let remote_write_samples_failed_total = Counter::default();
        registry.register(
            "remote_write_samples_failed",
            "Total number of samples rejected by storage",
            remote_write_samples_failed_total.clone(),
        );

        let remote_write_request_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "remote_write_request_errors",
            "Total number of failed remote-write requests by reason",
            remote_write_request_errors_total.clone(),
        );

        let remote_write_requests_rejected_total = Counter::default();
        registry.register(
            "remote_write_requests_rejected",
            "Total number of remote-write requests refused for lack of memory",
            remote_write_requests_rejected_total.clone(),
        );

        let process_resident_memory_bytes = Gauge::default();
        registry.register(
            "process_resident_memory_bytes",
            "Resident memory size in bytes at the last sample",
            process_resident_memory_bytes.clone(),
        );

        let remote_write_accepting = Gauge::default();
        registry.register(
            "remote_write_accepting",
            "Whether the receiver currently accepts writes (1) or refuses them (0)",
            remote_write_accepting.clone(),
        );

        // HTTP requests total counter
        let http_requests_total = Family::<HttpLabelsWithStatus, Counter>::default();
        registry.register(
            "http_requests",
            "Total number of HTTP requests",
            http_requests_total.clone(),
        );

        // HTTP request duration histogram (buckets from 1ms to ~8s)
        let http_request_duration_seconds =
            Family::<HttpLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 14))
            });
        registry.register(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
            http_request_duration_seconds.clone(),
        );

        // In-flight requests gauge
        let http_requests_in_flight = Gauge::default();
        registry.register(
            "http_requests_in_flight",
            "Number of HTTP requests currently being processed",
            http_requests_in_flight.clone(),
        );

        Self {
            registry,
            remote_write_samples_ingested_total,
            remote_write_samples_failed_total,
            remote_write_request_errors_total,
            remote_write_requests_rejected_total,
            process_resident_memory_bytes,
            remote_write_accepting,
            http_requests_total,
            http_request_duration_seconds,
            http_requests_in_flight,
        }
    }

    /// Counts a failed remote-write request.
    pub fn record_request_error(&self, reason: &'static str) {
        self.remote_write_request_errors_total
            .get_or_create(&ErrorLabels { reason })
            .inc();
    }

    /// Copies the gate's last reading into the memory gauges.
    pub fn observe_gate(&self, gate: &MemoryGate) {
        let resident = i64::try_from(gate.resident_bytes()).unwrap_or(i64::MAX);
        self.process_resident_memory_bytes.set(resident);
        self.remote_write_accepting
            .set(if gate.is_accepting() { 1 } else { 0 });
    }

    /// Encode all metrics to Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "failed to encode metrics");
        }
        buffer
    }
}
