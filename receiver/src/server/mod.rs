//! HTTP surface: remote-write ingestion plus operational endpoints.

mod error;
mod handlers;
mod http;
mod metrics;
mod middleware;

pub use error::ApiError;
pub use handlers::AppState;
pub use http::{ReceiverServer, router};
pub use metrics::Metrics;
