//! OpenData Receiver - memory-gated Prometheus remote-write ingestion.
//!
//! The receiver accepts snappy-compressed protobuf write batches on
//! `POST /api/v1/receive` and appends them to a storage engine through the
//! [`common::Appendable`] boundary, one transaction per request.
//!
//! # Architecture
//!
//! - **Admission**: a [`MemoryMonitor`] samples resident memory on a fixed
//!   interval and flips a shared [`MemoryGate`]. While the gate refuses
//!   writes, requests are answered `503` before their body is read.
//! - **Decode**: a [`FrameDecoder`] decompresses the body through a pooled
//!   scratch buffer and deserializes it into a [`WriteBatch`].
//! - **Append**: [`append_batch`] normalizes each series' labels and appends
//!   every sample. Rejected samples are counted and skipped; a failed commit
//!   fails the request.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use common::InMemoryStorage;
//! use receiver::{AppState, MemoryGate, Metrics, ReceiverConfig, router};
//!
//! let config = ReceiverConfig::default();
//! let state = AppState::new(
//!     Arc::new(InMemoryStorage::new()),
//!     MemoryGate::new(),
//!     Arc::new(Metrics::new()),
//!     &config,
//! )?;
//! let app = router(state);
//! ```

pub mod admission;
pub mod append;
pub mod codec;
pub mod config;
pub mod error;
pub mod labels;
pub mod pool;
pub mod proto;
pub mod server;

pub use admission::{
    MemoryGate, MemoryLimits, MemoryMonitor, MemorySampler, ProcessMemorySampler,
};
pub use append::{AppendResult, PartialFailurePolicy, append_batch};
pub use codec::{FrameDecoder, encode_frame};
pub use config::{ByteSize, CliArgs, ReceiverConfig, parse_byte_size};
pub use error::{Error, Result};
pub use proto::{Sample, TimeSeries, WriteBatch};
pub use server::{AppState, Metrics, ReceiverServer, router};
