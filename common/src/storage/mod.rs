//! Transactional append boundary of a time-series storage engine.
//!
//! A writer asks an [`Appendable`] for an [`Appender`], stages samples on it,
//! and terminates it with [`Appender::commit`] or [`Appender::rollback`].
//! Both consume the appender, so a transaction cannot be finished twice.
//!
//! Failures come in two tiers. [`AppendError`] rejects one sample and leaves
//! the transaction usable. [`StorageError`] is a transaction-level fault.

pub mod in_memory;

use async_trait::async_trait;

use crate::labels::Labels;

/// Engine-assigned identifier of a series.
pub type SeriesRef = u64;

/// Rejection of a single sample. The transaction stays open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppendError {
    #[error("out of order sample")]
    OutOfOrderSample,
    #[error("duplicate sample for timestamp")]
    DuplicateSampleForTimestamp,
    #[error("out of bounds")]
    OutOfBounds,
    #[error("empty label set")]
    EmptyLabelSet,
}

impl AppendError {
    /// Short stable identifier, suitable for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            AppendError::OutOfOrderSample => "out_of_order",
            AppendError::DuplicateSampleForTimestamp => "duplicate",
            AppendError::OutOfBounds => "out_of_bounds",
            AppendError::EmptyLabelSet => "empty_labels",
        }
    }
}

/// Transaction-level storage failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Wraps any displayable engine error as a [`StorageError::Storage`].
    pub fn from_storage(err: impl std::fmt::Display) -> Self {
        StorageError::Storage(err.to_string())
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Source of append transactions.
///
/// Implementations must allow many transactions to be open concurrently,
/// one per writer. Nothing above this trait serializes writers.
pub trait Appendable: Send + Sync {
    /// Opens a new transaction.
    fn appender(&self) -> Box<dyn Appender>;
}

/// A single append transaction, owned by one writer for its whole life.
#[async_trait]
pub trait Appender: Send {
    /// Stages one sample for the series identified by `labels`.
    ///
    /// Staged samples are invisible to readers until [`commit`](Self::commit).
    fn append(
        &mut self,
        labels: &Labels,
        timestamp_ms: i64,
        value: f64,
    ) -> Result<SeriesRef, AppendError>;

    /// Makes every staged sample durable and visible.
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discards every staged sample.
    fn rollback(self: Box<Self>);
}
