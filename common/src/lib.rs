//! Shared storage-engine boundary for the OpenData receivers.
//!
//! The ingestion services never talk to an engine directly. They open a
//! transaction through [`Appendable`], stage samples on the returned
//! [`Appender`], and finish it with exactly one commit or rollback.
//! [`InMemoryStorage`] is the reference engine used by the receiver binary
//! and by tests.

pub mod labels;
pub mod storage;

pub use labels::{Label, Labels};
pub use storage::in_memory::InMemoryStorage;
pub use storage::{
    AppendError, Appendable, Appender, SeriesRef, StorageError, StorageResult,
};
