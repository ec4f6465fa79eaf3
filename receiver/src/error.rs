//! Error types for the receiver.

use std::fmt;

use common::{AppendError, StorageError};

/// Stage of the frame decoder that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeStage {
    Decompress,
    Deserialize,
}

impl DecodeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeStage::Decompress => "decompress",
            DecodeStage::Deserialize => "deserialize",
        }
    }
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for receiver operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The request body could not be read.
    #[error("http read error: {0}")]
    Transport(String),

    /// The request body exceeds the configured limit.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// The payload could not be decompressed or deserialized.
    #[error("{stage} error: {message}")]
    Decode { stage: DecodeStage, message: String },

    /// A batch could not be encoded into a frame.
    #[error("encode error: {0}")]
    Encode(String),

    /// A sample was rejected and the policy forbids partial commits.
    #[error("sample rejected: {0}")]
    SampleRejected(AppendError),

    /// The storage engine failed to commit the transaction.
    #[error("commit error: {0}")]
    Commit(StorageError),

    /// The admission gate is refusing writes.
    #[error("receiver memory full")]
    MemoryFull,

    /// Configuration could not be parsed or is inconsistent.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn decode(stage: DecodeStage, err: impl fmt::Display) -> Self {
        Error::Decode {
            stage,
            message: err.to_string(),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Commit(err)
    }
}

/// Result type alias for receiver operations.
pub type Result<T> = std::result::Result<T, Error>;
