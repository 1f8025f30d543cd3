//! Unified error type for tank operations
//!
//! All engine components surface failures through [`TankError`] so that the
//! HTTP layer and the CLI can map them uniformly.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TankError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Tank '{0}' already exists")]
    DuplicateName(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Tank capacity reached ({capacity} vectors)")]
    CapacityExceeded { capacity: usize },

    #[error("Serialized metadata ({size} bytes) exceeds shared region capacity ({capacity} bytes)")]
    SerializationOverflow { size: usize, capacity: usize },

    #[error("Unsupported similarity method: {0}")]
    UnsupportedMetric(String),

    #[error("Batch mismatch: {vectors} vectors but {metadata} metadata entries")]
    BatchMismatch { vectors: usize, metadata: usize },

    #[error("Command acknowledgment not received in time")]
    Timeout,

    #[error("Index {index} out of bounds for capacity {capacity}")]
    IndexOutOfBounds { index: usize, capacity: usize },

    #[error("Shared region '{name}': {source}")]
    Region {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot format error: {0}")]
    Format(String),

    #[error("Metadata codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TankError>;

impl TankError {
    pub fn region(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::Region {
            name: name.into(),
            source,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}
