use std::path::PathBuf;

use cashe_types::{ObjectKey, TypeError};

/// Errors from cache store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object is not present in the cache.
    #[error("object not found: {0}")]
    NotFound(ObjectKey),

    /// Recomputed digest disagrees with the object's identity.
    #[error("integrity mismatch for {key}: computed {computed}")]
    IntegrityMismatch { key: ObjectKey, computed: String },

    /// A digested file did not have the expected number of bytes.
    #[error("size mismatch for {}: expected {expected} bytes, read {actual}", path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The checksum type or digest does not form a valid key.
    #[error("invalid object key: {0}")]
    InvalidKey(#[from] TypeError),

    /// The store configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Returns `true` if this error means the object is simply absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
