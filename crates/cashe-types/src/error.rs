use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown checksum type: {0}")]
    UnknownChecksum(String),

    #[error("invalid {checksum_type} digest length: expected {expected}, got {actual}")]
    InvalidLength {
        checksum_type: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid hex digest: {0}")]
    InvalidHex(String),

    #[error("invalid object key {0:?}: expected <type>:<digest>")]
    InvalidFormat(String),
}
