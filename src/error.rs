//! Error types for the instrumented cache.

use thiserror::Error;

/// Main error type for cache and store operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Value absent for key: {0}")]
    ValueAbsent(String),

    #[error("Cannot coerce value at {key} to {target}")]
    Coercion { key: String, target: &'static str },

    #[error("Input type rejected: {0}")]
    InputTypeRejected(String),

    #[error("WRONGTYPE operation against key holding the wrong kind of value: {0}")]
    WrongType(String),

    #[error("Value at {0} is not an integer or out of range")]
    NotAnInteger(String),

    #[error("Invalid operation identity: {0:?}")]
    InvalidIdentity(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid journal format: {0}")]
    InvalidFormat(String),

    #[error("Journal is locked by another process")]
    Locked,
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for CacheError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CacheError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        CacheError::Deserialization(e.to_string())
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
