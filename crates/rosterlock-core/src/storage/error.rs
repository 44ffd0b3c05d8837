//! Storage error types.
//!
//! - `Serialization`: failed to encode/decode a stored value
//! - `Io`: underlying storage engine errors
//! - `Poisoned`: a thread panicked while holding in-memory storage state

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, injected fault)
    #[error("I/O error: {0}")]
    Io(String),

    /// Shared in-memory state is unusable after a panic
    #[error("storage lock poisoned")]
    Poisoned,
}

