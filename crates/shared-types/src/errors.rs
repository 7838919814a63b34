//! # Error Types
//!
//! Errors raised by key-value backends and the versioned database layer.

use thiserror::Error;

/// Errors raised by key-value storage backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Backend I/O failure.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A commit batch holds the exclusive store lock; no other call may be
    /// issued against the store until the batch ends.
    #[error("Commit batch in progress: store is locked until the batch ends")]
    BatchInProgress,

    /// A commit section is already open.
    #[error("Commit already in progress")]
    CommitInProgress,
}
