//! Error types for thread operations.

use relay_types::{Topic, TypeError};
use thiserror::Error;

/// Errors that can occur while reading, writing, or parsing threads.
#[derive(Debug, Error)]
pub enum ThreadError {
    /// No thread exists for the topic.
    #[error("thread not found: {0}")]
    NotFound(Topic),

    /// A thread file is malformed.
    #[error("malformed thread {topic} at line {line}: {reason}")]
    Parse {
        topic: Topic,
        line: usize,
        reason: String,
    },

    /// A value failed validation.
    #[error("invalid value: {0}")]
    Type(#[from] TypeError),

    /// An in-memory store lock was poisoned.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),

    /// I/O error in a file-backed store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for thread results.
pub type ThreadResult<T> = std::result::Result<T, ThreadError>;
