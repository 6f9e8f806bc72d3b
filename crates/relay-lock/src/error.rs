//! Error types for advisory lock operations.

use std::path::PathBuf;
use std::time::Duration;

use relay_types::Topic;
use thiserror::Error;

/// Errors that can occur while acquiring or releasing a topic lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock stayed held by a live owner for the whole wait window.
    #[error("timed out after {waited:?} waiting for the lock on {topic}")]
    Timeout {
        topic: Topic,
        waited: Duration,
        holder_pid: Option<u32>,
    },

    /// A non-forced unlock was attempted on a lock whose owner is alive.
    #[error("lock on {topic} is held by live process {owner_pid}; force is required")]
    LiveLockOverride { topic: Topic, owner_pid: u32 },

    /// The lock marker exists but does not hold a readable record.
    #[error("corrupt lock record at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Serialization failure while writing a record.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error on the lock directory.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for lock results.
pub type LockResult<T> = std::result::Result<T, LockError>;
