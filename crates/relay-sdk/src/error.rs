use std::path::PathBuf;

use relay_lock::LockError;
use relay_sync::SyncError;
use relay_thread::ThreadError;
use relay_types::TypeError;
use thiserror::Error;

/// Errors surfaced by [`ThreadService`](crate::ThreadService).
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("thread error: {0}")]
    Thread(#[from] ThreadError),

    #[error("invalid value: {0}")]
    Type(#[from] TypeError),

    #[error("no agent given and none configured")]
    MissingAgent,

    /// A derived index refused a rebuild.
    #[error("index error: {0}")]
    Index(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Errors while loading [`RelayConfig`](crate::RelayConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
