use thiserror::Error;

/// Errors produced when constructing or parsing Relay value types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid topic {topic:?}: {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("invalid agent identifier {0:?}")]
    InvalidAgent(String),

    #[error("unknown entry type: {0}")]
    UnknownEntryType(String),

    #[error("invalid status: {0:?}")]
    InvalidStatus(String),

    #[error("invalid idempotency key: {0}")]
    InvalidKey(String),

    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },
}
