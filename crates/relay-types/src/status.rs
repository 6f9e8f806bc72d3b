use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Thread status.
///
/// There is no transition graph: any status may follow any other. Canonical
/// values are matched case-insensitively (and `in-review` / `in review` are
/// accepted for `IN_REVIEW`); anything else is kept verbatim as `Custom`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ThreadStatus {
    #[default]
    Open,
    InReview,
    Closed,
    Done,
    Merged,
    Resolved,
    Custom(String),
}

impl ThreadStatus {
    /// Parse a status, folding canonical spellings.
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.contains(['\n', '\r']) {
            return Err(TypeError::InvalidStatus(raw.to_string()));
        }
        let folded = trimmed.to_ascii_uppercase().replace(['-', ' '], "_");
        Ok(match folded.as_str() {
            "OPEN" => Self::Open,
            "IN_REVIEW" => Self::InReview,
            "CLOSED" => Self::Closed,
            "DONE" => Self::Done,
            "MERGED" => Self::Merged,
            "RESOLVED" => Self::Resolved,
            _ => Self::Custom(trimmed.to_string()),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => "OPEN",
            Self::InReview => "IN_REVIEW",
            Self::Closed => "CLOSED",
            Self::Done => "DONE",
            Self::Merged => "MERGED",
            Self::Resolved => "RESOLVED",
            Self::Custom(s) => s,
        }
    }

    /// Closed threads are hidden from default listings but stay writable.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed | Self::Done | Self::Merged | Self::Resolved)
    }
}

impl TryFrom<String> for ThreadStatus {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ThreadStatus> for String {
    fn from(status: ThreadStatus) -> Self {
        status.as_str().to_string()
    }
}

impl FromStr for ThreadStatus {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
