use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Kind of a thread entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// General commentary (also used for handoff notes).
    #[default]
    Note,
    /// A proposed course of action.
    Plan,
    /// A recorded decision.
    Decision,
    /// A pull-request announcement or review.
    #[serde(rename = "PR")]
    Pr,
    /// Wrap-up of the thread.
    Closure,
}

impl EntryType {
    pub const ALL: [EntryType; 5] = [
        EntryType::Note,
        EntryType::Plan,
        EntryType::Decision,
        EntryType::Pr,
        EntryType::Closure,
    ];

    /// The label written into thread files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "Note",
            Self::Plan => "Plan",
            Self::Decision => "Decision",
            Self::Pr => "PR",
            Self::Closure => "Closure",
        }
    }
}

impl FromStr for EntryType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TypeError::UnknownEntryType(s.to_string()))
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
