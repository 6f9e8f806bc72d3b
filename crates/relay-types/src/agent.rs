use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identity of a thread participant.
///
/// Agent ids are compared exactly; canonicalization (case folding, aliases)
/// is the agent registry's job and happens before an `AgentId` is built.
/// An id is a single non-empty line without leading or trailing whitespace.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    pub fn new(raw: impl Into<String>) -> Result<Self, TypeError> {
        let raw = raw.into();
        if raw.is_empty() || raw.trim() != raw || raw.contains(['\n', '\r']) {
            return Err(TypeError::InvalidAgent(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AgentId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AgentId> for String {
    fn from(agent: AgentId) -> Self {
        agent.0
    }
}

impl FromStr for AgentId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({})", self.0)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_names_with_inner_spaces() {
        let agent = AgentId::new("Claude Code").unwrap();
        assert_eq!(agent.as_str(), "Claude Code");
    }

    #[test]
    fn rejects_empty_and_padded() {
        assert!(AgentId::new("").is_err());
        assert!(AgentId::new(" alice").is_err());
        assert!(AgentId::new("alice\nbob").is_err());
    }

    #[test]
    fn equality_is_exact() {
        assert_ne!(AgentId::new("alice").unwrap(), AgentId::new("Alice").unwrap());
    }
}
