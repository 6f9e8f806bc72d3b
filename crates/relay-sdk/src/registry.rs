//! Agent identity: canonical names and who answers whom.

use std::collections::BTreeMap;

use relay_types::AgentId;

use crate::config::RelayConfig;
use crate::error::RelayResult;

/// Resolves agent names and counterparts.
pub trait AgentRegistry: Send + Sync {
    /// Turn a user-supplied name into the id stored in threads.
    fn canonicalize(&self, raw: &str) -> RelayResult<AgentId>;

    /// The agent whose turn it is after `agent` speaks.
    fn counterpart_of(&self, agent: &AgentId) -> AgentId;
}

/// Registry built from configured pairs.
///
/// Names are trimmed and lowercased. Pairs are symmetric. An agent without a
/// pair passes the ball to the fallback, or keeps it when there is none.
#[derive(Clone, Debug, Default)]
pub struct StaticRegistry {
    pairs: BTreeMap<AgentId, AgentId>,
    fallback: Option<AgentId>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RelayConfig) -> RelayResult<Self> {
        let mut registry = Self::new();
        for (a, b) in &config.counterparts {
            let a = registry.canonicalize(a)?;
            let b = registry.canonicalize(b)?;
            registry = registry.with_pair(a, b);
        }
        if let Some(fallback) = config.default_ball.as_deref() {
            let fallback = registry.canonicalize(fallback)?;
            registry = registry.with_fallback(fallback);
        }
        Ok(registry)
    }

    pub fn with_pair(mut self, a: AgentId, b: AgentId) -> Self {
        self.pairs.insert(a.clone(), b.clone());
        self.pairs.insert(b, a);
        self
    }

    pub fn with_fallback(mut self, agent: AgentId) -> Self {
        self.fallback = Some(agent);
        self
    }
}

impl AgentRegistry for StaticRegistry {
    fn canonicalize(&self, raw: &str) -> RelayResult<AgentId> {
        Ok(AgentId::new(raw.trim().to_lowercase())?)
    }

    fn counterpart_of(&self, agent: &AgentId) -> AgentId {
        if let Some(other) = self.pairs.get(agent) {
            return other.clone();
        }
        match &self.fallback {
            Some(fallback) if fallback != agent => fallback.clone(),
            _ => agent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> AgentId {
        AgentId::new(name).unwrap()
    }

    #[test]
    fn pairs_are_symmetric() {
        let r = StaticRegistry::new().with_pair(id("claude"), id("codex"));
        assert_eq!(r.counterpart_of(&id("claude")), id("codex"));
        assert_eq!(r.counterpart_of(&id("codex")), id("claude"));
    }

    #[test]
    fn unpaired_agents_use_fallback() {
        let r = StaticRegistry::new()
            .with_pair(id("claude"), id("codex"))
            .with_fallback(id("lead"));
        assert_eq!(r.counterpart_of(&id("gemini")), id("lead"));
        assert_eq!(r.counterpart_of(&id("lead")), id("lead"));
        assert_eq!(StaticRegistry::new().counterpart_of(&id("solo")), id("solo"));
    }

    #[test]
    fn canonicalize_folds_case_and_space() {
        let r = StaticRegistry::new();
        assert_eq!(r.canonicalize("  Claude ").unwrap(), id("claude"));
        assert!(r.canonicalize("   ").is_err());
    }

    #[test]
    fn from_config() {
        let mut config = RelayConfig::default();
        config.counterparts.insert("Claude".into(), "Codex".into());
        config.default_ball = Some("lead".into());
        let r = StaticRegistry::from_config(&config).unwrap();
        assert_eq!(r.counterpart_of(&id("codex")), id("claude"));
        assert_eq!(r.counterpart_of(&id("other")), id("lead"));
    }
}
