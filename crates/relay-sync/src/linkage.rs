//! Commit metadata tying thread changes to the code they discuss.

use std::fmt::Write as _;
use std::path::PathBuf;

use relay_types::{IdempotencyKey, Topic};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::vcs::VcsClient;

/// Where the writer's code lives, as far as it could be detected.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeContext {
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub revision: Option<String>,
}

impl CodeContext {
    /// Inspect the paired code repository. Anything that cannot be read is
    /// left empty; detection never fails a write.
    pub async fn detect(code: &dyn VcsClient, remote_name: &str) -> Self {
        let repo = code.remote_url(remote_name).await.unwrap_or_else(|e| {
            debug!(error = %e, "no code repo remote");
            None
        });
        let branch = code.current_branch().await.unwrap_or_else(|e| {
            debug!(error = %e, "no code branch");
            None
        });
        let revision = code.head_revision().await.unwrap_or_else(|e| {
            debug!(error = %e, "no code revision");
            None
        });
        Self { repo, branch, revision }
    }

    pub fn is_empty(&self) -> bool {
        self.repo.is_none() && self.branch.is_none() && self.revision.is_none()
    }
}

/// Everything a thread commit records about its origin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitLinkage {
    pub topic: Topic,
    pub key: IdempotencyKey,
    /// One-line description, e.g. `say: Plan v1`.
    pub summary: String,
    pub code: CodeContext,
    /// Optional author spec tag.
    pub spec: Option<String>,
    /// Files the commit covers, relative to the replica. Empty means all.
    pub paths: Vec<PathBuf>,
}

impl CommitLinkage {
    pub fn new(topic: Topic, key: IdempotencyKey, summary: impl Into<String>) -> Self {
        Self {
            topic,
            key,
            summary: summary.into(),
            code: CodeContext::default(),
            spec: None,
            paths: Vec::new(),
        }
    }

    pub fn with_code(mut self, code: CodeContext) -> Self {
        self.code = code;
        self
    }

    pub fn with_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_spec(mut self, spec: Option<String>) -> Self {
        self.spec = spec.filter(|s| !s.trim().is_empty());
        self
    }

    /// Commit message: subject line, blank line, trailers.
    pub fn message(&self) -> String {
        let summary = self.summary.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut msg = format!("relay({}): {}\n\n", self.topic, summary);
        let mut trailer = |name: &str, value: Option<&str>| {
            if let Some(value) = value {
                let _ = writeln!(msg, "{name}: {}", value.trim());
            }
        };
        trailer("Code-Repo", self.code.repo.as_deref());
        trailer("Code-Branch", self.code.branch.as_deref());
        trailer("Code-Commit", self.code.revision.as_deref());
        trailer("Thread-Topic", Some(self.topic.as_str()));
        trailer("Idempotency-Key", Some(self.key.to_string().as_str()));
        trailer("Spec", self.spec.as_deref());
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> IdempotencyKey {
        "0192a7c0-0000-7000-8000-000000000001".parse().unwrap()
    }

    #[test]
    fn minimal_message() {
        let l = CommitLinkage::new(Topic::new("feature-x").unwrap(), key(), "say: Plan\nv1");
        assert_eq!(
            l.message(),
            "relay(feature-x): say: Plan v1\n\nThread-Topic: feature-x\nIdempotency-Key: 0192a7c0-0000-7000-8000-000000000001\n"
        );
    }

    #[test]
    fn full_trailers_in_order() {
        let l = CommitLinkage::new(Topic::new("feature-x").unwrap(), key(), "ack")
            .with_code(CodeContext {
                repo: Some("git@host:acme/app.git".into()),
                branch: Some("feature/x".into()),
                revision: Some("abc123".into()),
            })
            .with_spec(Some("SPEC-7".into()));
        let msg = l.message();
        let trailers: Vec<_> = msg.lines().skip(2).map(|l| l.split(':').next().unwrap()).collect();
        assert_eq!(
            trailers,
            ["Code-Repo", "Code-Branch", "Code-Commit", "Thread-Topic", "Idempotency-Key", "Spec"]
        );
    }

    #[test]
    fn blank_spec_is_dropped() {
        let l = CommitLinkage::new(Topic::new("t").unwrap(), key(), "x").with_spec(Some("  ".into()));
        assert!(!l.message().contains("Spec:"));
    }

    #[tokio::test]
    async fn detect_reads_fake_repo() {
        let code = crate::fake::ScriptedVcs::new("/code");
        code.seed_repository("feature/x", Some("git@host:acme/app.git"));
        let ctx = CodeContext::detect(&code, "origin").await;
        assert_eq!(ctx.repo.as_deref(), Some("git@host:acme/app.git"));
        assert_eq!(ctx.branch.as_deref(), Some("feature/x"));
        assert!(ctx.revision.is_some());
        assert!(!ctx.is_empty());
        assert!(CodeContext::default().is_empty());
    }
}
