use std::time::Duration;

use serde::Serialize;

use crate::retry::RetryPolicy;

/// How a [`SyncManager`](crate::SyncManager) treats its replica.
#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Name of the shared remote inside the replica.
    pub remote_name: String,
    /// URL to clone from or attach. `None` means local-only.
    pub remote_url: Option<String>,
    /// Branch to align the replica to during prepare.
    pub branch: Option<String>,
    pub auto_branch_align: bool,
    pub auto_provision: bool,
    /// Transports (`ssh`, `https`, ...) eligible for provisioning.
    pub provision_transports: Vec<String>,
    /// Fetch attempts during pull; only network failures are retried.
    pub pull_retry: RetryPolicy,
    /// Total push attempts on non-fast-forward rejection.
    pub push_retry: RetryPolicy,
    /// Lines bootstrap keeps in the replica's `.gitignore`.
    pub ignore: Vec<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            remote_name: "origin".into(),
            remote_url: None,
            branch: None,
            auto_branch_align: true,
            auto_provision: true,
            provision_transports: vec!["ssh".into(), "https".into()],
            pull_retry: RetryPolicy::new(2, Duration::from_millis(250), Duration::from_secs(4)),
            push_retry: RetryPolicy::default(),
            ignore: vec![".relay/".into()],
        }
    }
}

impl SyncOptions {
    pub fn with_remote(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Retry immediately; for tests.
    pub fn without_backoff(mut self) -> Self {
        self.pull_retry = RetryPolicy::immediate(self.pull_retry.max_attempts);
        self.push_retry = RetryPolicy::immediate(self.push_retry.max_attempts);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// An existing replica was found.
    Reused,
    /// A fresh local repository was created (remote attached if configured).
    Initialized,
    Cloned,
    /// The remote was created by the provisioning hook, then cloned.
    Provisioned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchAlignment {
    /// Checked out and tracking the remote branch.
    Tracking,
    /// Exists only locally.
    LocalOnly,
    /// Newly created locally, unpublished.
    Created,
}

/// Result of [`SyncManager::prepare`](crate::SyncManager::prepare).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Prepared {
    pub bootstrap: BootstrapOutcome,
    pub branch: Option<String>,
    pub alignment: Option<BranchAlignment>,
}

/// Why a network step was skipped. A skip is a success.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoRemote,
    /// The branch has no upstream tracking configured.
    Unpublished,
    DetachedHead,
    /// The remote has no history for the branch yet.
    RemoteEmpty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PullOutcome {
    Skipped(SkipReason),
    Rebased,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushStatus {
    Pushed { attempts: u32 },
    LocalOnly(SkipReason),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommitOutcome {
    /// Whether a new commit was made (false when the tree was clean).
    pub committed: bool,
    pub revision: Option<String>,
    pub push: PushStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub remote: String,
    pub branch: String,
    pub attempts: u32,
}
