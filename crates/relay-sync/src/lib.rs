//! Replica synchronization for Relay.
//!
//! Threads live in a git working tree that may be mirrored to a shared
//! remote. [`SyncManager`] owns the policy for keeping that replica in step:
//! bootstrap (reuse, init, clone, or provision-then-clone), alignment to the
//! paired code branch, pull-rebase before writes, and commit-then-push with
//! bounded retry on non-fast-forward rejection.
//!
//! All VCS access goes through the [`VcsClient`] trait. [`GitCli`] drives the
//! `git` binary; [`fake::ScriptedVcs`] is an in-memory stand-in for tests.
//!
//! Branches without upstream tracking are *unpublished*: commits stay local
//! and no network call is made until [`SyncManager::publish`].

pub mod error;
pub mod fake;
pub mod git;
pub mod linkage;
pub mod manager;
pub mod names;
pub mod provision;
pub mod retry;
pub mod types;
pub mod vcs;

pub use error::{SyncError, SyncResult, VcsError, VcsErrorKind, VcsResult};
pub use git::GitCli;
pub use linkage::{CodeContext, CommitLinkage};
pub use manager::SyncManager;
pub use provision::{CommandProvisionHook, ProvisionFailure, ProvisionHook, Transport};
pub use retry::RetryPolicy;
pub use types::{
    BootstrapOutcome, BranchAlignment, CommitOutcome, Prepared, PublishOutcome, PullOutcome, PushStatus,
    SkipReason, SyncOptions,
};
pub use vcs::VcsClient;
