//! The [`VcsClient`] adapter interface.
//!
//! [`SyncManager`](crate::SyncManager) speaks only this trait. [`GitCli`](crate::GitCli)
//! implements it with the `git` binary; [`ScriptedVcs`](crate::fake::ScriptedVcs)
//! implements it in memory for tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::VcsResult;

/// Version-control operations on one working tree.
///
/// `remote` arguments accept a configured remote name or a URL.
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// The working tree this client operates on.
    fn workdir(&self) -> &Path;

    /// Whether the working tree is the root of a repository.
    async fn is_repository(&self) -> VcsResult<bool>;

    async fn init(&self) -> VcsResult<()>;

    /// Clone `url` into the working tree, which must be absent or empty.
    async fn clone_remote(&self, url: &str) -> VcsResult<()>;

    async fn add_remote(&self, name: &str, url: &str) -> VcsResult<()>;

    /// URL of a configured remote, or `None` if there is no such remote.
    async fn remote_url(&self, name: &str) -> VcsResult<Option<String>>;

    /// Branch names published on `remote`. Doubles as a reachability check,
    /// and works before the working tree exists when `remote` is a URL.
    async fn ls_remote(&self, remote: &str) -> VcsResult<Vec<String>>;

    /// Update every remote-tracking ref of `remote`.
    async fn fetch(&self, remote: &str) -> VcsResult<()>;

    /// The checked-out branch, `None` when HEAD is detached.
    async fn current_branch(&self) -> VcsResult<Option<String>>;

    async fn branch_exists(&self, branch: &str) -> VcsResult<bool>;

    /// Whether the local remote-tracking ref `<remote>/<branch>` exists.
    async fn remote_branch_ref_exists(&self, remote: &str, branch: &str) -> VcsResult<bool>;

    /// Switch to `branch`. With `create`, make it first, starting at
    /// `start_point` or at the current HEAD.
    async fn checkout(&self, branch: &str, create: bool, start_point: Option<&str>) -> VcsResult<()>;

    /// Name of the remote `branch` tracks, if any.
    async fn upstream_of(&self, branch: &str) -> VcsResult<Option<String>>;

    async fn set_upstream(&self, branch: &str, remote: &str) -> VcsResult<()>;

    /// Rebase the current branch onto `onto`, stashing local edits around it.
    async fn rebase(&self, onto: &str) -> VcsResult<()>;

    async fn abort_rebase(&self) -> VcsResult<()>;

    /// Whether the working tree differs from HEAD (untracked files count).
    async fn has_changes(&self) -> VcsResult<bool>;

    /// Commit the working-tree state of `paths` (relative to the working
    /// tree), leaving every other change out of the commit. An empty list
    /// means everything. Returns `false` when there was nothing to commit.
    async fn commit_paths(&self, message: &str, paths: &[PathBuf]) -> VcsResult<bool>;

    /// Stage everything and commit.
    async fn commit_all(&self, message: &str) -> VcsResult<bool> {
        self.commit_paths(message, &[]).await
    }

    async fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> VcsResult<()>;

    /// Revision id of HEAD, `None` before the first commit.
    async fn head_revision(&self) -> VcsResult<Option<String>>;
}
