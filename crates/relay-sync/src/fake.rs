//! In-memory [`VcsClient`] for tests.
//!
//! [`ScriptedVcs`] models a repository as per-branch lists of commit ids and
//! talks to remotes living on a [`FakeHost`], which several replicas can
//! share. Pushes succeed only as fast-forwards, fetch copies remote branches
//! into tracking refs, and rebase replays local-only commits on top under
//! new ids, as git does. Any
//! operation can be made to fail with [`ScriptedVcs::fail_next`], and every
//! call is logged so tests can assert which ones touched the network.
//!
//! Working-tree changes are detected from the real files under `workdir`,
//! honouring top-level entries of its `.gitignore`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{VcsError, VcsErrorKind, VcsResult};
use crate::vcs::VcsClient;

type Branches = BTreeMap<String, Vec<String>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn new_commit_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Remote repositories addressable by URL.
#[derive(Clone, Debug, Default)]
pub struct FakeHost {
    repos: Arc<Mutex<BTreeMap<String, Branches>>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty repository at `url`.
    pub fn create_repo(&self, url: &str) {
        lock(&self.repos).entry(url.to_string()).or_default();
    }

    pub fn exists(&self, url: &str) -> bool {
        lock(&self.repos).contains_key(url)
    }

    /// Commit ids on a remote branch, oldest first.
    pub fn log(&self, url: &str, branch: &str) -> Vec<String> {
        lock(&self.repos)
            .get(url)
            .and_then(|b| b.get(branch))
            .cloned()
            .unwrap_or_default()
    }

    /// Simulate another writer pushing a commit.
    pub fn foreign_commit(&self, url: &str, branch: &str) -> String {
        let id = new_commit_id();
        lock(&self.repos)
            .entry(url.to_string())
            .or_default()
            .entry(branch.to_string())
            .or_default()
            .push(id.clone());
        id
    }
}

#[derive(Debug, Default)]
struct Replica {
    repository: bool,
    remotes: BTreeMap<String, String>,
    current: Option<String>,
    branches: Branches,
    upstreams: BTreeMap<String, String>,
    tracking: BTreeMap<(String, String), Vec<String>>,
    messages: Vec<String>,
    committed_tree: BTreeMap<PathBuf, Vec<u8>>,
    calls: Vec<String>,
    failures: HashMap<String, VecDeque<VcsErrorKind>>,
}

/// Names of operations that reach the remote.
pub const NETWORK_OPS: [&str; 4] = ["clone", "ls_remote", "fetch", "push"];

/// A scripted, in-memory [`VcsClient`].
#[derive(Debug)]
pub struct ScriptedVcs {
    workdir: PathBuf,
    host: FakeHost,
    state: Mutex<Replica>,
}

impl ScriptedVcs {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self::with_host(workdir, FakeHost::new())
    }

    pub fn with_host(workdir: impl Into<PathBuf>, host: FakeHost) -> Self {
        Self {
            workdir: workdir.into(),
            host,
            state: Mutex::new(Replica::default()),
        }
    }

    pub fn host(&self) -> &FakeHost {
        &self.host
    }

    /// Turn the workdir into a repository with one commit on `branch`.
    pub fn seed_repository(&self, branch: &str, origin: Option<&str>) {
        let mut s = lock(&self.state);
        s.repository = true;
        s.current = Some(branch.to_string());
        s.branches.insert(branch.to_string(), vec![new_commit_id()]);
        if let Some(url) = origin {
            s.remotes.insert("origin".into(), url.to_string());
        }
    }

    /// Make the next call to `op` fail with `kind`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, op: &str, kind: VcsErrorKind) {
        lock(&self.state)
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back(kind);
    }

    /// Every operation called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        lock(&self.state).calls.iter().filter(|c| *c == op).count()
    }

    pub fn network_calls(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| NETWORK_OPS.contains(&c.as_str()))
            .count()
    }

    /// Commit messages in commit order.
    pub fn messages(&self) -> Vec<String> {
        lock(&self.state).messages.clone()
    }

    /// Commit ids on a local branch, oldest first.
    pub fn log(&self, branch: &str) -> Vec<String> {
        lock(&self.state).branches.get(branch).cloned().unwrap_or_default()
    }

    fn begin(&self, op: &str) -> VcsResult<MutexGuard<'_, Replica>> {
        let mut s = lock(&self.state);
        s.calls.push(op.to_string());
        if let Some(kind) = s.failures.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(VcsError::new(kind, op, format!("scripted {kind:?} failure")));
        }
        Ok(s)
    }

    fn tree(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        let ignored: Vec<String> = fs::read_to_string(self.workdir.join(".gitignore"))
            .unwrap_or_default()
            .lines()
            .map(|l| l.trim().trim_end_matches('/').to_string())
            .filter(|l| !l.is_empty())
            .collect();
        let mut tree = BTreeMap::new();
        collect(&self.workdir, &self.workdir, &ignored, &mut tree);
        tree
    }
}

fn collect(root: &Path, dir: &Path, ignored: &[String], tree: &mut BTreeMap<PathBuf, Vec<u8>>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let top = rel
            .components()
            .next()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .unwrap_or_default();
        if top == ".git" || ignored.contains(&top) {
            continue;
        }
        if path.is_dir() {
            collect(root, &path, ignored, tree);
        } else if let Ok(bytes) = fs::read(&path) {
            tree.insert(rel, bytes);
        }
    }
}

fn error(kind: VcsErrorKind, op: &str, message: impl Into<String>) -> VcsError {
    VcsError::new(kind, op, message)
}

impl Replica {
    fn url_of(&self, remote: &str) -> String {
        self.remotes.get(remote).cloned().unwrap_or_else(|| remote.to_string())
    }

    fn head(&self) -> Vec<String> {
        self.current
            .as_ref()
            .and_then(|b| self.branches.get(b))
            .cloned()
            .unwrap_or_default()
    }

    fn resolve(&self, rev: &str) -> Option<Vec<String>> {
        if let Some(commits) = self.branches.get(rev) {
            return Some(commits.clone());
        }
        let (remote, branch) = rev.split_once('/')?;
        self.tracking.get(&(remote.to_string(), branch.to_string())).cloned()
    }
}

#[async_trait]
impl VcsClient for ScriptedVcs {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn is_repository(&self) -> VcsResult<bool> {
        Ok(self.begin("is_repository")?.repository)
    }

    async fn init(&self) -> VcsResult<()> {
        let mut s = self.begin("init")?;
        s.repository = true;
        s.current.get_or_insert_with(|| "main".to_string());
        Ok(())
    }

    async fn clone_remote(&self, url: &str) -> VcsResult<()> {
        let mut s = self.begin("clone")?;
        let Some(remote) = lock(&self.host.repos).get(url).cloned() else {
            return Err(error(VcsErrorKind::NotFound, "clone", "repository not found"));
        };
        let default = if remote.contains_key("main") {
            "main".to_string()
        } else {
            remote.keys().next().cloned().unwrap_or_else(|| "main".to_string())
        };
        s.repository = true;
        s.remotes.insert("origin".into(), url.to_string());
        for (branch, commits) in &remote {
            s.tracking.insert(("origin".into(), branch.clone()), commits.clone());
        }
        if let Some(commits) = remote.get(&default) {
            s.branches.insert(default.clone(), commits.clone());
        }
        s.upstreams.insert(default.clone(), "origin".into());
        s.current = Some(default);
        drop(s);
        let tree = self.tree();
        lock(&self.state).committed_tree = tree;
        Ok(())
    }

    async fn add_remote(&self, name: &str, url: &str) -> VcsResult<()> {
        let mut s = self.begin("add_remote")?;
        if s.remotes.contains_key(name) {
            return Err(error(VcsErrorKind::Other, "add_remote", format!("remote {name} already exists")));
        }
        s.remotes.insert(name.to_string(), url.to_string());
        Ok(())
    }

    async fn remote_url(&self, name: &str) -> VcsResult<Option<String>> {
        Ok(self.begin("remote_url")?.remotes.get(name).cloned())
    }

    async fn ls_remote(&self, remote: &str) -> VcsResult<Vec<String>> {
        let s = self.begin("ls_remote")?;
        let url = s.url_of(remote);
        lock(&self.host.repos)
            .get(&url)
            .map(|branches| branches.keys().cloned().collect())
            .ok_or_else(|| error(VcsErrorKind::NotFound, "ls_remote", "repository not found"))
    }

    async fn fetch(&self, remote: &str) -> VcsResult<()> {
        let mut s = self.begin("fetch")?;
        let url = s.url_of(remote);
        let Some(branches) = lock(&self.host.repos).get(&url).cloned() else {
            return Err(error(VcsErrorKind::NotFound, "fetch", "repository not found"));
        };
        s.tracking.retain(|(r, _), _| r != remote);
        for (branch, commits) in branches {
            s.tracking.insert((remote.to_string(), branch), commits);
        }
        Ok(())
    }

    async fn current_branch(&self) -> VcsResult<Option<String>> {
        Ok(self.begin("current_branch")?.current.clone())
    }

    async fn branch_exists(&self, branch: &str) -> VcsResult<bool> {
        Ok(self.begin("branch_exists")?.branches.contains_key(branch))
    }

    async fn remote_branch_ref_exists(&self, remote: &str, branch: &str) -> VcsResult<bool> {
        let s = self.begin("remote_branch_ref_exists")?;
        Ok(s.tracking.contains_key(&(remote.to_string(), branch.to_string())))
    }

    async fn checkout(&self, branch: &str, create: bool, start_point: Option<&str>) -> VcsResult<()> {
        let mut s = self.begin("checkout")?;
        if create {
            if s.branches.contains_key(branch) {
                return Err(error(VcsErrorKind::Other, "checkout", format!("branch {branch} already exists")));
            }
            let commits = match start_point {
                Some(rev) => s
                    .resolve(rev)
                    .ok_or_else(|| error(VcsErrorKind::Other, "checkout", format!("unknown revision {rev}")))?,
                None => s.head(),
            };
            if !commits.is_empty() {
                s.branches.insert(branch.to_string(), commits);
            }
        } else if !s.branches.contains_key(branch) {
            return Err(error(VcsErrorKind::Other, "checkout", format!("pathspec {branch} did not match")));
        }
        s.current = Some(branch.to_string());
        Ok(())
    }

    async fn upstream_of(&self, branch: &str) -> VcsResult<Option<String>> {
        Ok(self.begin("upstream_of")?.upstreams.get(branch).cloned())
    }

    async fn set_upstream(&self, branch: &str, remote: &str) -> VcsResult<()> {
        let mut s = self.begin("set_upstream")?;
        if !s.tracking.contains_key(&(remote.to_string(), branch.to_string())) {
            return Err(error(VcsErrorKind::Other, "set_upstream", format!("{remote}/{branch} does not exist")));
        }
        s.upstreams.insert(branch.to_string(), remote.to_string());
        Ok(())
    }

    async fn rebase(&self, onto: &str) -> VcsResult<()> {
        let mut s = self.begin("rebase")?;
        let base = s
            .resolve(onto)
            .ok_or_else(|| error(VcsErrorKind::Other, "rebase", format!("invalid upstream {onto}")))?;
        let Some(branch) = s.current.clone() else {
            return Err(error(VcsErrorKind::Other, "rebase", "detached HEAD"));
        };
        let local = s.branches.get(&branch).cloned().unwrap_or_default();
        let mut rebased = base.clone();
        if !local.iter().all(|c| base.contains(c)) {
            let replayed = local.iter().filter(|c| !base.contains(c)).map(|_| new_commit_id());
            rebased.extend(replayed);
        }
        s.branches.insert(branch, rebased);
        Ok(())
    }

    async fn abort_rebase(&self) -> VcsResult<()> {
        self.begin("abort_rebase").map(drop)
    }

    async fn has_changes(&self) -> VcsResult<bool> {
        let committed = self.begin("has_changes")?.committed_tree.clone();
        Ok(self.tree() != committed)
    }

    async fn commit_paths(&self, message: &str, paths: &[PathBuf]) -> VcsResult<bool> {
        let current = self.tree();
        let mut s = self.begin("commit")?;
        let tree = if paths.is_empty() {
            current
        } else {
            let mut next = s.committed_tree.clone();
            for path in paths {
                match current.get(path) {
                    Some(bytes) => next.insert(path.clone(), bytes.clone()),
                    None => next.remove(path),
                };
            }
            next
        };
        if tree == s.committed_tree {
            return Ok(false);
        }
        let Some(branch) = s.current.clone() else {
            return Err(error(VcsErrorKind::Other, "commit", "detached HEAD"));
        };
        s.branches.entry(branch).or_default().push(new_commit_id());
        s.messages.push(message.to_string());
        s.committed_tree = tree;
        Ok(true)
    }

    async fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> VcsResult<()> {
        let mut s = self.begin("push")?;
        let url = s.url_of(remote);
        let Some(local) = s.branches.get(branch).cloned() else {
            return Err(error(VcsErrorKind::Other, "push", format!("src refspec {branch} does not match any")));
        };
        {
            let mut repos = lock(&self.host.repos);
            let Some(repo) = repos.get_mut(&url) else {
                return Err(error(VcsErrorKind::NotFound, "push", "repository not found"));
            };
            let theirs = repo.entry(branch.to_string()).or_default();
            if !local.starts_with(theirs.as_slice()) {
                return Err(error(VcsErrorKind::NonFastForward, "push", "[rejected] (fetch first)"));
            }
            *theirs = local.clone();
        }
        s.tracking.insert((remote.to_string(), branch.to_string()), local);
        if set_upstream {
            s.upstreams.insert(branch.to_string(), remote.to_string());
        }
        Ok(())
    }

    async fn head_revision(&self) -> VcsResult<Option<String>> {
        Ok(self.begin("head_revision")?.head().last().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_requires_fast_forward() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        host.create_repo("mem://threads");
        let vcs = ScriptedVcs::with_host(dir.path(), host.clone());
        vcs.init().await.unwrap();
        vcs.add_remote("origin", "mem://threads").await.unwrap();

        fs::write(dir.path().join("a.md"), "a").unwrap();
        assert!(vcs.commit_all("one").await.unwrap());
        assert!(!vcs.commit_all("noop").await.unwrap());
        vcs.push("origin", "main", true).await.unwrap();
        assert_eq!(host.log("mem://threads", "main"), vcs.log("main"));

        host.foreign_commit("mem://threads", "main");
        fs::write(dir.path().join("a.md"), "b").unwrap();
        vcs.commit_all("two").await.unwrap();
        let err = vcs.push("origin", "main", false).await.unwrap_err();
        assert_eq!(err.kind, VcsErrorKind::NonFastForward);

        vcs.fetch("origin").await.unwrap();
        vcs.rebase("origin/main").await.unwrap();
        vcs.push("origin", "main", false).await.unwrap();
        assert_eq!(host.log("mem://threads", "main").len(), 3);
        assert_eq!(vcs.network_calls(), 4);
    }

    #[tokio::test]
    async fn rebase_rewrites_replayed_commits() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        host.create_repo("mem://threads");
        let vcs = ScriptedVcs::with_host(dir.path(), host.clone());
        vcs.init().await.unwrap();
        vcs.add_remote("origin", "mem://threads").await.unwrap();
        fs::write(dir.path().join("a.md"), "a").unwrap();
        vcs.commit_all("one").await.unwrap();
        let before = vcs.head_revision().await.unwrap();

        let theirs = host.foreign_commit("mem://threads", "main");
        vcs.fetch("origin").await.unwrap();
        vcs.rebase("origin/main").await.unwrap();
        let log = vcs.log("main");
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], theirs);
        assert_ne!(vcs.head_revision().await.unwrap(), before);
    }

    #[tokio::test]
    async fn path_commits_leave_other_files_out() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = ScriptedVcs::new(dir.path());
        vcs.init().await.unwrap();
        fs::write(dir.path().join("a.md"), "a").unwrap();
        fs::write(dir.path().join("b.md"), "b").unwrap();

        assert!(vcs.commit_paths("a only", &[PathBuf::from("a.md")]).await.unwrap());
        assert!(!vcs.commit_paths("a again", &[PathBuf::from("a.md")]).await.unwrap());
        assert!(vcs.has_changes().await.unwrap());
        assert!(vcs.commit_all("rest").await.unwrap());
        assert!(!vcs.has_changes().await.unwrap());
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let vcs = ScriptedVcs::new("/nowhere");
        vcs.fail_next("init", VcsErrorKind::Other);
        assert!(vcs.init().await.is_err());
        vcs.init().await.unwrap();
        assert_eq!(vcs.call_count("init"), 2);
    }

    #[tokio::test]
    async fn ignored_paths_are_not_changes() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = ScriptedVcs::new(dir.path());
        vcs.init().await.unwrap();
        fs::write(dir.path().join(".gitignore"), ".relay/\n").unwrap();
        vcs.commit_all("ignore").await.unwrap();
        fs::create_dir_all(dir.path().join(".relay/locks")).unwrap();
        fs::write(dir.path().join(".relay/locks/t.lock"), "{}").unwrap();
        assert!(!vcs.has_changes().await.unwrap());
    }
}
