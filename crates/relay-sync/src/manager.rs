use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult, VcsErrorKind};
use crate::linkage::CommitLinkage;
use crate::names::validate_branch_name;
use crate::provision::{ProvisionHook, Transport};
use crate::types::{
    BootstrapOutcome, BranchAlignment, CommitOutcome, Prepared, PublishOutcome, PullOutcome, PushStatus,
    SkipReason, SyncOptions,
};
use crate::vcs::VcsClient;

enum Publication {
    Published { remote: String, branch: String },
    Skip(SkipReason),
}

/// Keeps one replica in step with its remote.
///
/// The manager does no locking of its own. Callers serialize access to the
/// working tree; every method here assumes it is the only one touching it.
pub struct SyncManager {
    vcs: Arc<dyn VcsClient>,
    options: SyncOptions,
    provisioner: Option<Arc<dyn ProvisionHook>>,
    prepared: OnceCell<Prepared>,
}

impl SyncManager {
    pub fn new(vcs: Arc<dyn VcsClient>, options: SyncOptions) -> Self {
        Self {
            vcs,
            options,
            provisioner: None,
            prepared: OnceCell::new(),
        }
    }

    pub fn with_provisioner(mut self, hook: Arc<dyn ProvisionHook>) -> Self {
        self.provisioner = Some(hook);
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn vcs(&self) -> &dyn VcsClient {
        self.vcs.as_ref()
    }

    /// Bootstrap and branch alignment, done once per manager.
    pub async fn prepare(&self) -> SyncResult<&Prepared> {
        self.prepared.get_or_try_init(|| self.prepare_uncached()).await
    }

    async fn prepare_uncached(&self) -> SyncResult<Prepared> {
        let bootstrap = self.bootstrap().await?;
        let (branch, alignment) = match self.options.branch.as_deref() {
            Some(target) if self.options.auto_branch_align => {
                let alignment = self.ensure_branch(target).await?;
                (Some(target.to_string()), Some(alignment))
            }
            _ => (self.vcs.current_branch().await?, None),
        };
        info!(?bootstrap, ?branch, ?alignment, "replica prepared");
        Ok(Prepared {
            bootstrap,
            branch,
            alignment,
        })
    }

    /// Make sure a local replica exists.
    pub async fn bootstrap(&self) -> SyncResult<BootstrapOutcome> {
        let outcome = if self.vcs.is_repository().await? {
            self.attach_remote().await?;
            BootstrapOutcome::Reused
        } else if let Some(url) = self.options.remote_url.as_deref() {
            self.bootstrap_from(url).await?
        } else {
            info!(workdir = %self.vcs.workdir().display(), "initializing local-only replica");
            self.vcs.init().await?;
            BootstrapOutcome::Initialized
        };
        self.ensure_ignored().await?;
        Ok(outcome)
    }

    async fn bootstrap_from(&self, url: &str) -> SyncResult<BootstrapOutcome> {
        if has_content(self.vcs.workdir()).await? {
            info!(workdir = %self.vcs.workdir().display(), "existing files, initializing in place");
            self.init_with_remote().await?;
            self.adopt_remote_history(url).await?;
            return Ok(BootstrapOutcome::Initialized);
        }
        match self.vcs.ls_remote(url).await {
            Ok(_) => {
                info!(%url, "cloning replica");
                self.vcs.clone_remote(url).await?;
                Ok(BootstrapOutcome::Cloned)
            }
            Err(e) if e.is(VcsErrorKind::Network) || e.is(VcsErrorKind::Auth) => Err(SyncError::Unavailable {
                remote: url.to_string(),
                reason: e.message,
            }),
            Err(e) if e.is(VcsErrorKind::NotFound) => self.provision_or_init(url).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn provision_or_init(&self, url: &str) -> SyncResult<BootstrapOutcome> {
        let transport = Transport::of(url);
        let allowed = self
            .options
            .provision_transports
            .iter()
            .any(|t| t.eq_ignore_ascii_case(transport.as_str()));
        match &self.provisioner {
            Some(hook) if self.options.auto_provision && allowed => {
                hook.provision(url).await.map_err(|f| SyncError::Provision {
                    url: url.to_string(),
                    message: f.message,
                    output: f.output,
                })?;
                match self.vcs.clone_remote(url).await {
                    Ok(()) => return Ok(BootstrapOutcome::Provisioned),
                    Err(e) => warn!(%url, error = %e, "clone after provisioning failed, initializing locally"),
                }
            }
            _ => debug!(%url, transport = transport.as_str(), "remote missing, not provisioning"),
        }
        self.init_with_remote().await?;
        Ok(BootstrapOutcome::Initialized)
    }

    /// Base a replica initialized in place on the remote's history, so later
    /// pulls and pushes share ancestry with it. Local files stay untracked;
    /// git refuses the checkout if one would be overwritten.
    async fn adopt_remote_history(&self, url: &str) -> SyncResult<()> {
        let remote = self.options.remote_name.as_str();
        let heads = match self.vcs.ls_remote(remote).await {
            Ok(heads) => heads,
            Err(e) if e.is(VcsErrorKind::NotFound) => {
                debug!(%url, "remote missing, nothing to adopt");
                return Ok(());
            }
            Err(e) => {
                return Err(SyncError::Unavailable {
                    remote: url.to_string(),
                    reason: e.message,
                })
            }
        };
        let Some(branch) = default_branch(&heads, self.options.branch.as_deref()) else {
            debug!(%url, "remote has no history yet");
            return Ok(());
        };
        self.vcs.fetch(remote).await.map_err(SyncError::Pull)?;
        let tracking = format!("{remote}/{branch}");
        self.vcs.checkout(branch, true, Some(&tracking)).await?;
        self.vcs.set_upstream(branch, remote).await?;
        info!(%tracking, "adopted remote history");
        Ok(())
    }

    async fn init_with_remote(&self) -> SyncResult<()> {
        self.vcs.init().await?;
        self.attach_remote().await
    }

    async fn attach_remote(&self) -> SyncResult<()> {
        let Some(url) = self.options.remote_url.as_deref() else {
            return Ok(());
        };
        let name = &self.options.remote_name;
        if self.vcs.remote_url(name).await?.is_none() {
            info!(remote = %name, %url, "attaching remote");
            self.vcs.add_remote(name, url).await?;
        }
        Ok(())
    }

    async fn ensure_ignored(&self) -> SyncResult<()> {
        if self.options.ignore.is_empty() {
            return Ok(());
        }
        let path = self.vcs.workdir().join(".gitignore");
        let mut current = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let missing: Vec<&str> = self
            .options
            .ignore
            .iter()
            .map(String::as_str)
            .filter(|entry| !current.lines().any(|line| line.trim() == *entry))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        if !current.is_empty() && !current.ends_with('\n') {
            current.push('\n');
        }
        for entry in missing {
            current.push_str(entry);
            current.push('\n');
        }
        tokio::fs::create_dir_all(self.vcs.workdir()).await?;
        tokio::fs::write(&path, current).await?;
        debug!(path = %path.display(), "updated .gitignore");
        Ok(())
    }

    /// The configured remote's name, if the replica has it.
    async fn configured_remote(&self) -> SyncResult<Option<String>> {
        let name = &self.options.remote_name;
        Ok(self.vcs.remote_url(name).await?.map(|_| name.clone()))
    }

    /// Check out `name`, tracking the remote branch when there is one.
    pub async fn ensure_branch(&self, name: &str) -> SyncResult<BranchAlignment> {
        validate_branch_name(name)?;
        let current = self.vcs.current_branch().await?;
        let remote = self.configured_remote().await?;

        let on_remote = match remote.as_deref() {
            None => false,
            Some(r) => match self.vcs.ls_remote(r).await {
                Ok(heads) => heads.iter().any(|h| h == name),
                Err(e) => {
                    warn!(remote = r, error = %e, "remote unreachable, using last fetched refs");
                    self.vcs.remote_branch_ref_exists(r, name).await?
                }
            },
        };

        if let (true, Some(remote)) = (on_remote, remote.as_deref()) {
            if let Err(e) = self.vcs.fetch(remote).await {
                warn!(remote, error = %e, "fetch failed, using last fetched refs");
            }
            let tracking = format!("{remote}/{name}");
            if self.vcs.branch_exists(name).await? {
                if current.as_deref() != Some(name) {
                    self.vcs.checkout(name, false, None).await?;
                }
            } else {
                self.vcs.checkout(name, true, Some(&tracking)).await?;
            }
            self.vcs.set_upstream(name, remote).await?;
            self.rebase_onto(&tracking).await?;
            info!(branch = name, %tracking, "tracking remote branch");
            return Ok(BranchAlignment::Tracking);
        }

        if self.vcs.branch_exists(name).await? {
            if current.as_deref() != Some(name) {
                self.vcs.checkout(name, false, None).await?;
            }
            return Ok(BranchAlignment::LocalOnly);
        }
        if current.as_deref() != Some(name) {
            self.vcs.checkout(name, true, None).await?;
        }
        info!(branch = name, "created unpublished branch");
        Ok(BranchAlignment::Created)
    }

    /// Whether the current branch has upstream tracking.
    pub async fn is_published(&self) -> SyncResult<bool> {
        Ok(matches!(self.publication().await?, Publication::Published { .. }))
    }

    async fn publication(&self) -> SyncResult<Publication> {
        let Some(branch) = self.vcs.current_branch().await? else {
            return Ok(Publication::Skip(SkipReason::DetachedHead));
        };
        if self.configured_remote().await?.is_none() {
            return Ok(Publication::Skip(SkipReason::NoRemote));
        }
        match self.vcs.upstream_of(&branch).await? {
            Some(remote) => Ok(Publication::Published { remote, branch }),
            None => Ok(Publication::Skip(SkipReason::Unpublished)),
        }
    }

    /// Rebase local work onto the remote branch.
    ///
    /// Skipped without any network traffic for local-only replicas and
    /// unpublished branches.
    pub async fn pull(&self) -> SyncResult<PullOutcome> {
        let (remote, branch) = match self.publication().await? {
            Publication::Published { remote, branch } => (remote, branch),
            Publication::Skip(reason) => {
                debug!(?reason, "pull skipped");
                return Ok(PullOutcome::Skipped(reason));
            }
        };
        self.fetch_with_retry(&remote).await?;
        if !self.vcs.remote_branch_ref_exists(&remote, &branch).await? {
            return Ok(PullOutcome::Skipped(SkipReason::RemoteEmpty));
        }
        self.rebase_onto(&format!("{remote}/{branch}")).await?;
        debug!(%remote, %branch, "pulled");
        Ok(PullOutcome::Rebased)
    }

    async fn fetch_with_retry(&self, remote: &str) -> SyncResult<()> {
        let policy = &self.options.pull_retry;
        let mut attempt = 1;
        loop {
            match self.vcs.fetch(remote).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is(VcsErrorKind::Network) && policy.allows_retry(attempt) => {
                    warn!(remote, attempt, error = %e, "fetch failed, retrying");
                    policy.wait(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(SyncError::Pull(e)),
            }
        }
    }

    /// Rebase onto `target`, restoring the pre-rebase state on failure.
    async fn rebase_onto(&self, target: &str) -> SyncResult<()> {
        let Err(e) = self.vcs.rebase(target).await else {
            return Ok(());
        };
        if let Err(abort) = self.vcs.abort_rebase().await {
            debug!(error = %abort, "rebase abort reported an error");
        }
        if e.is(VcsErrorKind::Conflict) {
            warn!(%target, "rebase conflict, aborted");
            Err(SyncError::RebaseConflict { detail: e.message })
        } else {
            Err(SyncError::Pull(e))
        }
    }

    /// Commit the linkage's paths (everything when it names none) and
    /// deliver the branch.
    ///
    /// A failure to commit is [`SyncError::Commit`]; any later error leaves
    /// the commit in place. The push runs even when nothing new was
    /// committed, so commits left behind by an earlier failed push go out
    /// now.
    pub async fn commit_and_push(&self, linkage: &CommitLinkage) -> SyncResult<CommitOutcome> {
        let committed = self
            .vcs
            .commit_paths(&linkage.message(), &linkage.paths)
            .await
            .map_err(SyncError::Commit)?;
        if committed {
            info!(topic = %linkage.topic, key = %linkage.key, "committed");
        } else {
            debug!(topic = %linkage.topic, "nothing to commit");
        }

        let push = match self.publication().await? {
            Publication::Published { remote, branch } => PushStatus::Pushed {
                attempts: self.push_with_retry(&remote, &branch, false).await?,
            },
            Publication::Skip(reason) => {
                debug!(?reason, "push skipped, commit stays local");
                PushStatus::LocalOnly(reason)
            }
        };
        // A rejected push rebases, which rewrites the commit.
        let revision = self.vcs.head_revision().await?;
        Ok(CommitOutcome {
            committed,
            revision,
            push,
        })
    }

    /// Push the current branch with upstream tracking, publishing it along
    /// with every commit made while it was local.
    pub async fn publish(&self) -> SyncResult<PublishOutcome> {
        let branch = self.vcs.current_branch().await?.ok_or_else(|| SyncError::InvalidBranch {
            name: "HEAD".into(),
            reason: "detached HEAD cannot be published".into(),
        })?;
        let remote = self
            .configured_remote()
            .await?
            .ok_or_else(|| SyncError::Unavailable {
                remote: self.options.remote_name.clone(),
                reason: "no remote configured".into(),
            })?;
        let attempts = self.push_with_retry(&remote, &branch, true).await?;
        info!(%remote, %branch, "branch published");
        Ok(PublishOutcome {
            remote,
            branch,
            attempts,
        })
    }

    async fn push_with_retry(&self, remote: &str, branch: &str, set_upstream: bool) -> SyncResult<u32> {
        if let Err(e) = self.vcs.ls_remote(remote).await {
            return Err(SyncError::Unavailable {
                remote: remote.to_string(),
                reason: e.message,
            });
        }
        let policy = &self.options.push_retry;
        let mut attempt = 1;
        loop {
            match self.vcs.push(remote, branch, set_upstream).await {
                Ok(()) => {
                    debug!(remote, branch, attempt, "pushed");
                    return Ok(attempt);
                }
                Err(e) if e.is(VcsErrorKind::NonFastForward) => {
                    if !policy.allows_retry(attempt) {
                        warn!(remote, branch, attempts = attempt, "push rejected, giving up");
                        return Err(SyncError::PushExhausted { attempts: attempt });
                    }
                    warn!(remote, branch, attempt, "push rejected, rebasing onto remote");
                    policy.wait(attempt).await;
                    self.fetch_with_retry(remote).await?;
                    if self.vcs.remote_branch_ref_exists(remote, branch).await? {
                        self.rebase_onto(&format!("{remote}/{branch}")).await?;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(SyncError::Push(e)),
            }
        }
    }
}

/// The branch a fresh replica should start on: the configured one if the
/// remote has it, else `main`, `master`, or the first listed.
fn default_branch<'a>(heads: &'a [String], configured: Option<&str>) -> Option<&'a str> {
    let find = |name: &str| heads.iter().find(|h| h.as_str() == name).map(String::as_str);
    configured
        .and_then(find)
        .or_else(|| find("main"))
        .or_else(|| find("master"))
        .or_else(|| heads.first().map(String::as_str))
}

async fn has_content(dir: &Path) -> io::Result<bool> {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => Ok(entries.next_entry().await?.is_some()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use relay_types::{IdempotencyKey, Topic};
    use tempfile::TempDir;

    use super::*;
    use crate::fake::{FakeHost, ScriptedVcs};
    use crate::provision::ProvisionFailure;

    const URL: &str = "git@host:acme/threads.git";

    struct Fixture {
        _dir: TempDir,
        host: FakeHost,
        vcs: Arc<ScriptedVcs>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let host = FakeHost::new();
            let vcs = Arc::new(ScriptedVcs::with_host(dir.path().join("threads"), host.clone()));
            Self { _dir: dir, host, vcs }
        }

        fn manager(&self, options: SyncOptions) -> SyncManager {
            SyncManager::new(self.vcs.clone(), options.without_backoff())
        }

        fn touch(&self, name: &str, body: &str) {
            let workdir = self.vcs.workdir();
            fs::create_dir_all(workdir).unwrap();
            fs::write(workdir.join(name), body).unwrap();
        }
    }

    fn linkage(summary: &str) -> CommitLinkage {
        CommitLinkage::new(Topic::new("feature-x").unwrap(), IdempotencyKey::new(), summary)
    }

    struct CreateOnHost {
        host: FakeHost,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ProvisionHook for CreateOnHost {
        async fn provision(&self, url: &str) -> Result<(), ProvisionFailure> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.host.create_repo(url);
            Ok(())
        }
    }

    struct Refuse;

    #[async_trait]
    impl ProvisionHook for Refuse {
        async fn provision(&self, _url: &str) -> Result<(), ProvisionFailure> {
            Err(ProvisionFailure {
                message: "exit 1".into(),
                output: "quota exceeded".into(),
            })
        }
    }

    #[tokio::test]
    async fn local_only_bootstrap_makes_no_network_calls() {
        let fx = Fixture::new();
        let m = fx.manager(SyncOptions::default());
        let prepared = m.prepare().await.unwrap();
        assert_eq!(prepared.bootstrap, BootstrapOutcome::Initialized);
        assert_eq!(fx.vcs.network_calls(), 0);
        let ignore = fs::read_to_string(fx.vcs.workdir().join(".gitignore")).unwrap();
        assert!(ignore.lines().any(|l| l == ".relay/"));
    }

    #[tokio::test]
    async fn prepare_runs_once() {
        let fx = Fixture::new();
        let m = fx.manager(SyncOptions::default());
        m.prepare().await.unwrap();
        m.prepare().await.unwrap();
        assert_eq!(fx.vcs.call_count("init"), 1);
    }

    #[tokio::test]
    async fn reachable_remote_is_cloned() {
        let fx = Fixture::new();
        fx.host.create_repo(URL);
        let m = fx.manager(SyncOptions::default().with_remote(URL));
        assert_eq!(m.bootstrap().await.unwrap(), BootstrapOutcome::Cloned);
        assert_eq!(fx.vcs.remote_url("origin").await.unwrap().as_deref(), Some(URL));
    }

    #[tokio::test]
    async fn unreachable_remote_is_unavailable() {
        let fx = Fixture::new();
        fx.vcs.fail_next("ls_remote", VcsErrorKind::Network);
        let m = fx.manager(SyncOptions::default().with_remote(URL));
        assert!(matches!(m.bootstrap().await, Err(SyncError::Unavailable { .. })));
        assert!(!fx.vcs.is_repository().await.unwrap());
    }

    #[tokio::test]
    async fn missing_remote_without_hook_inits_and_attaches() {
        let fx = Fixture::new();
        let m = fx.manager(SyncOptions::default().with_remote(URL));
        assert_eq!(m.bootstrap().await.unwrap(), BootstrapOutcome::Initialized);
        assert_eq!(fx.vcs.remote_url("origin").await.unwrap().as_deref(), Some(URL));
        assert_eq!(fx.vcs.call_count("clone"), 0);
    }

    #[tokio::test]
    async fn missing_remote_is_provisioned_then_cloned() {
        let fx = Fixture::new();
        let hook = Arc::new(CreateOnHost {
            host: fx.host.clone(),
            runs: AtomicUsize::new(0),
        });
        let m = fx
            .manager(SyncOptions::default().with_remote(URL))
            .with_provisioner(hook.clone());
        assert_eq!(m.bootstrap().await.unwrap(), BootstrapOutcome::Provisioned);
        assert_eq!(hook.runs.load(Ordering::SeqCst), 1);
        assert!(fx.host.exists(URL));
    }

    #[tokio::test]
    async fn provisioning_respects_transport_and_switch() {
        let fx = Fixture::new();
        let hook = Arc::new(CreateOnHost {
            host: fx.host.clone(),
            runs: AtomicUsize::new(0),
        });
        let mut options = SyncOptions::default().with_remote(URL);
        options.provision_transports = vec!["https".into()];
        let m = fx.manager(options).with_provisioner(hook.clone());
        assert_eq!(m.bootstrap().await.unwrap(), BootstrapOutcome::Initialized);
        assert_eq!(hook.runs.load(Ordering::SeqCst), 0);

        let fx = Fixture::new();
        let mut options = SyncOptions::default().with_remote(URL);
        options.auto_provision = false;
        let m = fx.manager(options).with_provisioner(hook.clone());
        assert_eq!(m.bootstrap().await.unwrap(), BootstrapOutcome::Initialized);
        assert_eq!(hook.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provisioning_failure_carries_output() {
        let fx = Fixture::new();
        let m = fx
            .manager(SyncOptions::default().with_remote(URL))
            .with_provisioner(Arc::new(Refuse));
        match m.bootstrap().await {
            Err(SyncError::Provision { output, .. }) => assert_eq!(output, "quota exceeded"),
            other => panic!("expected provision error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn in_place_init_adopts_remote_history() {
        let fx = Fixture::new();
        let tip = fx.host.foreign_commit(URL, "main");
        fx.touch("notes.md", "local");
        let m = fx.manager(SyncOptions::default().with_remote(URL));
        assert_eq!(m.bootstrap().await.unwrap(), BootstrapOutcome::Initialized);
        assert_eq!(fx.vcs.call_count("clone"), 0);
        assert_eq!(fx.vcs.head_revision().await.unwrap(), Some(tip));
        assert_eq!(fx.vcs.upstream_of("main").await.unwrap().as_deref(), Some("origin"));

        fx.touch("feature-x.md", "one");
        let out = m.commit_and_push(&linkage("say: one")).await.unwrap();
        assert_eq!(out.push, PushStatus::Pushed { attempts: 1 });
        assert_eq!(fx.host.log(URL, "main").len(), 2);
    }

    #[tokio::test]
    async fn in_place_init_with_unreachable_remote_is_unavailable() {
        let fx = Fixture::new();
        fx.host.foreign_commit(URL, "main");
        fx.touch("notes.md", "local");
        fx.vcs.fail_next("ls_remote", VcsErrorKind::Network);
        let m = fx.manager(SyncOptions::default().with_remote(URL));
        assert!(matches!(m.bootstrap().await, Err(SyncError::Unavailable { .. })));
    }

    #[test]
    fn default_branch_prefers_configured_then_main() {
        let heads = vec!["dev".to_string(), "master".to_string(), "main".to_string()];
        assert_eq!(default_branch(&heads, Some("dev")), Some("dev"));
        assert_eq!(default_branch(&heads, Some("gone")), Some("main"));
        assert_eq!(default_branch(&heads[..2], None), Some("master"));
        assert_eq!(default_branch(&heads[..1], None), Some("dev"));
        assert_eq!(default_branch(&[], None), None);
    }

    #[tokio::test]
    async fn existing_replica_is_reused_and_gets_remote() {
        let fx = Fixture::new();
        fx.vcs.seed_repository("main", None);
        let m = fx.manager(SyncOptions::default().with_remote(URL));
        assert_eq!(m.bootstrap().await.unwrap(), BootstrapOutcome::Reused);
        assert_eq!(fx.vcs.remote_url("origin").await.unwrap().as_deref(), Some(URL));
        assert_eq!(fx.vcs.network_calls(), 0);
    }

    #[tokio::test]
    async fn remote_branch_is_tracked() {
        let fx = Fixture::new();
        fx.host.foreign_commit(URL, "main");
        let tip = fx.host.foreign_commit(URL, "feature/x");
        let m = fx.manager(SyncOptions::default().with_remote(URL).with_branch("feature/x"));
        let prepared = m.prepare().await.unwrap();
        assert_eq!(prepared.alignment, Some(BranchAlignment::Tracking));
        assert_eq!(fx.vcs.current_branch().await.unwrap().as_deref(), Some("feature/x"));
        assert_eq!(fx.vcs.upstream_of("feature/x").await.unwrap().as_deref(), Some("origin"));
        assert_eq!(fx.vcs.head_revision().await.unwrap(), Some(tip));
        assert!(m.is_published().await.unwrap());
    }

    #[tokio::test]
    async fn unknown_branch_is_created_unpublished() {
        let fx = Fixture::new();
        fx.host.foreign_commit(URL, "main");
        let m = fx.manager(SyncOptions::default().with_remote(URL).with_branch("relay/new"));
        let prepared = m.prepare().await.unwrap();
        assert_eq!(prepared.alignment, Some(BranchAlignment::Created));
        assert!(!m.is_published().await.unwrap());
    }

    #[tokio::test]
    async fn local_branch_is_kept() {
        let fx = Fixture::new();
        let m = fx.manager(SyncOptions::default());
        m.bootstrap().await.unwrap();
        fx.touch("a.md", "a");
        fx.vcs.commit_all("a").await.unwrap();
        fx.vcs.checkout("topic", true, None).await.unwrap();
        fx.vcs.checkout("main", false, None).await.unwrap();
        assert_eq!(m.ensure_branch("topic").await.unwrap(), BranchAlignment::LocalOnly);
        assert_eq!(fx.vcs.current_branch().await.unwrap().as_deref(), Some("topic"));
    }

    #[tokio::test]
    async fn invalid_branch_is_rejected() {
        let fx = Fixture::new();
        let m = fx.manager(SyncOptions::default().with_branch("bad..name"));
        assert!(matches!(m.prepare().await, Err(SyncError::InvalidBranch { .. })));
    }

    #[tokio::test]
    async fn pull_skips_without_remote_or_upstream() {
        let fx = Fixture::new();
        let m = fx.manager(SyncOptions::default());
        m.prepare().await.unwrap();
        assert_eq!(m.pull().await.unwrap(), PullOutcome::Skipped(SkipReason::NoRemote));

        let fx = Fixture::new();
        let m = fx.manager(SyncOptions::default().with_remote(URL));
        m.prepare().await.unwrap();
        let before = fx.vcs.network_calls();
        assert_eq!(m.pull().await.unwrap(), PullOutcome::Skipped(SkipReason::Unpublished));
        assert_eq!(fx.vcs.network_calls(), before);
    }

    #[tokio::test]
    async fn pull_of_empty_remote_is_skipped() {
        let fx = Fixture::new();
        fx.host.create_repo(URL);
        let m = fx.manager(SyncOptions::default().with_remote(URL));
        m.prepare().await.unwrap();
        assert_eq!(m.pull().await.unwrap(), PullOutcome::Skipped(SkipReason::RemoteEmpty));
    }

    #[tokio::test]
    async fn fetch_retries_network_errors_only() {
        let fx = Fixture::new();
        fx.host.foreign_commit(URL, "main");
        let m = fx.manager(SyncOptions::default().with_remote(URL));
        m.prepare().await.unwrap();

        fx.vcs.fail_next("fetch", VcsErrorKind::Network);
        assert_eq!(m.pull().await.unwrap(), PullOutcome::Rebased);
        assert_eq!(fx.vcs.call_count("fetch"), 2);

        fx.vcs.fail_next("fetch", VcsErrorKind::Network);
        fx.vcs.fail_next("fetch", VcsErrorKind::Network);
        assert!(matches!(m.pull().await, Err(SyncError::Pull(_))));

        fx.vcs.fail_next("fetch", VcsErrorKind::Auth);
        assert!(matches!(m.pull().await, Err(SyncError::Pull(_))));
        assert_eq!(fx.vcs.call_count("fetch"), 5);
    }

    #[tokio::test]
    async fn rebase_conflict_is_aborted() {
        let fx = Fixture::new();
        fx.host.foreign_commit(URL, "main");
        let m = fx.manager(SyncOptions::default().with_remote(URL));
        m.prepare().await.unwrap();
        fx.vcs.fail_next("rebase", VcsErrorKind::Conflict);
        assert!(matches!(m.pull().await, Err(SyncError::RebaseConflict { .. })));
        assert_eq!(fx.vcs.call_count("abort_rebase"), 1);
    }

    #[tokio::test]
    async fn rejected_push_rebases_and_retries() {
        let fx = Fixture::new();
        fx.host.create_repo(URL);
        let m = fx.manager(SyncOptions::default().with_remote(URL));
        m.prepare().await.unwrap();

        fx.touch("feature-x.md", "one");
        let first = m.commit_and_push(&linkage("say: one")).await.unwrap();
        assert!(first.committed);
        assert_eq!(first.push, PushStatus::Pushed { attempts: 1 });

        fx.host.foreign_commit(URL, "main");
        fx.touch("feature-x.md", "two");
        let second = m.commit_and_push(&linkage("say: two")).await.unwrap();
        assert_eq!(second.push, PushStatus::Pushed { attempts: 2 });
        assert_eq!(fx.host.log(URL, "main"), fx.vcs.log("main"));
        assert_eq!(fx.vcs.log("main").len(), 3);
        assert_eq!(second.revision, fx.host.log(URL, "main").last().cloned());
    }

    #[tokio::test]
    async fn push_gives_up_after_three_attempts() {
        let fx = Fixture::new();
        fx.host.create_repo(URL);
        let m = fx.manager(SyncOptions::default().with_remote(URL));
        m.prepare().await.unwrap();
        for _ in 0..3 {
            fx.vcs.fail_next("push", VcsErrorKind::NonFastForward);
        }
        fx.touch("feature-x.md", "one");
        match m.commit_and_push(&linkage("say: one")).await {
            Err(SyncError::PushExhausted { attempts }) => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(fx.vcs.call_count("push"), 3);
        assert_eq!(fx.vcs.log("main").len(), 1);
        assert!(fx.host.log(URL, "main").is_empty());

        // The next write delivers the stranded commit even with nothing new.
        let retry = m.commit_and_push(&linkage("say: one")).await.unwrap();
        assert!(!retry.committed);
        assert_eq!(retry.push, PushStatus::Pushed { attempts: 1 });
        assert_eq!(fx.host.log(URL, "main").len(), 1);
    }

    #[tokio::test]
    async fn other_push_failures_are_push_errors() {
        let fx = Fixture::new();
        fx.host.create_repo(URL);
        let m = fx.manager(SyncOptions::default().with_remote(URL));
        m.prepare().await.unwrap();
        fx.touch("feature-x.md", "one");
        fx.vcs.fail_next("push", VcsErrorKind::Auth);
        assert!(matches!(m.commit_and_push(&linkage("x")).await, Err(SyncError::Push(_))));

        fx.vcs.fail_next("ls_remote", VcsErrorKind::Network);
        assert!(matches!(
            m.commit_and_push(&linkage("x")).await,
            Err(SyncError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn unpublished_branch_stays_local_until_published() {
        let fx = Fixture::new();
        fx.host.foreign_commit(URL, "main");
        let m = fx.manager(SyncOptions::default().with_remote(URL).with_branch("relay/feature"));
        m.prepare().await.unwrap();
        let before = fx.vcs.network_calls();

        fx.touch("feature-x.md", "one");
        let out = m.commit_and_push(&linkage("say: one")).await.unwrap();
        assert_eq!(out.push, PushStatus::LocalOnly(SkipReason::Unpublished));
        assert_eq!(m.pull().await.unwrap(), PullOutcome::Skipped(SkipReason::Unpublished));
        fx.touch("feature-x.md", "two");
        m.commit_and_push(&linkage("say: two")).await.unwrap();
        assert_eq!(fx.vcs.network_calls(), before);
        assert!(fx.host.log(URL, "relay/feature").is_empty());

        let published = m.publish().await.unwrap();
        assert_eq!(published.branch, "relay/feature");
        assert_eq!(published.attempts, 1);
        assert_eq!(fx.host.log(URL, "relay/feature"), fx.vcs.log("relay/feature"));
        assert_eq!(fx.vcs.log("relay/feature").len(), 3);
        assert!(m.is_published().await.unwrap());
    }

    #[tokio::test]
    async fn publish_without_remote_is_unavailable() {
        let fx = Fixture::new();
        let m = fx.manager(SyncOptions::default());
        m.prepare().await.unwrap();
        assert!(matches!(m.publish().await, Err(SyncError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn commit_failure_is_distinct_and_scoped_commits_skip_other_files() {
        let fx = Fixture::new();
        let m = fx.manager(SyncOptions::default());
        m.prepare().await.unwrap();
        fx.touch("feature-x.md", "one");
        fx.touch("other.md", "stray");
        fx.vcs.fail_next("commit", VcsErrorKind::Other);
        assert!(matches!(m.commit_and_push(&linkage("x")).await, Err(SyncError::Commit(_))));

        let scoped = linkage("say: one").with_paths(vec![PathBuf::from("feature-x.md")]);
        assert!(m.commit_and_push(&scoped).await.unwrap().committed);
        assert!(fx.vcs.has_changes().await.unwrap());
    }

    #[tokio::test]
    async fn commit_message_carries_trailers() {
        let fx = Fixture::new();
        let m = fx.manager(SyncOptions::default());
        m.prepare().await.unwrap();
        fx.touch("feature-x.md", "one");
        let l = linkage("say: Plan v1");
        m.commit_and_push(&l).await.unwrap();
        let msg = fx.vcs.messages().pop().unwrap();
        assert!(msg.starts_with("relay(feature-x): say: Plan v1\n"));
        assert!(msg.contains(&format!("Idempotency-Key: {}", l.key)));
    }
}
