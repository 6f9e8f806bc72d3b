//! Every Relay command over one thread replica.
//!
//! A write runs under the process write gate, bootstraps the replica once,
//! takes the topic's advisory lock, pulls, applies one [`Operation`] through
//! the [`BallStateMachine`], saves, commits with linkage trailers and pushes,
//! then notifies the derived index. Commits cover only the topic's own file,
//! and a commit that fails puts the file back as it was. The idempotency key is fixed before any
//! of that starts, so a caller retrying with the same key never appends
//! twice; the replay still commits and pushes, which delivers anything an
//! earlier attempt left behind.

use std::path::PathBuf;
use std::sync::Arc;

use relay_lock::AdvisoryLock;
use relay_sync::{
    CodeContext, CommandProvisionHook, CommitLinkage, CommitOutcome, GitCli, PublishOutcome, SyncError,
    SyncManager, VcsClient,
};
use relay_thread::{
    ApplyOutcome, BallStateMachine, Entry, FileThreadStore, Operation, Thread, ThreadError, ThreadStore,
    ThreadSummary, Transition,
};
use relay_types::{time, AgentId, EntryType, IdempotencyKey, ThreadStatus, Topic};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::index::{DerivedIndex, IndexStatusLog, NoopIndex, REBUILD_KEY};
use crate::registry::{AgentRegistry, StaticRegistry};

/// Serializes writes and pulls: commits stage the whole working tree, and
/// each process owns exactly one.
static WRITE_GATE: Mutex<()> = Mutex::const_new(());

/// An entry to be written.
#[derive(Clone, Debug)]
pub struct Draft {
    pub topic: Topic,
    /// Author as typed; canonicalized by the registry. Falls back to the
    /// configured agent.
    pub agent: Option<String>,
    pub role: String,
    pub entry_type: EntryType,
    pub title: String,
    pub body: String,
    /// Status to set along with the entry.
    pub status: Option<ThreadStatus>,
    /// Title for the thread if this write creates it.
    pub thread_title: Option<String>,
    /// Caller-supplied key for caller-level retries.
    pub key: Option<IdempotencyKey>,
}

impl Draft {
    pub fn new(topic: Topic, body: impl Into<String>) -> Self {
        Self {
            topic,
            agent: None,
            role: String::new(),
            entry_type: EntryType::Note,
            title: String::new(),
            body: body.into(),
            status: None,
            thread_title: None,
            key: None,
        }
    }

    pub fn by(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = entry_type;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_status(mut self, status: ThreadStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_thread_title(mut self, title: impl Into<String>) -> Self {
        self.thread_title = Some(title.into());
        self
    }

    pub fn with_key(mut self, key: IdempotencyKey) -> Self {
        self.key = Some(key);
        self
    }
}

/// What a write did.
#[derive(Clone, Debug, Serialize)]
pub struct WriteReceipt {
    pub topic: Topic,
    pub key: IdempotencyKey,
    pub outcome: ApplyOutcome,
    pub thread: ThreadSummary,
    pub commit: CommitOutcome,
}

/// Which threads [`ThreadService::list`] returns.
#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    /// Also list CLOSED, DONE, MERGED and RESOLVED threads.
    pub include_closed: bool,
    /// Only this status. Overrides `include_closed`.
    pub status: Option<ThreadStatus>,
    /// Only threads whose ball is with this agent.
    pub ball: Option<AgentId>,
    /// Only threads that are NEW for this agent.
    pub new_for: Option<AgentId>,
}

impl ListFilter {
    pub fn matches(&self, thread: &Thread) -> bool {
        let status_ok = match &self.status {
            Some(status) => &thread.status == status,
            None => self.include_closed || !thread.status.is_closed(),
        };
        status_ok
            && self.ball.as_ref().map_or(true, |b| &thread.ball == b)
            && self.new_for.as_ref().map_or(true, |a| thread.is_new_for(a))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnlockReport {
    pub topic: Topic,
    pub removed: bool,
    /// The removed lock's owner was still running.
    pub was_live: bool,
    pub owner_pid: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub threads: usize,
}

/// The Relay command surface.
pub struct ThreadService {
    config: RelayConfig,
    store: Arc<dyn ThreadStore>,
    sync: SyncManager,
    locks: AdvisoryLock,
    registry: Arc<dyn AgentRegistry>,
    index: Arc<dyn DerivedIndex>,
    index_status: IndexStatusLog,
    code: Option<Arc<dyn VcsClient>>,
}

impl ThreadService {
    /// Wire a service from parts. Locks and index status live under the
    /// config's state dir; agents resolve through a [`StaticRegistry`]
    /// unless replaced.
    pub fn new(config: RelayConfig, store: Arc<dyn ThreadStore>, sync: SyncManager) -> RelayResult<Self> {
        config.validate()?;
        let registry = StaticRegistry::from_config(&config)?;
        Ok(Self {
            locks: AdvisoryLock::new(config.lock_dir()).with_poll_interval(config.lock_poll()),
            index_status: IndexStatusLog::new(config.index_status_path()),
            store,
            sync,
            registry: Arc::new(registry),
            index: Arc::new(NoopIndex),
            code: None,
            config,
        })
    }

    /// Production wiring: threads in a git working tree driven by the `git`
    /// binary. Without an explicit branch, the replica follows the code
    /// repository's current branch.
    pub async fn open(config: RelayConfig) -> RelayResult<Self> {
        config.validate()?;
        let mut git = GitCli::new(&config.threads_dir);
        if let Some(key) = &config.ssh_key_path {
            git = git.with_ssh_key(key);
        }
        let code: Option<Arc<dyn VcsClient>> = config
            .code_repo
            .as_ref()
            .map(|path| Arc::new(GitCli::new(path)) as Arc<dyn VcsClient>);

        let mut options = config.sync_options();
        if options.branch.is_none() {
            if let Some(code) = &code {
                options.branch = code.current_branch().await.unwrap_or_else(|e| {
                    debug!(error = %e, "code branch unknown, keeping replica branch");
                    None
                });
            }
        }
        let mut sync = SyncManager::new(Arc::new(git), options);
        if let Some(command) = &config.provision_command {
            sync = sync.with_provisioner(Arc::new(CommandProvisionHook::new(command.clone())));
        }

        let store = Arc::new(FileThreadStore::new(&config.threads_dir));
        let service = Self::new(config, store, sync)?;
        Ok(match code {
            Some(code) => service.with_code_repo(code),
            None => service,
        })
    }

    pub fn with_registry(mut self, registry: Arc<dyn AgentRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_index(mut self, index: Arc<dyn DerivedIndex>) -> Self {
        self.index = index;
        self
    }

    pub fn with_code_repo(mut self, code: Arc<dyn VcsClient>) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_locks(mut self, locks: AdvisoryLock) -> Self {
        self.locks = locks;
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    pub fn locks(&self) -> &AdvisoryLock {
        &self.locks
    }

    pub fn index_status(&self) -> &IndexStatusLog {
        &self.index_status
    }

    /// Canonical id for a user-supplied agent name.
    pub fn resolve_agent(&self, raw: &str) -> RelayResult<AgentId> {
        self.registry.canonicalize(raw)
    }

    /// Append an entry and pass the ball to the author's counterpart.
    pub async fn say(&self, draft: Draft) -> RelayResult<WriteReceipt> {
        let entry = self.entry(&draft)?;
        let summary = summarize("say", &entry);
        let (key, creator) = (entry.id, Creator::of(&draft, &entry));
        let op = Operation::Say {
            status: draft.status,
            entry,
        };
        self.commit_operation(&draft.topic, key, summary, Some(creator), op)
            .await
    }

    /// Append an entry without moving the ball.
    pub async fn ack(&self, draft: Draft) -> RelayResult<WriteReceipt> {
        let entry = self.entry(&draft)?;
        let summary = summarize("ack", &entry);
        let (key, creator) = (entry.id, Creator::of(&draft, &entry));
        let op = Operation::Ack {
            status: draft.status,
            entry,
        };
        self.commit_operation(&draft.topic, key, summary, Some(creator), op)
            .await
    }

    /// Append a note and give the ball to `target`.
    pub async fn handoff(&self, draft: Draft, target: &str) -> RelayResult<WriteReceipt> {
        let target = self.registry.canonicalize(target)?;
        let entry = self.entry(&draft)?;
        let summary = summarize(&format!("handoff to {target}"), &entry);
        let (key, creator) = (entry.id, Creator::of(&draft, &entry));
        self.commit_operation(&draft.topic, key, summary, Some(creator), Operation::Handoff { entry, target })
            .await
    }

    /// Change a thread's status. The thread must exist.
    pub async fn set_status(
        &self,
        topic: &Topic,
        status: ThreadStatus,
        key: Option<IdempotencyKey>,
    ) -> RelayResult<WriteReceipt> {
        let key = key.unwrap_or_else(IdempotencyKey::new);
        let summary = format!("status: {status}");
        self.commit_operation(topic, key, summary, None, Operation::SetStatus { status })
            .await
    }

    /// The thread as of the freshest state reachable. A failed pull falls
    /// back to local state.
    pub async fn read(&self, topic: &Topic) -> RelayResult<Thread> {
        self.refresh().await;
        self.store
            .load(topic)?
            .ok_or_else(|| ThreadError::NotFound(topic.clone()).into())
    }

    /// Summaries of matching threads, most recently updated first.
    pub async fn list(&self, filter: &ListFilter) -> RelayResult<Vec<ThreadSummary>> {
        self.refresh().await;
        let mut rows: Vec<ThreadSummary> = self
            .load_all()?
            .iter()
            .filter(|t| filter.matches(t))
            .map(Thread::summary)
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.topic.cmp(&b.topic)));
        Ok(rows)
    }

    /// Rebuild the derived index from every thread.
    pub async fn reindex(&self) -> RelayResult<ReindexReport> {
        self.refresh().await;
        let threads = self.load_all()?;
        let result = self.index.rebuild(&threads).await;
        self.index_status.record(
            REBUILD_KEY,
            result.as_ref().map(drop).map_err(|e| e.to_string()),
            time::now(),
        );
        result?;
        info!(threads = threads.len(), "derived index rebuilt");
        Ok(ReindexReport {
            threads: threads.len(),
        })
    }

    /// Remove a topic's lock marker. Without `force`, a lock whose owner is
    /// alive is refused.
    pub fn unlock(&self, topic: &Topic, force: bool) -> RelayResult<UnlockReport> {
        if force {
            let removed = self.locks.force_unlock(topic)?;
            return Ok(UnlockReport {
                topic: topic.clone(),
                removed: removed.removed,
                was_live: removed.was_live,
                owner_pid: removed.previous.map(|r| r.owner_pid),
            });
        }
        let previous = self.locks.read_record(topic).ok().flatten();
        let removed = self.locks.unlock(topic)?;
        Ok(UnlockReport {
            topic: topic.clone(),
            removed,
            was_live: false,
            owner_pid: previous.map(|r| r.owner_pid),
        })
    }

    /// Push the current branch with upstream tracking, delivering every
    /// commit made while it was unpublished.
    pub async fn publish(&self) -> RelayResult<PublishOutcome> {
        let _gate = WRITE_GATE.lock().await;
        self.sync.prepare().await?;
        Ok(self.sync.publish().await?)
    }

    fn entry(&self, draft: &Draft) -> RelayResult<Entry> {
        let agent = match draft.agent.as_deref().or(self.config.agent.as_deref()) {
            Some(raw) => self.registry.canonicalize(raw)?,
            None => return Err(RelayError::MissingAgent),
        };
        let entry = Entry::new(agent, &draft.role, draft.entry_type, &draft.title, &draft.body);
        Ok(match draft.key {
            Some(key) => entry.with_id(key),
            None => entry,
        })
    }

    async fn commit_operation(
        &self,
        topic: &Topic,
        key: IdempotencyKey,
        summary: String,
        creator: Option<Creator>,
        op: Operation,
    ) -> RelayResult<WriteReceipt> {
        let op_name = op.name();
        let _gate = WRITE_GATE.lock().await;
        // Bootstrap before the lock: a clone needs an empty directory.
        self.sync.prepare().await?;
        let guard = self
            .locks
            .acquire(topic, self.config.lock_wait(), self.config.lock_ttl())
            .await?;
        let pulled = self.sync.pull().await?;
        debug!(topic = %topic, ?pulled, "replica current");

        let previous = self.store.load(topic)?;
        let Transition { thread, outcome } = self.transition(topic, previous.clone(), creator, op)?;
        if outcome.changed() {
            self.store.save(&thread)?;
        }

        let linkage = CommitLinkage::new(topic.clone(), key, summary)
            .with_paths(vec![PathBuf::from(topic.file_name()), PathBuf::from(".gitignore")])
            .with_code(self.code_context().await)
            .with_spec(self.config.spec_tag.clone());
        let commit = match self.sync.commit_and_push(&linkage).await {
            Ok(commit) => commit,
            Err(e @ SyncError::Commit(_)) => {
                if outcome.changed() {
                    self.roll_back(topic, previous.as_ref());
                }
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        if outcome.changed() {
            self.notify_index(&thread).await;
        }
        guard.release()?;
        info!(topic = %topic, key = %key, op = op_name, ?outcome, ball = %thread.ball, "write complete");

        Ok(WriteReceipt {
            topic: topic.clone(),
            key,
            outcome,
            thread: thread.summary(),
            commit,
        })
    }

    /// Put a thread back the way it was before an uncommitted save.
    fn roll_back(&self, topic: &Topic, previous: Option<&Thread>) {
        let restored = match previous {
            Some(thread) => self.store.save(thread),
            None => self.store.remove(topic).map(drop),
        };
        match restored {
            Ok(()) => warn!(topic = %topic, "commit failed, thread restored"),
            Err(e) => warn!(topic = %topic, error = %e, "commit failed, thread could not be restored"),
        }
    }

    fn transition(
        &self,
        topic: &Topic,
        existing: Option<Thread>,
        creator: Option<Creator>,
        op: Operation,
    ) -> RelayResult<Transition> {
        let registry = Arc::clone(&self.registry);
        let counterparts = move |agent: &AgentId| registry.counterpart_of(agent);
        let machine = BallStateMachine::new(&counterparts);
        let now = time::now();

        let thread = match (existing, creator) {
            (Some(thread), _) => thread,
            (None, Some(creator)) => {
                let default_ball = self
                    .config
                    .default_ball
                    .as_deref()
                    .map(|raw| self.registry.canonicalize(raw))
                    .transpose()?;
                info!(topic = %topic, creator = %creator.agent, "creating thread");
                let thread = machine.initial(topic.clone(), &creator.agent, default_ball.as_ref(), now);
                match creator.title {
                    Some(title) => thread.with_title(title),
                    None => thread,
                }
            }
            (None, None) => return Err(ThreadError::NotFound(topic.clone()).into()),
        };
        Ok(machine.apply(thread, op, now))
    }

    async fn code_context(&self) -> CodeContext {
        match &self.code {
            Some(code) => CodeContext::detect(code.as_ref(), "origin").await,
            None => CodeContext::default(),
        }
    }

    async fn notify_index(&self, thread: &Thread) {
        let result = self
            .index
            .thread_committed(thread)
            .await
            .map_err(|e| e.to_string());
        if let Err(error) = &result {
            warn!(topic = %thread.topic, %error, "derived index update failed");
        }
        self.index_status.record(thread.topic.as_str(), result, time::now());
    }

    /// Best-effort pull ahead of a read.
    async fn refresh(&self) {
        let _gate = WRITE_GATE.lock().await;
        if let Err(e) = self.sync.prepare().await {
            warn!(error = %e, "replica unavailable, reading local state");
            return;
        }
        match self.sync.pull().await {
            Ok(outcome) => debug!(?outcome, "pulled before read"),
            Err(e) => warn!(error = %e, "pull failed, reading local state"),
        }
    }

    fn load_all(&self) -> RelayResult<Vec<Thread>> {
        let mut threads = Vec::new();
        for topic in self.store.topics()? {
            match self.store.load(&topic) {
                Ok(Some(thread)) => threads.push(thread),
                Ok(None) => {}
                Err(e) => warn!(topic = %topic, error = %e, "skipping unreadable thread"),
            }
        }
        Ok(threads)
    }
}

/// Who creates the thread if a write finds none.
struct Creator {
    agent: AgentId,
    title: Option<String>,
}

impl Creator {
    fn of(draft: &Draft, entry: &Entry) -> Self {
        Self {
            agent: entry.agent.clone(),
            title: draft.thread_title.clone(),
        }
    }
}

fn summarize(action: &str, entry: &Entry) -> String {
    if entry.title.is_empty() {
        format!("{action}: {}", entry.entry_type)
    } else {
        format!("{action}: {}", entry.title)
    }
}
