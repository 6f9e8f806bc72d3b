use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use relay_types::Topic;
use tracing::{debug, info, warn};

use crate::error::{LockError, LockResult};
use crate::liveness::process_alive;
use crate::record::{LockRecord, StaleReason};

/// How many create/reclaim rounds a single attempt makes before reporting
/// the lock as busy.
const RECLAIM_ROUNDS: usize = 3;

/// What an acquirer saw when the marker already existed.
enum Observed {
    /// The marker disappeared between the create and the read.
    Vanished,
    /// A live owner holds the lock.
    Live,
    /// The marker may be reclaimed. Carries the raw contents that were judged.
    Stale { raw: String, reason: StaleReason },
}

/// Outcome of [`AdvisoryLock::force_unlock`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForceUnlock {
    /// Whether a marker was removed.
    pub removed: bool,
    /// The record that was removed, if it was readable.
    pub previous: Option<LockRecord>,
    /// Whether the removed lock still had a live owner.
    pub was_live: bool,
}

/// Directory of per-topic lock markers.
#[derive(Clone, Debug)]
pub struct AdvisoryLock {
    dir: PathBuf,
    poll_interval: Duration,
    liveness: fn(u32) -> bool,
}

impl AdvisoryLock {
    /// Lock markers live directly in `dir`, which is created on first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: Duration::from_millis(100),
            liveness: process_alive,
        }
    }

    /// Interval between attempts while a live owner holds the lock.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Replace the owner-liveness check.
    pub fn with_liveness(mut self, liveness: fn(u32) -> bool) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Marker path for a topic.
    pub fn path_for(&self, topic: &Topic) -> PathBuf {
        self.dir.join(format!("{topic}.lock"))
    }

    /// Acquire the lock on `topic`, polling until `wait_timeout` elapses.
    ///
    /// Stale markers are reclaimed immediately; only a live, unexpired owner
    /// makes the caller wait.
    pub async fn acquire(
        &self,
        topic: &Topic,
        wait_timeout: Duration,
        ttl: Duration,
    ) -> LockResult<LockGuard> {
        let started = Instant::now();
        loop {
            if let Some(guard) = self.try_acquire(topic, ttl)? {
                debug!(topic = %topic, waited_ms = started.elapsed().as_millis() as u64, "lock acquired");
                return Ok(guard);
            }

            let waited = started.elapsed();
            if waited >= wait_timeout {
                let holder_pid = self.read_record(topic).ok().flatten().map(|r| r.owner_pid);
                warn!(topic = %topic, ?waited, ?holder_pid, "lock wait timed out");
                return Err(LockError::Timeout {
                    topic: topic.clone(),
                    waited,
                    holder_pid,
                });
            }
            tokio::time::sleep(self.poll_interval.min(wait_timeout - waited)).await;
        }
    }

    /// One non-blocking attempt. Returns `Ok(None)` while a live owner holds
    /// the lock.
    pub fn try_acquire(&self, topic: &Topic, ttl: Duration) -> LockResult<Option<LockGuard>> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(topic);

        for _ in 0..RECLAIM_ROUNDS {
            let record = LockRecord::new(topic.clone(), ttl);
            match create_marker(&path, &record) {
                Ok(()) => {
                    return Ok(Some(LockGuard {
                        path,
                        record,
                        released: false,
                    }))
                }
                Err(LockError::Io(e)) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }

            match self.observe(&path, ttl)? {
                Observed::Vanished => continue,
                Observed::Live => return Ok(None),
                Observed::Stale { raw, reason } => {
                    if reclaim(&path, &raw)? {
                        info!(topic = %topic, ?reason, "reclaimed stale lock");
                    }
                }
            }
        }
        Ok(None)
    }

    /// Read the current record for a topic, if any.
    pub fn read_record(&self, topic: &Topic) -> LockResult<Option<LockRecord>> {
        read_marker(&self.path_for(topic))
    }

    /// Whether the topic is currently held by a live, unexpired owner.
    pub fn is_locked(&self, topic: &Topic) -> LockResult<bool> {
        Ok(match self.read_record(topic)? {
            Some(record) => record.staleness(Utc::now(), self.liveness).is_none(),
            None => false,
        })
    }

    /// Operator override: remove the marker without any liveness or TTL check.
    pub fn force_unlock(&self, topic: &Topic) -> LockResult<ForceUnlock> {
        let path = self.path_for(topic);
        let previous = read_marker(&path).unwrap_or(None);
        let was_live = previous
            .as_ref()
            .is_some_and(|r| r.staleness(Utc::now(), self.liveness).is_none());

        let removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if was_live {
            warn!(topic = %topic, owner_pid = ?previous.as_ref().map(|r| r.owner_pid), "force-unlocked a live lock");
        }
        Ok(ForceUnlock {
            removed,
            previous,
            was_live,
        })
    }

    /// Remove a stale or absent lock. A live lock is refused with
    /// [`LockError::LiveLockOverride`].
    pub fn unlock(&self, topic: &Topic) -> LockResult<bool> {
        let path = self.path_for(topic);
        if let Some(record) = read_marker(&path)? {
            if record.staleness(Utc::now(), self.liveness).is_none() {
                return Err(LockError::LiveLockOverride {
                    topic: topic.clone(),
                    owner_pid: record.owner_pid,
                });
            }
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn observe(&self, path: &Path, ttl: Duration) -> LockResult<Observed> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Observed::Vanished),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<LockRecord>(&raw) {
            Ok(record) => Ok(match record.staleness(Utc::now(), self.liveness) {
                Some(reason) => Observed::Stale { raw, reason },
                None => Observed::Live,
            }),
            Err(_) => {
                // A creator may be between its exclusive create and its write.
                let age = fs::metadata(path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| SystemTime::now().duration_since(t).ok())
                    .unwrap_or_default();
                if age >= ttl {
                    Ok(Observed::Stale {
                        raw,
                        reason: StaleReason::Unreadable,
                    })
                } else {
                    Ok(Observed::Live)
                }
            }
        }
    }
}

/// Scoped ownership of a topic lock. Dropping the guard releases the lock.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    record: LockRecord,
    released: bool,
}

impl LockGuard {
    pub fn topic(&self) -> &Topic {
        &self.record.topic
    }

    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly, surfacing I/O errors that `Drop` would only log.
    pub fn release(mut self) -> LockResult<()> {
        self.released = true;
        release_marker(&self.path, &self.record).map(|_| ())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = release_marker(&self.path, &self.record) {
            warn!(topic = %self.record.topic, error = %e, "failed to release lock");
        }
    }
}

fn create_marker(path: &Path, record: &LockRecord) -> LockResult<()> {
    let payload =
        serde_json::to_vec(record).map_err(|e| LockError::Serialization(e.to_string()))?;
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let written = file.write_all(&payload).and_then(|()| file.sync_all());
    if let Err(e) = written {
        let _ = fs::remove_file(path);
        return Err(e.into());
    }
    Ok(())
}

fn read_marker(path: &Path) -> LockResult<Option<LockRecord>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| LockError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Move a stale marker aside and delete it.
///
/// The rename is atomic, so among racing reclaimers only one moves any given
/// marker. If what was moved is not the marker that was judged stale (a
/// fresh owner won the race in between), it is linked back without
/// clobbering whatever is at the path now.
fn reclaim(path: &Path, judged: &str) -> LockResult<bool> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tombstone = path.with_file_name(format!("{name}.stale-{}-{nanos}", std::process::id()));

    match fs::rename(path, &tombstone) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    }

    let moved = fs::read_to_string(&tombstone).unwrap_or_default();
    if moved != judged {
        match fs::hard_link(&tombstone, path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => warn!(
                path = %path.display(),
                displaced = %moved.trim(),
                "lock taken during reclaim was replaced before it could be restored"
            ),
            Err(e) => warn!(path = %path.display(), error = %e, "could not restore a lock taken during reclaim"),
        }
        let _ = fs::remove_file(&tombstone);
        return Ok(false);
    }

    fs::remove_file(&tombstone)?;
    Ok(true)
}

fn release_marker(path: &Path, record: &LockRecord) -> LockResult<bool> {
    match read_marker(path) {
        Ok(Some(current)) if current == *record => match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        },
        Ok(Some(current)) => {
            warn!(
                topic = %record.topic,
                new_owner = current.owner_pid,
                "lock was reclaimed by another owner; leaving its marker"
            );
            Ok(false)
        }
        Ok(None) => Ok(false),
        Err(e) => Err(e),
    }
}
