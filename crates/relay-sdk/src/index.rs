//! Hooks for derived views (search, graphs, HTML) built from threads.
//!
//! Index maintenance is best-effort: a failure after a write is logged and
//! recorded in `index-status.json` under the state dir, never surfaced as a
//! write failure.

use std::collections::BTreeMap;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use relay_thread::Thread;
use relay_types::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RelayResult;

/// Key under which full rebuilds are recorded.
pub const REBUILD_KEY: &str = "*";

#[async_trait]
pub trait DerivedIndex: Send + Sync {
    /// Called after a write to `thread` was committed.
    async fn thread_committed(&self, thread: &Thread) -> RelayResult<()>;

    /// Rebuild from every thread.
    async fn rebuild(&self, threads: &[Thread]) -> RelayResult<()>;
}

/// Index that keeps nothing.
pub struct NoopIndex;

#[async_trait]
impl DerivedIndex for NoopIndex {
    async fn thread_committed(&self, _thread: &Thread) -> RelayResult<()> {
        Ok(())
    }

    async fn rebuild(&self, _threads: &[Thread]) -> RelayResult<()> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub ok: bool,
    pub error: Option<String>,
    pub updated_at: Timestamp,
}

/// The `index-status.json` file: one [`IndexStatus`] per topic.
#[derive(Clone, Debug)]
pub struct IndexStatusLog {
    path: PathBuf,
}

impl IndexStatusLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every recorded status. A missing or unreadable file reads as empty.
    pub fn read(&self) -> BTreeMap<String, IndexStatus> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(path = %self.path.display(), error = %e, "index status unreadable");
                }
                return BTreeMap::new();
            }
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "index status corrupt, starting over");
            BTreeMap::new()
        })
    }

    pub fn get(&self, key: &str) -> Option<IndexStatus> {
        self.read().remove(key)
    }

    /// Record the outcome for `key`. Failing to record is only logged.
    pub fn record(&self, key: &str, outcome: Result<(), String>, now: Timestamp) {
        let mut all = self.read();
        let status = match outcome {
            Ok(()) => IndexStatus {
                ok: true,
                error: None,
                updated_at: now,
            },
            Err(error) => IndexStatus {
                ok: false,
                error: Some(error),
                updated_at: now,
            },
        };
        all.insert(key.to_string(), status);
        if let Err(e) = self.write(&all) {
            warn!(path = %self.path.display(), error = %e, "failed to record index status");
        }
    }

    fn write(&self, all: &BTreeMap<String, IndexStatus>) -> io::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let payload = serde_json::to_vec_pretty(all).map_err(io::Error::other)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&payload)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
