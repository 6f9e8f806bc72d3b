//! Filesystem thread store: one markdown file per topic.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use relay_types::Topic;
use tempfile::NamedTempFile;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::ThreadResult;
use crate::format;
use crate::thread::Thread;
use crate::traits::ThreadStore;

/// Stores each thread as `<dir>/<topic>.md`.
///
/// Saves write a temporary file in the same directory and rename it over
/// the target, so a crash mid-save never leaves a torn document behind.
#[derive(Clone, Debug)]
pub struct FileThreadStore {
    dir: PathBuf,
}

impl FileThreadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, topic: &Topic) -> PathBuf {
        self.dir.join(topic.file_name())
    }
}

impl ThreadStore for FileThreadStore {
    fn load(&self, topic: &Topic) -> ThreadResult<Option<Thread>> {
        let path = self.path_for(topic);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        trace!(path = %path.display(), bytes = text.len(), "loaded thread");
        format::parse(topic, &text).map(Some)
    }

    fn save(&self, thread: &Thread) -> ThreadResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&thread.topic);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(format::render(thread).as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!(
            topic = %thread.topic,
            entries = thread.entries().len(),
            "saved thread"
        );
        Ok(())
    }

    fn remove(&self, topic: &Topic) -> ThreadResult<bool> {
        match fs::remove_file(self.path_for(topic)) {
            Ok(()) => {
                debug!(%topic, "removed thread");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn topics(&self) -> ThreadResult<Vec<Topic>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut topics = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::other("directory walk failed"))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match Topic::new(stem) {
                Ok(topic) => topics.push(topic),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping non-thread file"),
            }
        }
        topics.sort();
        Ok(topics)
    }

    fn exists(&self, topic: &Topic) -> ThreadResult<bool> {
        Ok(self.path_for(topic).is_file())
    }
}
