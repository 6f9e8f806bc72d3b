//! In-memory thread store for testing and ephemeral use.

use std::collections::BTreeMap;
use std::sync::RwLock;

use relay_types::Topic;

use crate::error::{ThreadError, ThreadResult};
use crate::thread::Thread;
use crate::traits::ThreadStore;

/// An in-memory implementation of [`ThreadStore`].
///
/// Threads live in a `BTreeMap` behind a `RwLock` and are lost on drop.
#[derive(Debug, Default)]
pub struct InMemoryThreadStore {
    threads: RwLock<BTreeMap<Topic, Thread>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.threads.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned(e: impl std::fmt::Display) -> ThreadError {
    ThreadError::Poisoned(e.to_string())
}

impl ThreadStore for InMemoryThreadStore {
    fn load(&self, topic: &Topic) -> ThreadResult<Option<Thread>> {
        let threads = self.threads.read().map_err(poisoned)?;
        Ok(threads.get(topic).cloned())
    }

    fn save(&self, thread: &Thread) -> ThreadResult<()> {
        let mut threads = self.threads.write().map_err(poisoned)?;
        threads.insert(thread.topic.clone(), thread.clone());
        Ok(())
    }

    fn remove(&self, topic: &Topic) -> ThreadResult<bool> {
        let mut threads = self.threads.write().map_err(poisoned)?;
        Ok(threads.remove(topic).is_some())
    }

    fn topics(&self) -> ThreadResult<Vec<Topic>> {
        let threads = self.threads.read().map_err(poisoned)?;
        Ok(threads.keys().cloned().collect())
    }
}
