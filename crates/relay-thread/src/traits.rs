//! The [`ThreadStore`] trait defining thread storage.
//!
//! A store only persists documents. It does not lock, sync, or decide how
//! the ball moves; callers hold the topic's advisory lock around a
//! load-modify-save cycle.

use relay_types::Topic;

use crate::error::ThreadResult;
use crate::thread::Thread;

/// Storage backend for threads, keyed by topic.
pub trait ThreadStore: Send + Sync {
    /// Load the thread for `topic`.
    ///
    /// Returns `Ok(None)` if it has never been written.
    fn load(&self, topic: &Topic) -> ThreadResult<Option<Thread>>;

    /// Persist `thread`, replacing any previous version.
    ///
    /// A save is all-or-nothing: readers see either the old or the new
    /// document, never a mix.
    fn save(&self, thread: &Thread) -> ThreadResult<()>;

    /// Delete the thread for `topic`. Returns `false` if there was none.
    fn remove(&self, topic: &Topic) -> ThreadResult<bool>;

    /// Every topic that has a stored thread, sorted.
    fn topics(&self) -> ThreadResult<Vec<Topic>>;

    fn exists(&self, topic: &Topic) -> ThreadResult<bool> {
        Ok(self.load(topic)?.is_some())
    }
}
