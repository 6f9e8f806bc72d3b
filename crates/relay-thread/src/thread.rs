use relay_types::{time, AgentId, EntryType, IdempotencyKey, ThreadStatus, Timestamp, Topic};
use serde::{Deserialize, Serialize};

/// A single contribution to a thread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Idempotency key; unique within a thread.
    pub id: IdempotencyKey,
    pub agent: AgentId,
    /// Free-form role of the author (e.g. "planner", "reviewer").
    pub role: String,
    pub entry_type: EntryType,
    pub title: String,
    pub timestamp: Timestamp,
    pub body: String,
}

impl Entry {
    /// A new entry with a fresh key, stamped now.
    ///
    /// Header fields are folded onto one line and trailing whitespace is
    /// stripped from the body, so what is stored is exactly what reads back.
    pub fn new(
        agent: AgentId,
        role: impl AsRef<str>,
        entry_type: EntryType,
        title: impl AsRef<str>,
        body: impl AsRef<str>,
    ) -> Self {
        Self {
            id: IdempotencyKey::new(),
            agent,
            role: one_line(role.as_ref()),
            entry_type,
            title: one_line(title.as_ref()),
            timestamp: time::now(),
            body: body.as_ref().trim_end().to_string(),
        }
    }

    /// Replace the key, typically with one supplied by a retrying caller.
    pub fn with_id(mut self, id: IdempotencyKey) -> Self {
        self.id = id;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }
}

pub(crate) fn one_line(s: &str) -> String {
    s.split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A coordination thread: header plus ordered entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub topic: Topic,
    pub title: String,
    pub status: ThreadStatus,
    /// The agent expected to act next.
    pub ball: AgentId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    entries: Vec<Entry>,
}

impl Thread {
    /// An empty open thread titled after its topic.
    pub fn new(topic: Topic, ball: AgentId, now: Timestamp) -> Self {
        Self {
            title: topic.to_string(),
            topic,
            status: ThreadStatus::Open,
            ball,
            created_at: now,
            updated_at: now,
            entries: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl AsRef<str>) -> Self {
        let title = one_line(title.as_ref());
        if !title.is_empty() {
            self.title = title;
        }
        self
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn last_entry(&self) -> Option<&Entry> {
        self.entries.last()
    }

    pub fn entry(&self, id: &IdempotencyKey) -> Option<&Entry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn contains(&self, id: &IdempotencyKey) -> bool {
        self.entry(id).is_some()
    }

    /// Append an entry unless one with the same key is already present.
    ///
    /// Returns `false` for a duplicate. Timestamps and the ball are left
    /// alone; moving those is the state machine's job.
    pub fn append(&mut self, entry: Entry) -> bool {
        if self.contains(&entry.id) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Whether the last entry came from someone other than the ball owner,
    /// i.e. the owner has something unanswered to look at.
    pub fn is_new(&self) -> bool {
        self.last_entry().is_some_and(|last| last.agent != self.ball)
    }

    /// [`is_new`](Self::is_new), from the point of view of `observer`.
    pub fn is_new_for(&self, observer: &AgentId) -> bool {
        &self.ball == observer && self.is_new()
    }

    pub fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            topic: self.topic.clone(),
            title: self.title.clone(),
            status: self.status.clone(),
            ball: self.ball.clone(),
            updated_at: self.updated_at,
            entries: self.entries.len(),
            is_new: self.is_new(),
        }
    }
}

/// A listing row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub topic: Topic,
    pub title: String,
    pub status: ThreadStatus,
    pub ball: AgentId,
    pub updated_at: Timestamp,
    pub entries: usize,
    pub is_new: bool,
}
