use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Idempotency key for one logical write (UUID v7 for time-ordering).
///
/// Generated once when a write starts and reused by every retry of that
/// write. The key doubles as the entry id, so it is unique within a thread
/// and, by construction, globally. The hyphenated lowercase form sorts in
/// generation order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdempotencyKey(uuid::Uuid);

impl IdempotencyKey {
    /// Generate a new time-ordered key.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Short representation (first 8 characters).
    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for IdempotencyKey {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for IdempotencyKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| TypeError::InvalidKey(e.to_string()))
    }
}

impl fmt::Debug for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdempotencyKey({})", self.short_id())
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
