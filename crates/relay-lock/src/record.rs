use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_types::Topic;
use serde::{Deserialize, Serialize};

/// Contents of a lock marker file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub topic: Topic,
    pub owner_pid: u32,
    pub acquired_at: DateTime<Utc>,
    /// Lifetime in seconds. Zero disables expiry; only owner death frees the lock.
    pub ttl_secs: u64,
}

/// Why a lock record may be reclaimed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StaleReason {
    /// The owning process no longer exists.
    OwnerDead,
    /// `acquired_at + ttl` has passed.
    Expired,
    /// The marker could not be parsed and is older than the TTL.
    Unreadable,
}

impl LockRecord {
    /// A record owned by the current process, acquired now.
    ///
    /// The TTL is kept in whole seconds, rounded up: only an exact zero
    /// disables expiry.
    pub fn new(topic: Topic, ttl: Duration) -> Self {
        Self {
            topic,
            owner_pid: std::process::id(),
            acquired_at: Utc::now(),
            ttl_secs: ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// When the record stops protecting the topic, if it ever does.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.ttl_secs == 0 {
            return None;
        }
        let ttl = chrono::Duration::from_std(self.ttl()).ok()?;
        self.acquired_at.checked_add_signed(ttl)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }

    /// Classify the record given the current time and a liveness check.
    pub fn staleness(&self, now: DateTime<Utc>, alive: impl Fn(u32) -> bool) -> Option<StaleReason> {
        if !alive(self.owner_pid) {
            Some(StaleReason::OwnerDead)
        } else if self.is_expired(now) {
            Some(StaleReason::Expired)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ttl_secs: u64, age_secs: i64) -> LockRecord {
        LockRecord {
            topic: Topic::new("feature-x").unwrap(),
            owner_pid: 42,
            acquired_at: Utc::now() - chrono::Duration::seconds(age_secs),
            ttl_secs,
        }
    }

    #[test]
    fn fresh_record_with_live_owner_is_not_stale() {
        assert_eq!(record(60, 1).staleness(Utc::now(), |_| true), None);
    }

    #[test]
    fn dead_owner_wins_over_ttl() {
        assert_eq!(
            record(60, 1).staleness(Utc::now(), |_| false),
            Some(StaleReason::OwnerDead)
        );
    }

    #[test]
    fn elapsed_ttl_is_stale() {
        assert_eq!(
            record(60, 120).staleness(Utc::now(), |_| true),
            Some(StaleReason::Expired)
        );
    }

    #[test]
    fn zero_ttl_never_expires() {
        let r = record(0, 86_400);
        assert!(r.expires_at().is_none());
        assert_eq!(r.staleness(Utc::now(), |_| true), None);
    }

    #[test]
    fn new_record_belongs_to_this_process() {
        let r = LockRecord::new(Topic::new("t").unwrap(), Duration::from_secs(5));
        assert_eq!(r.owner_pid, std::process::id());
        assert_eq!(r.ttl(), Duration::from_secs(5));
    }

    #[test]
    fn subsecond_ttl_rounds_up() {
        let topic = Topic::new("t").unwrap();
        assert_eq!(LockRecord::new(topic.clone(), Duration::from_millis(250)).ttl_secs, 1);
        assert_eq!(LockRecord::new(topic.clone(), Duration::from_millis(1500)).ttl_secs, 2);
        assert_eq!(LockRecord::new(topic, Duration::ZERO).ttl_secs, 0);
    }

    #[test]
    fn json_roundtrip_keeps_subsecond_precision() {
        let r = LockRecord::new(Topic::new("t").unwrap(), Duration::from_secs(5));
        let json = serde_json::to_string(&r).unwrap();
        let back: LockRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }
}
