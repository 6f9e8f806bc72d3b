//! Per-topic advisory locks for Relay.
//!
//! A lock is a marker file `<dir>/<topic>.lock` holding a JSON
//! [`LockRecord`] (owner pid, acquisition time, TTL). The marker is created
//! with an exclusive create, so at most one live record exists per topic
//! across every process sharing the filesystem. A record whose owner process
//! is gone, or whose TTL has elapsed, may be reclaimed by the next acquirer
//! without waiting.
//!
//! Locks are cooperative: nothing stops a careless process from editing a
//! thread without one.
//!
//! # Modules
//!
//! - [`error`]: [`LockError`] and the [`LockResult`] alias
//! - [`record`]: The on-disk [`LockRecord`] and staleness rules
//! - [`liveness`]: Owner-process liveness check
//! - [`lock`]: [`AdvisoryLock`] and the RAII [`LockGuard`]

pub mod error;
pub mod liveness;
pub mod lock;
pub mod record;

pub use error::{LockError, LockResult};
pub use liveness::process_alive;
pub use lock::{AdvisoryLock, ForceUnlock, LockGuard};
pub use record::{LockRecord, StaleReason};
