//! High-level API for Relay.
//!
//! [`ThreadService`] is the entry point for applications: it wires the
//! advisory locks, the thread store, the ball state machine and the replica
//! sync manager behind the `say` / `ack` / `handoff` / `set_status` / `read`
//! / `list` commands.
//!
//! # Modules
//!
//! - [`config`]: [`RelayConfig`], layered from defaults, TOML and `RELAY_*`
//! - [`registry`]: [`AgentRegistry`] and the configured [`StaticRegistry`]
//! - [`index`]: [`DerivedIndex`] hooks and their status file
//! - [`service`]: [`ThreadService`] and its request/response types

pub mod config;
pub mod error;
pub mod index;
pub mod registry;
pub mod service;

pub use config::RelayConfig;
pub use error::{ConfigError, ConfigResult, RelayError, RelayResult};
pub use index::{DerivedIndex, IndexStatus, IndexStatusLog, NoopIndex};
pub use registry::{AgentRegistry, StaticRegistry};
pub use service::{Draft, ListFilter, ReindexReport, ThreadService, UnlockReport, WriteReceipt};

// Re-export the types callers need to build requests and read results.
pub use relay_sync::{CommitOutcome, PublishOutcome, PushStatus};
pub use relay_thread::{ApplyOutcome, Entry, Thread, ThreadSummary};
pub use relay_types::{format_timestamp, AgentId, EntryType, IdempotencyKey, ThreadStatus, Timestamp, Topic};
