//! Foundation types for Relay.
//!
//! Relay threads are append-mostly collaboration documents shared by many
//! independent writers through a git-replicated store. This crate holds the
//! small value types every other Relay crate agrees on.
//!
//! # Key Types
//!
//! - [`Topic`]: Validated slug that names a thread (and its file)
//! - [`AgentId`]: Identity of a writer; the ball is always exactly one of these
//! - [`EntryType`]: Closed set of entry kinds (Note, Plan, Decision, PR, Closure)
//! - [`ThreadStatus`]: Canonical statuses plus free-form custom values
//! - [`IdempotencyKey`]: UUID v7 key generated once per logical write

pub mod agent;
pub mod entry;
pub mod error;
pub mod key;
pub mod status;
pub mod time;
pub mod topic;

pub use agent::AgentId;
pub use entry::EntryType;
pub use error::TypeError;
pub use key::IdempotencyKey;
pub use status::ThreadStatus;
pub use time::{format_timestamp, parse_timestamp, Timestamp};
pub use topic::Topic;
