//! Thread documents for Relay.
//!
//! A thread is an ordered, append-mostly list of entries plus a small header
//! (status, ball owner, timestamps). This crate owns the in-memory model, the
//! on-disk text format, storage backends, and the pure state machine that
//! decides how each operation moves the ball.
//!
//! # Modules
//!
//! - [`error`]: [`ThreadError`] and the [`ThreadResult`] alias
//! - [`thread`]: [`Thread`], [`Entry`], and [`ThreadSummary`]
//! - [`format`]: Parse/render of thread files
//! - [`traits`]: The [`ThreadStore`] storage interface
//! - [`file`]: [`FileThreadStore`], one markdown file per topic, atomic saves
//! - [`memory`]: [`InMemoryThreadStore`] for tests
//! - [`machine`]: [`BallStateMachine`] and the closed [`Operation`] set

pub mod error;
pub mod file;
pub mod format;
pub mod machine;
pub mod memory;
pub mod thread;
pub mod traits;

pub use error::{ThreadError, ThreadResult};
pub use file::FileThreadStore;
pub use machine::{ApplyOutcome, BallStateMachine, Counterpart, Operation, Transition};
pub use memory::InMemoryThreadStore;
pub use thread::{Entry, Thread, ThreadSummary};
pub use traits::ThreadStore;
