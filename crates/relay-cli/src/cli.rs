use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "relay",
    about = "Relay: turn-tracked collaboration threads over git",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML config file; `RELAY_*` variables override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Add an entry and pass the ball to your counterpart
    Say(WriteArgs),
    /// Add an entry and keep the ball where it is
    Ack(WriteArgs),
    /// Add a note and give the ball to another agent
    Handoff(HandoffArgs),
    /// Change a thread's status
    Status(StatusArgs),
    /// Print a thread
    Show(ShowArgs),
    /// List threads
    List(ListArgs),
    /// Rebuild derived indexes
    Reindex(ReindexArgs),
    /// Remove a topic lock
    Unlock(UnlockArgs),
    /// Push the current branch and start tracking it
    Publish(PublishArgs),
}

#[derive(Args)]
pub struct WriteArgs {
    pub topic: String,
    /// Entry body; read from stdin when omitted
    #[arg(short, long)]
    pub message: Option<String>,
    #[arg(long)]
    pub agent: Option<String>,
    #[arg(long, default_value = "")]
    pub role: String,
    #[arg(short = 't', long = "type", default_value = "note")]
    pub entry_type: String,
    #[arg(long, default_value = "")]
    pub title: String,
    #[arg(long)]
    pub status: Option<String>,
    /// Title for the thread if this entry creates it
    #[arg(long)]
    pub thread_title: Option<String>,
    /// Idempotency key to reuse when retrying a write
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(Args)]
pub struct HandoffArgs {
    #[command(flatten)]
    pub write: WriteArgs,
    #[arg(long)]
    pub to: String,
}

#[derive(Args)]
pub struct StatusArgs {
    pub topic: String,
    pub status: String,
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(Args)]
pub struct ShowArgs {
    pub topic: String,
    /// Agent whose NEW marker to show (defaults to the configured agent)
    #[arg(long = "for")]
    pub observer: Option<String>,
}

#[derive(Args)]
pub struct ListArgs {
    /// Include closed threads
    #[arg(short, long)]
    pub all: bool,
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub ball: Option<String>,
    /// Only threads waiting on this agent with unread entries
    #[arg(long)]
    pub new_for: Option<String>,
}

#[derive(Args)]
pub struct ReindexArgs {}

#[derive(Args)]
pub struct UnlockArgs {
    pub topic: String,
    /// Remove the lock even if its owner is alive
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct PublishArgs {}
