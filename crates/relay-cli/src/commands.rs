use std::io::Read;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use relay_sdk::{
    format_timestamp, ApplyOutcome, Draft, EntryType, IdempotencyKey, ListFilter, PushStatus,
    RelayConfig, Thread, ThreadService, ThreadStatus, ThreadSummary, Topic, UnlockReport, WriteReceipt,
};

use crate::cli::{Cli, Command, HandoffArgs, ListArgs, OutputFormat, ShowArgs, StatusArgs, UnlockArgs, WriteArgs};

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = RelayConfig::load(cli.config.as_deref()).context("loading configuration")?;
    tracing::debug!(threads_dir = ?config.threads_dir, remote = ?config.remote_url, "opening relay");
    let service = ThreadService::open(config).await?;
    let format = cli.format;

    match cli.command {
        Command::Say(args) => {
            let receipt = service.say(draft(args)?).await?;
            print_receipt("say", &receipt, format)
        }
        Command::Ack(args) => {
            let receipt = service.ack(draft(args)?).await?;
            print_receipt("ack", &receipt, format)
        }
        Command::Handoff(HandoffArgs { write, to }) => {
            let receipt = service.handoff(draft(write)?, &to).await?;
            print_receipt("handoff", &receipt, format)
        }
        Command::Status(args) => cmd_status(&service, args, format).await,
        Command::Show(args) => cmd_show(&service, args, format).await,
        Command::List(args) => cmd_list(&service, args, format).await,
        Command::Reindex(_) => {
            let report = service.reindex().await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => {
                    println!("{} Reindexed {} thread(s)", "✓".green().bold(), report.threads)
                }
            }
            Ok(())
        }
        Command::Unlock(args) => cmd_unlock(&service, args, format),
        Command::Publish(_) => {
            let outcome = service.publish().await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
                OutputFormat::Text => println!(
                    "{} Published {} to {} ({} attempt(s))",
                    "✓".green().bold(),
                    outcome.branch.cyan(),
                    outcome.remote,
                    outcome.attempts
                ),
            }
            Ok(())
        }
    }
}

fn draft(args: WriteArgs) -> Result<Draft> {
    let topic = Topic::new(args.topic)?;
    let body = match args.message {
        Some(message) => message,
        None => read_stdin()?,
    };
    let mut draft = Draft::new(topic, body)
        .with_role(args.role)
        .with_type(args.entry_type.parse::<EntryType>()?)
        .with_title(args.title);
    if let Some(agent) = args.agent {
        draft = draft.by(agent);
    }
    if let Some(status) = args.status {
        draft = draft.with_status(ThreadStatus::parse(&status)?);
    }
    if let Some(title) = args.thread_title {
        draft = draft.with_thread_title(title);
    }
    if let Some(key) = args.key {
        draft = draft.with_key(parse_key(&key)?);
    }
    Ok(draft)
}

fn parse_key(raw: &str) -> Result<IdempotencyKey> {
    raw.parse::<IdempotencyKey>()
        .map_err(|_| anyhow::anyhow!("invalid idempotency key: {raw}"))
}

fn read_stdin() -> Result<String> {
    let mut body = String::new();
    std::io::stdin()
        .read_to_string(&mut body)
        .context("reading entry body from stdin")?;
    if body.trim().is_empty() {
        bail!("empty message: pass -m or pipe a body on stdin");
    }
    Ok(body)
}

async fn cmd_status(service: &ThreadService, args: StatusArgs, format: OutputFormat) -> Result<()> {
    let topic = Topic::new(args.topic)?;
    let status = ThreadStatus::parse(&args.status)?;
    let key = args.key.as_deref().map(parse_key).transpose()?;
    let receipt = service.set_status(&topic, status, key).await?;
    print_receipt("status", &receipt, format)
}

async fn cmd_show(service: &ThreadService, args: ShowArgs, format: OutputFormat) -> Result<()> {
    let topic = Topic::new(args.topic)?;
    let thread = service.read(&topic).await?;
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&thread)?);
        return Ok(());
    }

    let observer = match args.observer.or_else(|| service.config().agent.clone()) {
        Some(raw) => Some(service.resolve_agent(&raw)?),
        None => None,
    };
    let marker = match &observer {
        Some(agent) if thread.is_new_for(agent) => format!(" {}", "NEW".yellow().bold()),
        Some(_) => String::new(),
        None if thread.is_new() => format!(" {}", "NEW".yellow().bold()),
        None => String::new(),
    };
    print_thread(&thread, &marker);
    Ok(())
}

fn print_thread(thread: &Thread, marker: &str) {
    let title = if thread.title.is_empty() { thread.topic.as_str() } else { thread.title.as_str() };
    println!("{}{}", title.bold(), marker);
    println!("  Topic:   {}", thread.topic.as_str().cyan());
    println!("  Status:  {}", status_label(&thread.status));
    println!("  Ball:    {}", thread.ball.as_str().cyan());
    println!("  Updated: {}", format_timestamp(&thread.updated_at));
    for entry in thread.entries() {
        println!();
        let heading = if entry.title.is_empty() {
            entry.entry_type.to_string()
        } else {
            format!("{}: {}", entry.entry_type, entry.title)
        };
        let role = if entry.role.is_empty() { String::new() } else { format!(" ({})", entry.role) };
        println!(
            "{} {}{} {}",
            "●".cyan(),
            entry.agent.as_str().bold(),
            role,
            format_timestamp(&entry.timestamp).dimmed()
        );
        println!("  {}", heading.bold());
        for line in entry.body.lines() {
            println!("  {line}");
        }
    }
}

async fn cmd_list(service: &ThreadService, args: ListArgs, format: OutputFormat) -> Result<()> {
    let filter = ListFilter {
        include_closed: args.all,
        status: args.status.as_deref().map(ThreadStatus::parse).transpose()?,
        ball: args.ball.as_deref().map(|raw| service.resolve_agent(raw)).transpose()?,
        new_for: args.new_for.as_deref().map(|raw| service.resolve_agent(raw)).transpose()?,
    };
    let threads = service.list(&filter).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&threads)?),
        OutputFormat::Text => {
            if threads.is_empty() {
                println!("No threads");
            }
            for summary in &threads {
                print_summary(summary);
            }
        }
    }
    Ok(())
}

fn print_summary(summary: &ThreadSummary) {
    let marker = if summary.is_new { "NEW".yellow().bold().to_string() } else { "   ".to_string() };
    println!(
        "{} {:<32} {:<12} {:<10} {:>3}  {}",
        marker,
        summary.topic.as_str().cyan(),
        status_label(&summary.status),
        summary.ball.as_str(),
        summary.entries,
        format_timestamp(&summary.updated_at).dimmed()
    );
}

fn status_label(status: &ThreadStatus) -> String {
    if status.is_closed() {
        status.to_string().dimmed().to_string()
    } else {
        status.to_string().green().to_string()
    }
}

fn cmd_unlock(service: &ThreadService, args: UnlockArgs, format: OutputFormat) -> Result<()> {
    let topic = Topic::new(args.topic)?;
    let report = service.unlock(&topic, args.force)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text if report.removed => println!("{} {}", "✓".green().bold(), unlock_summary(&report)),
        OutputFormat::Text => println!("{}", unlock_summary(&report)),
    }
    Ok(())
}

/// A live lock only reaches here with `--force`; without it the service
/// refuses with an error naming the owner.
fn unlock_summary(report: &UnlockReport) -> String {
    let topic = report.topic.as_str();
    match (report.removed, report.was_live, report.owner_pid) {
        (true, true, Some(pid)) => format!("Removed live lock on {topic} held by pid {pid}"),
        (true, _, _) => format!("Removed lock on {topic}"),
        (false, _, _) => format!("No lock on {topic}"),
    }
}

fn print_receipt(action: &str, receipt: &WriteReceipt, format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(receipt)?);
        return Ok(());
    }
    let topic = receipt.topic.as_str().cyan();
    match receipt.outcome {
        ApplyOutcome::Applied => println!("{} {} {}", "✓".green().bold(), action, topic),
        ApplyOutcome::AlreadyApplied => println!(
            "{} {} {} already applied (key {})",
            "✓".green(),
            action,
            topic,
            receipt.key.short_id()
        ),
        ApplyOutcome::Unchanged => println!("{} {} {} unchanged", "✓".green(), action, topic),
    }
    println!(
        "  Ball: {}  Status: {}  Entries: {}",
        receipt.thread.ball.as_str().cyan(),
        status_label(&receipt.thread.status),
        receipt.thread.entries
    );
    match receipt.commit.push {
        PushStatus::Pushed { attempts } => {
            let rev = receipt.commit.revision.as_deref().unwrap_or("-");
            println!("  Pushed {} ({} attempt(s))", rev, attempts);
        }
        PushStatus::LocalOnly(reason) => {
            println!("  {} committed locally ({:?})", "!".yellow(), reason);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(removed: bool, was_live: bool, owner_pid: Option<u32>) -> UnlockReport {
        UnlockReport {
            topic: Topic::new("feature-x").unwrap(),
            removed,
            was_live,
            owner_pid,
        }
    }

    #[test]
    fn unlock_summaries() {
        assert_eq!(
            unlock_summary(&report(true, true, Some(42))),
            "Removed live lock on feature-x held by pid 42"
        );
        assert_eq!(unlock_summary(&report(true, false, Some(42))), "Removed lock on feature-x");
        assert_eq!(unlock_summary(&report(false, false, None)), "No lock on feature-x");
    }

    #[test]
    fn keys_must_be_uuids() {
        assert!(parse_key("not-a-key").is_err());
        let key = IdempotencyKey::new();
        assert_eq!(parse_key(&key.to_string()).unwrap(), key);
    }
}
