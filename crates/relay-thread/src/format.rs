//! Text format of a thread file.
//!
//! ```text
//! # Feature X
//!
//! Topic: feature-x
//! Status: OPEN
//! Ball: codex
//! Created: 2026-10-17T09:30:00Z
//! Updated: 2026-10-17T09:31:00Z
//!
//! ---
//! Agent: claude
//! Role: planner
//! Type: Plan
//! Title: Plan v1
//! Timestamp: 2026-10-17T09:31:00Z
//!
//! Step one.
//!
//! <!-- Entry-ID: 0192a7c0-... -->
//! ```
//!
//! An entry starts at a `---` line directly followed by `Agent:`, so plain
//! horizontal rules in bodies are left alone. Body lines that would be read
//! back as structure (`Agent:` or an `Entry-ID` marker) are written with one
//! extra leading backslash, and one is stripped on parse.

use std::collections::HashSet;
use std::fmt::Write as _;

use relay_types::{format_timestamp, parse_timestamp, AgentId, EntryType, IdempotencyKey, ThreadStatus, Timestamp, Topic};
use tracing::debug;

use crate::error::{ThreadError, ThreadResult};
use crate::thread::{Entry, Thread};

const DELIMITER: &str = "---";
const AGENT_FIELD: &str = "Agent:";
const MARKER_OPEN: &str = "<!-- Entry-ID:";
const MARKER_CLOSE: &str = "-->";

/// Render a thread to its file contents.
pub fn render(thread: &Thread) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", thread.title);
    out.push('\n');
    let _ = writeln!(out, "Topic: {}", thread.topic);
    let _ = writeln!(out, "Status: {}", thread.status);
    let _ = writeln!(out, "Ball: {}", thread.ball);
    let _ = writeln!(out, "Created: {}", format_timestamp(&thread.created_at));
    let _ = writeln!(out, "Updated: {}", format_timestamp(&thread.updated_at));

    for entry in thread.entries() {
        out.push('\n');
        out.push_str(DELIMITER);
        out.push('\n');
        let _ = writeln!(out, "Agent: {}", entry.agent);
        let _ = writeln!(out, "Role: {}", entry.role);
        let _ = writeln!(out, "Type: {}", entry.entry_type);
        let _ = writeln!(out, "Title: {}", entry.title);
        let _ = writeln!(out, "Timestamp: {}", format_timestamp(&entry.timestamp));
        out.push('\n');
        if !entry.body.is_empty() {
            for line in entry.body.lines() {
                if is_structural(line) {
                    out.push('\\');
                }
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        let _ = writeln!(out, "{MARKER_OPEN} {} {MARKER_CLOSE}", entry.id);
    }
    out
}

/// Parse file contents for `topic`.
///
/// Entries whose key was already seen earlier in the file are dropped; this
/// is how a duplicate left behind by a concurrent rebase is absorbed.
pub fn parse(topic: &Topic, text: &str) -> ThreadResult<Thread> {
    let lines: Vec<&str> = text.lines().collect();
    let starts: Vec<usize> = (0..lines.len())
        .filter(|&i| {
            lines[i].trim_end() == DELIMITER
                && lines.get(i + 1).is_some_and(|next| next.starts_with(AGENT_FIELD))
        })
        .collect();

    let header_end = starts.first().copied().unwrap_or(lines.len());
    let mut thread = parse_header(topic, &lines[..header_end])?;

    let mut seen = HashSet::new();
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(lines.len());
        // +2: skip the delimiter, and line numbers are 1-based.
        let entry = parse_entry(topic, &lines[start + 1..end], start + 2)?;
        if !seen.insert(entry.id) {
            debug!(topic = %topic, entry_id = %entry.id, "dropping duplicate entry");
            continue;
        }
        thread.append(entry);
    }
    Ok(thread)
}

fn parse_header(topic: &Topic, lines: &[&str]) -> ThreadResult<Thread> {
    let mut title = None;
    let mut status = None;
    let mut ball = None;
    let mut created = None;
    let mut updated = None;

    for (idx, raw) in lines.iter().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(text) = line.strip_prefix("# ") {
            if title.is_none() {
                title = Some(text.trim().to_string());
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Topic" => {
                if value != topic.as_str() {
                    return Err(malformed(topic, line_no, format!("header names topic '{value}'")));
                }
            }
            "Status" => status = Some(field(topic, line_no, ThreadStatus::parse(value))?),
            "Ball" => ball = Some(field(topic, line_no, AgentId::new(value))?),
            "Created" => created = Some(timestamp(topic, line_no, value)?),
            "Updated" => updated = Some(timestamp(topic, line_no, value)?),
            _ => {}
        }
    }

    let end = lines.len().max(1);
    let ball = ball.ok_or_else(|| malformed(topic, end, "missing Ball header"))?;
    let created = created.ok_or_else(|| malformed(topic, end, "missing Created header"))?;
    let mut thread = Thread::new(topic.clone(), ball, created);
    thread.status = status.ok_or_else(|| malformed(topic, end, "missing Status header"))?;
    thread.updated_at = updated.unwrap_or(created);
    if let Some(title) = title {
        thread = thread.with_title(title);
    }
    Ok(thread)
}

fn parse_entry(topic: &Topic, lines: &[&str], first_line: usize) -> ThreadResult<Entry> {
    let mut agent = None;
    let mut role = String::new();
    let mut entry_type = None;
    let mut title = String::new();
    let mut stamp = None;

    let mut i = 0;
    while i < lines.len() && !lines[i].trim().is_empty() {
        let line_no = first_line + i;
        if let Some((key, value)) = lines[i].split_once(':') {
            let value = value.trim();
            match key.trim() {
                "Agent" => agent = Some(field(topic, line_no, AgentId::new(value))?),
                "Role" => role = value.to_string(),
                "Type" => entry_type = Some(field(topic, line_no, value.parse::<EntryType>())?),
                "Title" => title = value.to_string(),
                "Timestamp" => stamp = Some(timestamp(topic, line_no, value)?),
                _ => {}
            }
        }
        i += 1;
    }

    let agent = agent.ok_or_else(|| malformed(topic, first_line, "entry without Agent"))?;
    let entry_type = entry_type.ok_or_else(|| malformed(topic, first_line, "entry without Type"))?;
    let stamp = stamp.ok_or_else(|| malformed(topic, first_line, "entry without Timestamp"))?;

    let mut body = if i < lines.len() { &lines[i + 1..] } else { &[][..] };
    body = trim_blank_tail(body);
    let id = body
        .last()
        .and_then(|line| parse_marker(line.trim()))
        .ok_or_else(|| malformed(topic, first_line, "entry without Entry-ID marker"))?;
    body = trim_blank_tail(&body[..body.len() - 1]);

    let body = body.iter().map(|line| unescape(line)).collect::<Vec<_>>().join("\n");
    Ok(Entry {
        id,
        agent,
        role,
        entry_type,
        title,
        timestamp: stamp,
        body,
    })
}

fn trim_blank_tail<'a>(mut lines: &'a [&'a str]) -> &'a [&'a str] {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines = &lines[..lines.len() - 1];
    }
    lines
}

fn parse_marker(line: &str) -> Option<IdempotencyKey> {
    let inner = line.strip_prefix(MARKER_OPEN)?.strip_suffix(MARKER_CLOSE)?;
    inner.trim().parse().ok()
}

fn is_structural(line: &str) -> bool {
    let bare = line.trim_start_matches('\\');
    bare.starts_with(AGENT_FIELD) || bare.starts_with(MARKER_OPEN)
}

fn unescape(line: &str) -> &str {
    if is_structural(line) {
        line.strip_prefix('\\').unwrap_or(line)
    } else {
        line
    }
}

fn timestamp(topic: &Topic, line: usize, value: &str) -> ThreadResult<Timestamp> {
    field(topic, line, parse_timestamp(value))
}

fn field<T, E: std::fmt::Display>(topic: &Topic, line: usize, value: Result<T, E>) -> ThreadResult<T> {
    value.map_err(|e| malformed(topic, line, e.to_string()))
}

fn malformed(topic: &Topic, line: usize, reason: impl Into<String>) -> ThreadError {
    ThreadError::Parse {
        topic: topic.clone(),
        line,
        reason: reason.into(),
    }
}
