//! Ball/status state machine.
//!
//! Every mutation of a thread goes through [`BallStateMachine::apply`] with
//! one of the closed set of [`Operation`]s. The machine is pure: it takes a
//! thread and returns the next one, leaving persistence to the caller.

use relay_types::{AgentId, IdempotencyKey, ThreadStatus, Timestamp, Topic};
use serde::Serialize;
use tracing::debug;

use crate::thread::{Entry, Thread};

/// Maps an agent to the agent that answers it.
pub trait Counterpart: Send + Sync {
    fn counterpart_of(&self, agent: &AgentId) -> AgentId;
}

impl<F> Counterpart for F
where
    F: Fn(&AgentId) -> AgentId + Send + Sync,
{
    fn counterpart_of(&self, agent: &AgentId) -> AgentId {
        self(agent)
    }
}

/// A thread mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Append an entry and pass the ball to the author's counterpart.
    Say {
        entry: Entry,
        status: Option<ThreadStatus>,
    },
    /// Append an entry; the ball stays put.
    Ack {
        entry: Entry,
        status: Option<ThreadStatus>,
    },
    /// Append a note and give the ball to `target`.
    Handoff { entry: Entry, target: AgentId },
    /// Header-only status change.
    SetStatus { status: ThreadStatus },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Say { .. } => "say",
            Self::Ack { .. } => "ack",
            Self::Handoff { .. } => "handoff",
            Self::SetStatus { .. } => "status",
        }
    }

    pub fn entry(&self) -> Option<&Entry> {
        match self {
            Self::Say { entry, .. } | Self::Ack { entry, .. } | Self::Handoff { entry, .. } => Some(entry),
            Self::SetStatus { .. } => None,
        }
    }

    /// The key of the carried entry, if any.
    pub fn key(&self) -> Option<IdempotencyKey> {
        self.entry().map(|e| e.id)
    }
}

/// What [`BallStateMachine::apply`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The thread changed.
    Applied,
    /// The entry's key was already present; nothing changed.
    AlreadyApplied,
    /// A status change to the current status; nothing changed.
    Unchanged,
}

impl ApplyOutcome {
    pub fn changed(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Result of applying one operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub thread: Thread,
    pub outcome: ApplyOutcome,
}

/// Applies [`Operation`]s to threads.
pub struct BallStateMachine<'a> {
    counterparts: &'a dyn Counterpart,
}

impl<'a> BallStateMachine<'a> {
    pub fn new(counterparts: &'a dyn Counterpart) -> Self {
        Self { counterparts }
    }

    /// The thread a first write creates: OPEN, with the ball on
    /// `default_ball` if configured, otherwise on the creator's counterpart.
    pub fn initial(
        &self,
        topic: Topic,
        creator: &AgentId,
        default_ball: Option<&AgentId>,
        now: Timestamp,
    ) -> Thread {
        let ball = default_ball
            .cloned()
            .unwrap_or_else(|| self.counterparts.counterpart_of(creator));
        Thread::new(topic, ball, now)
    }

    pub fn apply(&self, mut thread: Thread, op: Operation, now: Timestamp) -> Transition {
        if let Some(key) = op.key() {
            if thread.contains(&key) {
                debug!(topic = %thread.topic, entry_id = %key, op = op.name(), "entry already applied");
                return Transition {
                    thread,
                    outcome: ApplyOutcome::AlreadyApplied,
                };
            }
        }

        match op {
            Operation::Say { entry, status } => {
                thread.ball = self.counterparts.counterpart_of(&entry.agent);
                thread.append(entry);
                if let Some(status) = status {
                    thread.status = status;
                }
            }
            Operation::Ack { entry, status } => {
                thread.append(entry);
                if let Some(status) = status {
                    thread.status = status;
                }
            }
            Operation::Handoff { entry, target } => {
                thread.append(entry);
                thread.ball = target;
            }
            Operation::SetStatus { status } => {
                if thread.status == status {
                    return Transition {
                        thread,
                        outcome: ApplyOutcome::Unchanged,
                    };
                }
                thread.status = status;
            }
        }

        thread.updated_at = now.max(thread.updated_at);
        Transition {
            thread,
            outcome: ApplyOutcome::Applied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use relay_types::{time, EntryType};

    fn agent(name: &str) -> AgentId {
        AgentId::new(name).unwrap()
    }

    /// claude <-> codex, everyone else answers to claude.
    fn pairs(a: &AgentId) -> AgentId {
        match a.as_str() {
            "claude" => agent("codex"),
            _ => agent("claude"),
        }
    }

    fn note(author: &str, title: &str) -> Entry {
        Entry::new(agent(author), "dev", EntryType::Note, title, "")
    }

    fn start() -> Thread {
        Thread::new(Topic::new("feature-x").unwrap(), agent("claude"), time::now())
    }

    #[test]
    fn initial_prefers_configured_default() {
        let m = BallStateMachine::new(&pairs);
        let topic = Topic::new("t").unwrap();
        let t = m.initial(topic.clone(), &agent("claude"), Some(&agent("gemini")), time::now());
        assert_eq!(t.ball, agent("gemini"));
        let t = m.initial(topic, &agent("claude"), None, time::now());
        assert_eq!(t.ball, agent("codex"));
        assert_eq!(t.status, ThreadStatus::Open);
    }

    #[test]
    fn say_passes_ball_to_counterpart_of_author() {
        let m = BallStateMachine::new(&pairs);
        let later = time::now() + Duration::seconds(5);
        let tr = m.apply(start(), Operation::Say { entry: note("claude", "plan"), status: None }, later);
        assert_eq!(tr.outcome, ApplyOutcome::Applied);
        assert_eq!(tr.thread.ball, agent("codex"));
        assert_eq!(tr.thread.updated_at, later);
        assert!(tr.thread.is_new_for(&agent("codex")));
    }

    #[test]
    fn say_sets_status_only_when_given() {
        let m = BallStateMachine::new(&pairs);
        let t = m
            .apply(start(), Operation::Say { entry: note("claude", "a"), status: None }, time::now())
            .thread;
        assert_eq!(t.status, ThreadStatus::Open);
        let t = m
            .apply(
                t,
                Operation::Say { entry: note("codex", "b"), status: Some(ThreadStatus::InReview) },
                time::now(),
            )
            .thread;
        assert_eq!(t.status, ThreadStatus::InReview);
    }

    #[test]
    fn ack_keeps_ball() {
        let m = BallStateMachine::new(&pairs);
        let tr = m.apply(start(), Operation::Ack { entry: note("codex", "ok"), status: None }, time::now());
        assert_eq!(tr.thread.ball, agent("claude"));
        assert_eq!(tr.thread.entries().len(), 1);
    }

    #[test]
    fn handoff_targets_explicit_agent() {
        let m = BallStateMachine::new(&pairs);
        let tr = m.apply(
            start(),
            Operation::Handoff { entry: note("claude", "over to you"), target: agent("gemini") },
            time::now(),
        );
        assert_eq!(tr.thread.ball, agent("gemini"));
    }

    #[test]
    fn set_status_is_header_only() {
        let m = BallStateMachine::new(&pairs);
        let tr = m.apply(start(), Operation::SetStatus { status: ThreadStatus::Done }, time::now());
        assert_eq!(tr.outcome, ApplyOutcome::Applied);
        assert_eq!(tr.thread.status, ThreadStatus::Done);
        assert_eq!(tr.thread.ball, agent("claude"));
        assert!(tr.thread.entries().is_empty());

        let before = tr.thread.clone();
        let again = m.apply(tr.thread, Operation::SetStatus { status: ThreadStatus::Done }, time::now() + Duration::seconds(9));
        assert_eq!(again.outcome, ApplyOutcome::Unchanged);
        assert_eq!(again.thread, before);
    }

    #[test]
    fn replayed_entry_changes_nothing() {
        let m = BallStateMachine::new(&pairs);
        let entry = note("claude", "plan");
        let first = m.apply(start(), Operation::Say { entry: entry.clone(), status: None }, time::now()).thread;
        let replay = m.apply(
            first.clone(),
            Operation::Say { entry, status: Some(ThreadStatus::Closed) },
            time::now() + Duration::seconds(30),
        );
        assert_eq!(replay.outcome, ApplyOutcome::AlreadyApplied);
        assert_eq!(replay.thread, first);
    }

    #[test]
    fn closed_threads_stay_writable() {
        let m = BallStateMachine::new(&pairs);
        let closed = m.apply(start(), Operation::SetStatus { status: ThreadStatus::Closed }, time::now()).thread;
        let tr = m.apply(closed, Operation::Say { entry: note("codex", "one more"), status: None }, time::now());
        assert_eq!(tr.outcome, ApplyOutcome::Applied);
        assert_eq!(tr.thread.status, ThreadStatus::Closed);
    }

    #[test]
    fn feature_x_walkthrough() {
        let m = BallStateMachine::new(&pairs);
        let t = m.initial(Topic::new("feature-x").unwrap(), &agent("claude"), None, time::now());

        let plan = Entry::new(agent("claude"), "planner", EntryType::Plan, "Plan v1", "steps");
        let t = m.apply(t, Operation::Say { entry: plan, status: None }, time::now()).thread;
        assert_eq!(t.ball, agent("codex"));
        assert!(t.is_new_for(&agent("codex")));

        let pr = Entry::new(agent("codex"), "implementer", EntryType::Pr, "PR #12", "");
        let t = m
            .apply(t, Operation::Say { entry: pr, status: Some(ThreadStatus::InReview) }, time::now())
            .thread;
        assert_eq!(t.ball, agent("claude"));
        assert_eq!(t.status, ThreadStatus::InReview);
        assert!(t.is_new_for(&agent("claude")));

        let close = Entry::new(agent("claude"), "planner", EntryType::Closure, "Shipped", "");
        let t = m
            .apply(t, Operation::Ack { entry: close, status: Some(ThreadStatus::Done) }, time::now())
            .thread;
        assert_eq!(t.status, ThreadStatus::Done);
        assert_eq!(t.ball, agent("claude"));
        assert!(!t.is_new());
        assert_eq!(t.entries().len(), 3);
    }

    #[derive(Clone, Debug)]
    enum Step {
        Say(usize),
        Ack(usize),
        Handoff(usize, usize),
        Status(bool),
        Replay,
    }

    const CAST: [&str; 3] = ["claude", "codex", "gemini"];

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0..3usize).prop_map(Step::Say),
            (0..3usize).prop_map(Step::Ack),
            (0..3usize, 0..3usize).prop_map(|(a, b)| Step::Handoff(a, b)),
            any::<bool>().prop_map(Step::Status),
            Just(Step::Replay),
        ]
    }

    proptest! {
        #[test]
        fn ball_follows_the_last_turn_change(steps in proptest::collection::vec(step(), 1..40)) {
            let m = BallStateMachine::new(&pairs);
            let mut thread = start();
            let mut expected_ball = thread.ball.clone();
            let mut expected_entries = 0usize;
            let mut last: Option<Entry> = None;

            for s in steps {
                let op = match s {
                    Step::Say(a) => {
                        let e = note(CAST[a], "say");
                        expected_ball = pairs(&e.agent);
                        expected_entries += 1;
                        last = Some(e.clone());
                        Operation::Say { entry: e, status: None }
                    }
                    Step::Ack(a) => {
                        let e = note(CAST[a], "ack");
                        expected_entries += 1;
                        last = Some(e.clone());
                        Operation::Ack { entry: e, status: None }
                    }
                    Step::Handoff(a, b) => {
                        let e = note(CAST[a], "handoff");
                        expected_ball = agent(CAST[b]);
                        expected_entries += 1;
                        last = Some(e.clone());
                        Operation::Handoff { entry: e, target: agent(CAST[b]) }
                    }
                    Step::Status(closed) => Operation::SetStatus {
                        status: if closed { ThreadStatus::Closed } else { ThreadStatus::Open },
                    },
                    Step::Replay => match &last {
                        Some(e) => Operation::Ack { entry: e.clone(), status: None },
                        None => continue,
                    },
                };
                thread = m.apply(thread, op, time::now()).thread;
                prop_assert_eq!(&thread.ball, &expected_ball);
                prop_assert_eq!(thread.entries().len(), expected_entries);
                prop_assert_eq!(
                    thread.is_new(),
                    thread.last_entry().is_some_and(|e| e.agent != expected_ball)
                );
            }
        }
    }
}
