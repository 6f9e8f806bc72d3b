use thiserror::Error;

/// Broad cause of a failed VCS command, classified from its output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VcsErrorKind {
    /// Host unreachable, DNS failure, timeout.
    Network,
    /// Credentials rejected or missing.
    Auth,
    /// The remote repository does not exist.
    NotFound,
    /// Push rejected because the remote moved ahead.
    NonFastForward,
    /// Content conflict during rebase.
    Conflict,
    Other,
}

/// A failed VCS command.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{command} failed ({kind:?}): {message}")]
pub struct VcsError {
    pub kind: VcsErrorKind,
    pub command: String,
    pub message: String,
}

impl VcsError {
    pub fn new(kind: VcsErrorKind, command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
            message: message.into(),
        }
    }

    /// Build an error from a command's diagnostic output.
    pub fn classify(command: impl Into<String>, stderr: &str) -> Self {
        Self::new(classify_output(stderr), command, stderr.trim())
    }

    pub fn is(&self, kind: VcsErrorKind) -> bool {
        self.kind == kind
    }
}

/// Map git's diagnostic text onto a [`VcsErrorKind`].
pub fn classify_output(stderr: &str) -> VcsErrorKind {
    let text = stderr.to_ascii_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if any(&["non-fast-forward", "fetch first", "[rejected]", "stale info"]) {
        VcsErrorKind::NonFastForward
    } else if any(&["conflict", "could not apply", "unmerged"]) {
        VcsErrorKind::Conflict
    } else if any(&[
        "repository not found",
        "does not appear to be a git repository",
        "not found",
        "does not exist",
    ]) {
        VcsErrorKind::NotFound
    } else if any(&[
        "permission denied",
        "authentication failed",
        "could not read username",
        "access denied",
        "host key verification failed",
        "returned error: 403",
    ]) {
        VcsErrorKind::Auth
    } else if any(&[
        "could not resolve host",
        "connection refused",
        "connection timed out",
        "operation timed out",
        "network is unreachable",
        "unable to access",
        "connection reset",
        "could not read from remote repository",
    ]) {
        VcsErrorKind::Network
    } else {
        VcsErrorKind::Other
    }
}

/// Convenience alias for VCS adapter results.
pub type VcsResult<T> = Result<T, VcsError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote could not be reached (bootstrap or pre-push check).
    #[error("remote {remote} unavailable: {reason}")]
    Unavailable { remote: String, reason: String },

    /// The commit itself failed; nothing was recorded.
    #[error("commit failed: {0}")]
    Commit(VcsError),

    #[error("pull failed: {0}")]
    Pull(VcsError),

    /// Rebase hit a genuine content conflict and was aborted.
    #[error("rebase conflict, manual resolution needed: {detail}")]
    RebaseConflict { detail: String },

    #[error("push failed: {0}")]
    Push(VcsError),

    /// Every push attempt was rejected as non-fast-forward. The local
    /// commit is kept and goes out with the next successful push.
    #[error("push rejected after {attempts} attempts")]
    PushExhausted { attempts: u32 },

    #[error("provisioning {url} failed: {message}\n{output}")]
    Provision {
        url: String,
        message: String,
        output: String,
    },

    #[error("invalid branch name {name:?}: {reason}")]
    InvalidBranch { name: String, reason: String },

    #[error("vcs error: {0}")]
    Vcs(#[from] VcsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_git_failures() {
        let cases = [
            (" ! [rejected]        main -> main (fetch first)", VcsErrorKind::NonFastForward),
            ("error: failed to push some refs\nhint: Updates were rejected because the tip of your current branch is behind (non-fast-forward)", VcsErrorKind::NonFastForward),
            ("CONFLICT (content): Merge conflict in a.md\nerror: could not apply 1a2b3c", VcsErrorKind::Conflict),
            ("fatal: '/tmp/nope' does not appear to be a git repository", VcsErrorKind::NotFound),
            ("remote: Repository not found.\nfatal: repository 'https://x/y.git/' not found", VcsErrorKind::NotFound),
            ("git@host: Permission denied (publickey).", VcsErrorKind::Auth),
            ("fatal: Authentication failed for 'https://x/y.git/'", VcsErrorKind::Auth),
            ("ssh: Could not resolve hostname nohost: Name or service not known\nfatal: Could not read from remote repository.", VcsErrorKind::Network),
            ("fatal: unable to access 'https://x/': Could not resolve host: x", VcsErrorKind::Network),
            ("fatal: something odd", VcsErrorKind::Other),
        ];
        for (stderr, kind) in cases {
            assert_eq!(classify_output(stderr), kind, "{stderr}");
        }
    }

    #[test]
    fn classify_keeps_message() {
        let e = VcsError::classify("git push", "  fatal: nope \n");
        assert_eq!(e.message, "fatal: nope");
        assert_eq!(e.command, "git push");
        assert!(e.is(VcsErrorKind::Other));
    }

    #[test]
    fn vcs_errors_convert() {
        let e: SyncError = VcsError::new(VcsErrorKind::Other, "git status", "boom").into();
        assert!(matches!(e, SyncError::Vcs(_)));
    }
}
