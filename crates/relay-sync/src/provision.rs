//! Creating a missing remote repository on demand.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

/// Transport scheme of a remote URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Ssh,
    Https,
    Http,
    Git,
    File,
}

impl Transport {
    /// Classify a remote URL. Bare paths count as `File`; scp-like
    /// `user@host:path` counts as `Ssh`.
    pub fn of(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("https://") {
            Self::Https
        } else if lower.starts_with("http://") {
            Self::Http
        } else if lower.starts_with("ssh://") || lower.starts_with("git+ssh://") {
            Self::Ssh
        } else if lower.starts_with("git://") {
            Self::Git
        } else if lower.starts_with("file://") || !url.contains(':') || url.starts_with('/') {
            Self::File
        } else {
            Self::Ssh
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Https => "https",
            Self::Http => "http",
            Self::Git => "git",
            Self::File => "file",
        }
    }
}

/// Repository name from a remote URL: last path component without `.git`.
pub fn repo_name(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last)
}

/// A provisioning attempt that did not create the remote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionFailure {
    pub message: String,
    /// Captured stdout and stderr of the hook, if it ran.
    pub output: String,
}

/// Creates a remote repository that does not exist yet.
#[async_trait]
pub trait ProvisionHook: Send + Sync {
    async fn provision(&self, url: &str) -> Result<(), ProvisionFailure>;
}

/// Runs a shell command template, e.g. `gh repo create {name} --private`.
///
/// `{url}` and `{name}` are substituted shell-quoted.
#[derive(Clone, Debug)]
pub struct CommandProvisionHook {
    template: String,
}

impl CommandProvisionHook {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn render(&self, url: &str) -> String {
        self.template
            .replace("{url}", &shell_quote(url))
            .replace("{name}", &shell_quote(repo_name(url)))
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[async_trait]
impl ProvisionHook for CommandProvisionHook {
    async fn provision(&self, url: &str) -> Result<(), ProvisionFailure> {
        let command = self.render(url);
        info!(%url, %command, "provisioning remote");
        let out = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| ProvisionFailure {
                message: format!("could not run provisioning command: {e}"),
                output: String::new(),
            })?;
        let output = format!(
            "{}{}",
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        );
        if out.status.success() {
            Ok(())
        } else {
            warn!(%url, status = ?out.status.code(), "provisioning command failed");
            Err(ProvisionFailure {
                message: format!("provisioning command exited with {}", out.status),
                output: output.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transports() {
        assert_eq!(Transport::of("git@github.com:acme/threads.git"), Transport::Ssh);
        assert_eq!(Transport::of("ssh://git@host/x.git"), Transport::Ssh);
        assert_eq!(Transport::of("https://github.com/acme/threads"), Transport::Https);
        assert_eq!(Transport::of("/srv/git/threads.git"), Transport::File);
        assert_eq!(Transport::of("file:///srv/git/threads.git"), Transport::File);
        assert_eq!(Transport::of("git://host/x"), Transport::Git);
    }

    #[test]
    fn repo_names() {
        assert_eq!(repo_name("git@github.com:acme/threads.git"), "threads");
        assert_eq!(repo_name("https://host/acme/notes/"), "notes");
        assert_eq!(repo_name("git@host:bare.git"), "bare");
    }

    #[test]
    fn template_values_are_quoted() {
        let hook = CommandProvisionHook::new("create {name} --from {url}");
        assert_eq!(
            hook.render("git@host:o'brien.git"),
            r"create 'o'\''brien' --from 'git@host:o'\''brien.git'"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_hook_reports_output() {
        CommandProvisionHook::new("true {url}").provision("x").await.unwrap();
        let failure = CommandProvisionHook::new("echo no such org >&2; exit 3")
            .provision("git@host:a/b.git")
            .await
            .unwrap_err();
        assert_eq!(failure.output, "no such org");
        assert!(failure.message.contains('3'));
    }
}
