use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::trace;

use crate::error::{VcsError, VcsErrorKind, VcsResult};
use crate::vcs::VcsClient;

/// [`VcsClient`] backed by the `git` command line.
///
/// Every command runs as `git -C <workdir> ...` with terminal prompts
/// disabled, so a missing credential fails fast instead of hanging.
#[derive(Clone, Debug)]
pub struct GitCli {
    program: PathBuf,
    workdir: PathBuf,
    ssh_key: Option<PathBuf>,
    identity: Option<(String, String)>,
}

impl GitCli {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: PathBuf::from("git"),
            workdir: workdir.into(),
            ssh_key: None,
            identity: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Authenticate ssh remotes with this private key only.
    pub fn with_ssh_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.ssh_key = Some(key.into());
        self
    }

    /// Author and committer used for commits, overriding git config.
    pub fn with_identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.identity = Some((name.into(), email.into()));
        self
    }

    /// Whether the git binary can be run at all.
    pub async fn available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .is_ok_and(|out| out.status.success())
    }

    fn command(&self, in_workdir: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        if in_workdir {
            cmd.arg("-C").arg(&self.workdir);
        }
        cmd.env("GIT_TERMINAL_PROMPT", "0").stdin(Stdio::null()).kill_on_drop(true);
        if let Some(key) = &self.ssh_key {
            let mut ssh = OsString::from("ssh -i ");
            ssh.push(key.as_os_str());
            ssh.push(" -o IdentitiesOnly=yes");
            cmd.env("GIT_SSH_COMMAND", ssh);
        }
        if let Some((name, email)) = &self.identity {
            cmd.env("GIT_AUTHOR_NAME", name)
                .env("GIT_AUTHOR_EMAIL", email)
                .env("GIT_COMMITTER_NAME", name)
                .env("GIT_COMMITTER_EMAIL", email);
        }
        cmd
    }

    async fn output(&self, in_workdir: bool, args: &[&str]) -> VcsResult<Output> {
        let label = format!("git {}", args.first().copied().unwrap_or_default());
        trace!(workdir = %self.workdir.display(), ?args, "running git");
        self.command(in_workdir)
            .args(args)
            .output()
            .await
            .map_err(|e| VcsError::new(VcsErrorKind::Other, label, format!("failed to run git: {e}")))
    }

    /// Run a command that must succeed; returns trimmed stdout.
    async fn run(&self, args: &[&str]) -> VcsResult<String> {
        self.run_in(true, args).await
    }

    async fn run_in(&self, in_workdir: bool, args: &[&str]) -> VcsResult<String> {
        let out = self.output(in_workdir, args).await?;
        check(args, &out)?;
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    /// Run a query whose exit code 1 means "no" rather than failure.
    async fn query(&self, args: &[&str]) -> VcsResult<Option<String>> {
        let out = self.output(true, args).await?;
        match out.status.code() {
            Some(0) => Ok(Some(String::from_utf8_lossy(&out.stdout).trim().to_string())),
            Some(1) => Ok(None),
            _ => {
                check(args, &out)?;
                Ok(None)
            }
        }
    }
}

fn as_strs(args: &[String]) -> Vec<&str> {
    args.iter().map(String::as_str).collect()
}

fn check(args: &[&str], out: &Output) -> VcsResult<()> {
    if out.status.success() {
        return Ok(());
    }
    // Rebase reports conflicts on stdout.
    let text = format!(
        "{}\n{}",
        String::from_utf8_lossy(&out.stderr).trim(),
        String::from_utf8_lossy(&out.stdout).trim()
    );
    Err(VcsError::classify(format!("git {}", args.join(" ")), &text))
}

#[async_trait]
impl VcsClient for GitCli {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn is_repository(&self) -> VcsResult<bool> {
        Ok(self.workdir.join(".git").exists())
    }

    async fn init(&self) -> VcsResult<()> {
        tokio::fs::create_dir_all(&self.workdir)
            .await
            .map_err(|e| VcsError::new(VcsErrorKind::Other, "git init", e.to_string()))?;
        self.run(&["init", "--quiet"]).await.map(drop)
    }

    async fn clone_remote(&self, url: &str) -> VcsResult<()> {
        let target = self.workdir.to_string_lossy().into_owned();
        let args = ["clone", "--quiet", url, target.as_str()];
        let out = self.output(false, &args).await?;
        check(&args, &out)
    }

    async fn add_remote(&self, name: &str, url: &str) -> VcsResult<()> {
        self.run(&["remote", "add", name, url]).await.map(drop)
    }

    async fn remote_url(&self, name: &str) -> VcsResult<Option<String>> {
        let key = format!("remote.{name}.url");
        self.query(&["config", "--get", &key]).await
    }

    async fn ls_remote(&self, remote: &str) -> VcsResult<Vec<String>> {
        // `-C` on a missing directory fails before git looks at the remote.
        let in_workdir = self.workdir.is_dir();
        let listing = self.run_in(in_workdir, &["ls-remote", "--heads", remote]).await?;
        Ok(listing
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .filter_map(|r| r.strip_prefix("refs/heads/"))
            .map(str::to_string)
            .collect())
    }

    async fn fetch(&self, remote: &str) -> VcsResult<()> {
        self.run(&["fetch", "--quiet", "--prune", remote]).await.map(drop)
    }

    async fn current_branch(&self) -> VcsResult<Option<String>> {
        self.query(&["symbolic-ref", "--quiet", "--short", "HEAD"]).await
    }

    async fn branch_exists(&self, branch: &str) -> VcsResult<bool> {
        let reference = format!("refs/heads/{branch}");
        Ok(self.query(&["show-ref", "--verify", "--quiet", &reference]).await?.is_some())
    }

    async fn remote_branch_ref_exists(&self, remote: &str, branch: &str) -> VcsResult<bool> {
        let reference = format!("refs/remotes/{remote}/{branch}");
        Ok(self.query(&["show-ref", "--verify", "--quiet", &reference]).await?.is_some())
    }

    async fn checkout(&self, branch: &str, create: bool, start_point: Option<&str>) -> VcsResult<()> {
        let mut args = vec!["checkout", "--quiet"];
        if create {
            args.extend(["-b", branch]);
            args.extend(start_point);
        } else {
            args.push(branch);
        }
        self.run(&args).await.map(drop)
    }

    async fn upstream_of(&self, branch: &str) -> VcsResult<Option<String>> {
        let key = format!("branch.{branch}.remote");
        self.query(&["config", "--get", &key]).await
    }

    async fn set_upstream(&self, branch: &str, remote: &str) -> VcsResult<()> {
        let upstream = format!("--set-upstream-to={remote}/{branch}");
        self.run(&["branch", "--quiet", &upstream, branch]).await.map(drop)
    }

    async fn rebase(&self, onto: &str) -> VcsResult<()> {
        self.run(&["rebase", "--autostash", onto]).await.map(drop)
    }

    async fn abort_rebase(&self) -> VcsResult<()> {
        self.run(&["rebase", "--abort"]).await.map(drop)
    }

    async fn has_changes(&self) -> VcsResult<bool> {
        Ok(!self.run(&["status", "--porcelain"]).await?.is_empty())
    }

    async fn commit_paths(&self, message: &str, paths: &[PathBuf]) -> VcsResult<bool> {
        if paths.is_empty() {
            self.run(&["add", "--all"]).await?;
            if !self.has_changes().await? {
                return Ok(false);
            }
            self.run(&["commit", "--quiet", "--no-verify", "-m", message]).await?;
            return Ok(true);
        }

        // Pathspecs that match nothing make `git add` fail.
        let present: Vec<String> = paths
            .iter()
            .filter(|p| self.workdir.join(p).exists())
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        if present.is_empty() {
            return Ok(false);
        }
        let with_paths = |head: &[&str]| -> Vec<String> {
            head.iter()
                .map(|s| s.to_string())
                .chain(present.iter().cloned())
                .collect()
        };
        let add = with_paths(&["add", "--all", "--"]);
        self.run(&as_strs(&add)).await?;
        let staged = with_paths(&["diff", "--cached", "--quiet", "--"]);
        if self.query(&as_strs(&staged)).await?.is_some() {
            return Ok(false);
        }
        let commit = with_paths(&["commit", "--quiet", "--no-verify", "-m", message, "--"]);
        self.run(&as_strs(&commit)).await?;
        Ok(true)
    }

    async fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> VcsResult<()> {
        let mut args = vec!["push"];
        if set_upstream {
            args.push("--set-upstream");
        }
        args.extend([remote, branch]);
        self.run(&args).await.map(drop)
    }

    async fn head_revision(&self) -> VcsResult<Option<String>> {
        self.query(&["rev-parse", "--verify", "--quiet", "HEAD"]).await
    }
}
