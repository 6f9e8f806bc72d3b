//! Layered configuration: defaults, then an optional TOML file, then
//! `RELAY_*` environment variables.
//!
//! The environment is read through a lookup function so tests never touch
//! the process environment. A [`RelayConfig`] is built once and handed to
//! constructors; nothing below the SDK reads configuration on its own.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use relay_sync::{RetryPolicy, SyncOptions, Transport};
use relay_types::AgentId;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

const TRANSPORTS: [Transport; 5] = [
    Transport::Ssh,
    Transport::Https,
    Transport::Http,
    Transport::Git,
    Transport::File,
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Working tree holding one `<topic>.md` per thread.
    pub threads_dir: PathBuf,
    /// Locks and index status. Defaults to `<threads_dir>/.relay`.
    pub state_dir: Option<PathBuf>,
    /// Shared remote. `None` keeps the replica local-only.
    pub remote_url: Option<String>,
    pub remote_name: String,
    /// Thread branch. When unset, follows the code repository's branch.
    pub branch: Option<String>,
    /// Code repository the threads discuss; feeds commit trailers.
    pub code_repo: Option<PathBuf>,
    pub ssh_key_path: Option<PathBuf>,
    pub auto_branch_align: bool,
    pub auto_provision: bool,
    /// Shell command creating a missing remote; `{url}` and `{name}` are
    /// substituted.
    pub provision_command: Option<String>,
    pub provision_transports: Vec<String>,
    /// Lock lifetime; 0 never expires (only a dead owner frees it).
    pub lock_ttl_secs: u64,
    pub lock_wait_secs: u64,
    pub lock_poll_ms: u64,
    pub pull_retries: u32,
    pub push_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Ball owner for new threads instead of the creator's counterpart.
    pub default_ball: Option<String>,
    /// Acting agent when a caller does not name one.
    pub agent: Option<String>,
    /// Symmetric agent pairs, e.g. `claude = "codex"`.
    pub counterparts: BTreeMap<String, String>,
    /// Recorded in the `Spec` commit trailer.
    pub spec_tag: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            threads_dir: PathBuf::from("threads"),
            state_dir: None,
            remote_url: None,
            remote_name: "origin".into(),
            branch: None,
            code_repo: None,
            ssh_key_path: None,
            auto_branch_align: true,
            auto_provision: true,
            provision_command: None,
            provision_transports: vec!["ssh".into(), "https".into()],
            lock_ttl_secs: 300,
            lock_wait_secs: 30,
            lock_poll_ms: 100,
            pull_retries: 2,
            push_retries: 3,
            retry_base_delay_ms: 250,
            retry_max_delay_ms: 4000,
            default_ball: None,
            agent: None,
            counterparts: BTreeMap::new(),
            spec_tag: None,
        }
    }
}

impl RelayConfig {
    /// Defaults, the file at `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Like [`load`](Self::load) with an explicit environment lookup.
    pub fn load_with(path: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Overlay `RELAY_*` variables. Empty values clear optional settings.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        let var = |key: &str| env(key).map(|v| v.trim().to_string());

        if let Some(v) = var("RELAY_THREADS_DIR") {
            self.threads_dir = PathBuf::from(required("RELAY_THREADS_DIR", v)?);
        }
        if let Some(v) = var("RELAY_STATE_DIR") {
            self.state_dir = optional(v).map(PathBuf::from);
        }
        if let Some(v) = var("RELAY_REMOTE_URL") {
            self.remote_url = optional(v);
        }
        if let Some(v) = var("RELAY_REMOTE_NAME") {
            self.remote_name = required("RELAY_REMOTE_NAME", v)?;
        }
        if let Some(v) = var("RELAY_BRANCH") {
            self.branch = optional(v);
        }
        if let Some(v) = var("RELAY_CODE_REPO") {
            self.code_repo = optional(v).map(PathBuf::from);
        }
        if let Some(v) = var("RELAY_SSH_KEY") {
            self.ssh_key_path = optional(v).map(PathBuf::from);
        }
        if let Some(v) = var("RELAY_AUTO_BRANCH") {
            self.auto_branch_align = parse_bool("RELAY_AUTO_BRANCH", &v)?;
        }
        if let Some(v) = var("RELAY_AUTO_PROVISION") {
            self.auto_provision = parse_bool("RELAY_AUTO_PROVISION", &v)?;
        }
        if let Some(v) = var("RELAY_PROVISION_CMD") {
            self.provision_command = optional(v);
        }
        if let Some(v) = var("RELAY_LOCK_TTL_SECS") {
            self.lock_ttl_secs = parse_number("RELAY_LOCK_TTL_SECS", &v)?;
        }
        if let Some(v) = var("RELAY_LOCK_WAIT_SECS") {
            self.lock_wait_secs = parse_number("RELAY_LOCK_WAIT_SECS", &v)?;
        }
        if let Some(v) = var("RELAY_PULL_RETRIES") {
            self.pull_retries = parse_number("RELAY_PULL_RETRIES", &v)?;
        }
        if let Some(v) = var("RELAY_PUSH_RETRIES") {
            self.push_retries = parse_number("RELAY_PUSH_RETRIES", &v)?;
        }
        if let Some(v) = var("RELAY_DEFAULT_BALL") {
            self.default_ball = optional(v);
        }
        if let Some(v) = var("RELAY_AGENT") {
            self.agent = optional(v);
        }
        if let Some(v) = var("RELAY_SPEC") {
            self.spec_tag = optional(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.remote_name.trim().is_empty() || self.remote_name.contains(char::is_whitespace) {
            return Err(ConfigError::invalid("remote_name", &self.remote_name, "must be a single word"));
        }
        if self.pull_retries == 0 {
            return Err(ConfigError::invalid("pull_retries", "0", "at least one attempt is required"));
        }
        if self.push_retries == 0 {
            return Err(ConfigError::invalid("push_retries", "0", "at least one attempt is required"));
        }
        if self.lock_poll_ms == 0 {
            return Err(ConfigError::invalid("lock_poll_ms", "0", "must be positive"));
        }
        for transport in &self.provision_transports {
            if !TRANSPORTS.iter().any(|t| t.as_str().eq_ignore_ascii_case(transport)) {
                return Err(ConfigError::invalid("provision_transports", transport, "unknown transport"));
            }
        }
        check_agent("agent", self.agent.as_deref())?;
        check_agent("default_ball", self.default_ball.as_deref())?;
        for (a, b) in &self.counterparts {
            check_agent("counterparts", Some(a))?;
            check_agent("counterparts", Some(b))?;
        }
        Ok(())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.threads_dir.join(".relay"))
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.state_dir().join("locks")
    }

    pub fn index_status_path(&self) -> PathBuf {
        self.state_dir().join("index-status.json")
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms)
    }

    /// Options for the replica's [`SyncManager`](relay_sync::SyncManager).
    pub fn sync_options(&self) -> SyncOptions {
        let base = Duration::from_millis(self.retry_base_delay_ms);
        let max = Duration::from_millis(self.retry_max_delay_ms);
        let defaults = SyncOptions::default();
        let mut ignore = defaults.ignore;
        if let Some(rel) = self.state_dir_in_tree() {
            if !ignore.contains(&rel) {
                ignore.push(rel);
            }
        }
        SyncOptions {
            remote_name: self.remote_name.clone(),
            remote_url: self.remote_url.clone(),
            branch: self.branch.clone(),
            auto_branch_align: self.auto_branch_align,
            auto_provision: self.auto_provision,
            provision_transports: self.provision_transports.clone(),
            pull_retry: RetryPolicy::new(self.pull_retries, base, max),
            push_retry: RetryPolicy::new(self.push_retries, base, max),
            ignore,
        }
    }

    /// The state dir as a `.gitignore` line, when it sits inside the tree.
    fn state_dir_in_tree(&self) -> Option<String> {
        let state = self.state_dir();
        let rel = state.strip_prefix(&self.threads_dir).ok()?;
        let rel = rel.to_str()?.trim_matches('/');
        (!rel.is_empty()).then(|| format!("{rel}/"))
    }
}

fn required(key: &str, value: String) -> ConfigResult<String> {
    if value.is_empty() {
        return Err(ConfigError::invalid(key, value, "must not be empty"));
    }
    Ok(value)
}

fn optional(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn parse_bool(key: &str, value: &str) -> ConfigResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected true or false")),
    }
}

fn parse_number<T>(key: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, value, e.to_string()))
}

fn agent_id(key: &str, value: Option<&str>) -> ConfigResult<Option<AgentId>> {
    value
        .map(|v| AgentId::new(v).map_err(|e| ConfigError::invalid(key, v, e.to_string())))
        .transpose()
}

fn check_agent(key: &str, value: Option<&str>) -> ConfigResult<()> {
    agent_id(key, value).map(drop)
}
