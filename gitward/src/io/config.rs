//! Configuration stored in `.gitward.toml` at the repository root.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::classifier::DEFAULT_IGNORE_PATTERNS;
use crate::core::policy::Policy;
use crate::core::retry::RetryPolicy;

pub const CONFIG_FILE: &str = ".gitward.toml";

static REF_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._/-]+$").expect("ref name regex"));

/// Gitward configuration (TOML).
///
/// Loaded once at startup and never mutated afterwards. Missing fields default
/// to the values documented on each section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitwardConfig {
    pub policy: Policy,
    pub repository: RepositoryConfig,
    pub retry: RetryPolicy,
    pub timeouts: Timeouts,
    pub pr: PrConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepositoryConfig {
    pub remote: String,
    /// Branch feature branches start from and pull requests target.
    pub base_branch: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            base_branch: "main".to_string(),
        }
    }
}

impl RepositoryConfig {
    /// `<remote>/<base_branch>`.
    pub fn base_ref(&self) -> String {
        format!("{}/{}", self.remote, self.base_branch)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    /// Upper bound for fetch, push and PR API calls.
    pub network_secs: u64,
    /// Upper bound for local git commands.
    pub local_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            network_secs: 120,
            local_secs: 30,
        }
    }
}

impl Timeouts {
    pub fn network(&self) -> Duration {
        Duration::from_secs(self.network_secs)
    }

    pub fn local(&self) -> Duration {
        Duration::from_secs(self.local_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PrConfig {
    /// Labels added to every pull request, after the change type label.
    pub labels: Vec<String>,
    pub draft: bool,
}

impl Default for PrConfig {
    fn default() -> Self {
        Self {
            labels: vec!["automated".to_string()],
            draft: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Directories to watch, relative to the repository root.
    pub watch_dirs: Vec<PathBuf>,
    pub debounce_ms: u64,
    pub queue_capacity: usize,
    /// Top-level directories whose changes count as documentation.
    pub docs_dirs: Vec<String>,
    pub ignore_patterns: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            watch_dirs: vec![PathBuf::from(".")],
            debounce_ms: 3_000,
            queue_capacity: 32,
            docs_dirs: vec!["docs".to_string()],
            ignore_patterns: DEFAULT_IGNORE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl AgentConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl GitwardConfig {
    pub fn validate(&self) -> Result<()> {
        if self.policy.protected_branches().is_empty() {
            return Err(anyhow!("policy.protected_branches must not be empty"));
        }
        for name in self.policy.protected_branches() {
            if !REF_NAME_RE.is_match(name) {
                return Err(anyhow!(
                    "policy.protected_branches contains an invalid branch name '{name}'"
                ));
            }
        }
        if self.policy.allowed_prefixes().is_empty() {
            return Err(anyhow!("policy.allowed_prefixes must not be empty"));
        }
        if !REF_NAME_RE.is_match(&self.repository.remote) || self.repository.remote.contains('/')
        {
            return Err(anyhow!("repository.remote must be a plain remote name"));
        }
        if !REF_NAME_RE.is_match(&self.repository.base_branch) {
            return Err(anyhow!("repository.base_branch must be a valid branch name"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.retry.multiplier == 0 {
            return Err(anyhow!("retry.multiplier must be > 0"));
        }
        if self.timeouts.network_secs == 0 || self.timeouts.local_secs == 0 {
            return Err(anyhow!("timeouts must be > 0"));
        }
        if self.agent.queue_capacity == 0 {
            return Err(anyhow!("agent.queue_capacity must be > 0"));
        }
        if self.agent.watch_dirs.is_empty() {
            return Err(anyhow!("agent.watch_dirs must not be empty"));
        }
        Ok(())
    }
}

/// Resolve the config path: explicit flag, else `<repo>/.gitward.toml`.
pub fn config_path(repo_root: &Path, explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => repo_root.join(CONFIG_FILE),
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GitwardConfig::default()`.
pub fn load_config(path: &Path) -> Result<GitwardConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = GitwardConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GitwardConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    debug!(path = %path.display(), "config loaded");
    Ok(cfg)
}
