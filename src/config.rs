use anyhow::{anyhow, Context, Result};
use dirs::config_dir;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for forksync
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// GitHub authentication and target repository
    #[serde(default)]
    pub github: GitHubConfig,

    /// Release synchronization settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Workflow polling settings
    #[serde(default)]
    pub poll: PollConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "auto", "gh_cli", "token"

    /// Fork repository as "owner/name" (falls back to GITHUB_REPOSITORY)
    pub repository: Option<String>,

    /// Alternative API endpoint (GitHub Enterprise)
    pub api_url: Option<String>,
}

/// Release synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Working copy of the fork
    #[serde(default = "default_repo_path")]
    pub repo_path: String,

    /// Remote that publishes releases
    #[serde(default = "default_upstream_remote")]
    pub upstream_remote: String,

    /// Remote the sync branch is pushed to
    #[serde(default = "default_push_remote")]
    pub push_remote: String,

    /// Branch pull requests target
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Customization patch, relative to the repository root
    #[serde(default = "default_patch_path")]
    pub patch_path: String,

    /// Prefix for sync branch names
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    /// Only tags matching this regex count as releases
    #[serde(default)]
    pub tag_pattern: Option<String>,

    /// Merge the pull request right after opening it
    #[serde(default)]
    pub auto_merge: bool,

    /// Open a pull request even when there is no patch to apply
    #[serde(default)]
    pub allow_missing_patch: bool,
}

/// Workflow polling configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PollConfig {
    /// Event type used to filter workflow runs
    #[serde(default = "default_poll_event")]
    pub event: String,

    /// Delay before the first check, in seconds
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,

    /// Delay between checks, in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Wall-clock budget for the whole poll, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "pretty"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_auth_method() -> String {
    "auto".to_string()
}
fn default_true() -> bool {
    true
}
fn default_repo_path() -> String {
    ".".to_string()
}
fn default_upstream_remote() -> String {
    "upstream".to_string()
}
fn default_push_remote() -> String {
    "origin".to_string()
}
fn default_base_branch() -> String {
    "main".to_string()
}
fn default_patch_path() -> String {
    ".github/patches/customizations.patch".to_string()
}
fn default_branch_prefix() -> String {
    "sync/".to_string()
}
fn default_poll_event() -> String {
    "repository_dispatch".to_string()
}
fn default_warmup_secs() -> u64 {
    15
}
fn default_interval_secs() -> u64 {
    10
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

// Default implementations
impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            auth_method: default_auth_method(),
            repository: None,
            api_url: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            repo_path: default_repo_path(),
            upstream_remote: default_upstream_remote(),
            push_remote: default_push_remote(),
            base_branch: default_base_branch(),
            patch_path: default_patch_path(),
            branch_prefix: default_branch_prefix(),
            tag_pattern: None,
            auto_merge: false,
            allow_missing_patch: false,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            event: default_poll_event(),
            warmup_secs: default_warmup_secs(),
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, or defaults when there is none
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit path when given, else the default location
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::load_or_default(),
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        // Expand environment variables in paths
        config.expand_paths()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("forksync").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.sync.repo_path = shellexpand::full(&self.sync.repo_path)
            .context("Failed to expand repo_path")?
            .into_owned();

        Ok(())
    }

    /// Reject values that would only fail later, halfway through a sync
    pub fn validate(&self) -> Result<()> {
        if let Some(repository) = &self.github.repository {
            parse_repository(repository)?;
        }

        if let Some(pattern) = &self.sync.tag_pattern {
            Regex::new(pattern)
                .with_context(|| format!("Invalid sync.tag_pattern: {}", pattern))?;
        }

        if self.poll.interval_secs == 0 {
            return Err(anyhow!("poll.interval_secs must be greater than zero"));
        }

        Ok(())
    }

    /// Fork repository from config, falling back to the GITHUB_REPOSITORY variable
    pub fn fork_repository(&self) -> Option<String> {
        self.github
            .repository
            .clone()
            .or_else(|| std::env::var("GITHUB_REPOSITORY").ok())
            .filter(|repo| !repo.is_empty())
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.poll.warmup_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll.timeout_secs)
    }
}

/// Split an "owner/name" repository identifier
pub fn parse_repository(full_name: &str) -> Result<(String, String)> {
    match full_name.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => Err(anyhow!(
            "Invalid repository '{}', expected the form owner/name",
            full_name
        )),
    }
}
