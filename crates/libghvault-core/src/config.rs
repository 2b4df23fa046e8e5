//! Configuration loaded from `config.toml`
//!
//! Loaded once at startup into an immutable value passed to every
//! component. Token auth mode names an environment variable; the token
//! itself is read at the transport edge and never stored here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::event::EventType;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory holding `<account>/<repo>/` backup trees
    #[serde(default = "default_backup_root")]
    pub backup_root: PathBuf,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// Engine tunables, all optional in the file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Snapshots older than this are pruned after successful commits
    pub retention_days: u32,
    pub git_timeout_secs: u64,
    pub api_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub backoff_max_ms: u64,
    /// Wait for quota reset when remaining calls drop below this
    pub rate_limit_threshold: u64,
    pub rate_limit_max_wait_secs: u64,
    /// Bounded worker pool size for backup-all (1 = sequential)
    pub workers: usize,
    /// Upper bound on items fetched per metadata category
    pub page_limit: u32,
    /// Path to the gh binary
    pub gh_path: String,
    /// Webhook event types the engine accepts; empty = accept all
    pub allowed_events: Vec<EventType>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retention_days: 30,
            git_timeout_secs: 600,
            api_timeout_secs: 120,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_factor: 2.0,
            backoff_max_ms: 60_000,
            rate_limit_threshold: 10,
            rate_limit_max_wait_secs: 90,
            workers: 1,
            page_limit: 1000,
            gh_path: "gh".to_string(),
            allowed_events: Vec::new(),
        }
    }
}

impl Settings {
    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn rate_limit_max_wait(&self) -> Duration {
        Duration::from_secs(self.rate_limit_max_wait_secs)
    }

    /// Manual runs are always allowed; webhook events must be listed
    /// unless the list is empty.
    pub fn event_allowed(&self, event: EventType) -> bool {
        event == EventType::Manual
            || self.allowed_events.is_empty()
            || self.allowed_events.contains(&event)
    }
}

/// How git transport authentication is delegated for an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// SSH agent on the host
    Ssh,
    /// git credential helper (e.g. set up by `gh auth`)
    Cli,
    /// Token read from the environment variable named by `token_env`
    Token,
}

/// One GitHub account to back up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    #[serde(default = "default_auth")]
    pub auth: AuthMode,
    /// Name of the env var holding the token (token mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    /// Pinned repository list; omitted = discover via gh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repos: Option<Vec<String>>,
    /// Remote URL template with `{repo}` placeholder, for mirrors hosted
    /// off the standard forms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

impl AccountConfig {
    /// Clone/fetch URL for a repository. Tokens are injected by the
    /// credential callback, never embedded here.
    pub fn remote_url(&self, repo: &str) -> String {
        if let Some(template) = &self.remote {
            return template.replace("{repo}", repo);
        }
        match self.auth {
            AuthMode::Ssh => format!("git@{}:{}/{}.git", self.host, self.name, repo),
            AuthMode::Cli | AuthMode::Token => {
                format!("https://{}/{}/{}.git", self.host, self.name, repo)
            }
        }
    }
}

fn default_backup_root() -> PathBuf {
    PathBuf::from("backups")
}

fn default_auth() -> AuthMode {
    AuthMode::Cli
}

fn default_host() -> String {
    "github.com".to_string()
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, VaultError> {
        if !path.exists() {
            return Err(VaultError::NotFound(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), VaultError> {
        if self.settings.retention_days == 0 {
            return Err(VaultError::Validation("retention_days must be positive".into()));
        }
        if self.settings.workers == 0 {
            return Err(VaultError::Validation("workers must be at least 1".into()));
        }
        if self.settings.backoff_factor < 1.0 {
            return Err(VaultError::Validation("backoff_factor must be >= 1.0".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for account in &self.accounts {
            if account.name.is_empty() {
                return Err(VaultError::Validation("account name must not be empty".into()));
            }
            if !seen.insert(&account.name) {
                return Err(VaultError::Validation(format!(
                    "duplicate account: {}",
                    account.name
                )));
            }
            if account.auth == AuthMode::Token && account.token_env.is_none() {
                return Err(VaultError::Validation(format!(
                    "account {} uses token auth but sets no token_env",
                    account.name
                )));
            }
        }
        Ok(())
    }

    pub fn account(&self, name: &str) -> Result<&AccountConfig, VaultError> {
        self.accounts
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| VaultError::NotFound(format!("account not configured: {}", name)))
    }
}
