//! Per-repository backup status records
//!
//! One `status.json` per repository, overwritten on every run via
//! write-to-temp-then-rename so readers never observe a torn record.
//! Independent of the main backup transaction.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::event::EventType;

/// Outcome of a backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Partial,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Partial => "partial",
            Outcome::Failed => "failed",
        }
    }
}

/// Status of the last backup run for one repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupStatus {
    pub last_backup: DateTime<Utc>,
    pub outcome: Outcome,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,
    pub event: EventType,
}

/// One row in the status listing
#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub account: String,
    pub repo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BackupStatus>,
}

/// Reads and atomically writes status records under the backup root
#[derive(Debug, Clone)]
pub struct StatusStore {
    root: PathBuf,
}

pub const STATUS_FILE: &str = "status.json";

impl StatusStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn status_path(&self, account: &str, repo: &str) -> PathBuf {
        self.root.join(account).join(repo).join(STATUS_FILE)
    }

    /// Atomically replace the status record for a repository
    pub fn write(&self, account: &str, repo: &str, status: &BackupStatus) -> Result<(), VaultError> {
        let path = self.status_path(account, repo);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(status)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn read(&self, account: &str, repo: &str) -> Result<Option<BackupStatus>, VaultError> {
        let path = self.status_path(account, repo);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// List every repository under the backup root with its status, sorted
    /// by (account, repo) for deterministic output.
    pub fn list(&self) -> Result<Vec<StatusEntry>, VaultError> {
        let mut entries = Vec::new();
        if !self.root.exists() {
            return Ok(entries);
        }
        for account_dir in read_subdirs(&self.root)? {
            let account = dir_name(&account_dir);
            for repo_dir in read_subdirs(&account_dir)? {
                let repo = dir_name(&repo_dir);
                let status = self.read(&account, &repo).unwrap_or(None);
                entries.push(StatusEntry { account: account.clone(), repo, status });
            }
        }
        entries.sort_by(|a, b| (&a.account, &a.repo).cmp(&(&b.account, &b.repo)));
        Ok(entries)
    }
}

fn read_subdirs(path: &Path) -> Result<Vec<PathBuf>, VaultError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
