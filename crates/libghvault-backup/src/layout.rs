//! On-disk layout of one repository's backup tree
//!
//! ```text
//! <backup_root>/<account>/<repo>/
//!   current/            live payload, only ever replaced atomically
//!     repo.git/         bare git mirror
//!     metadata/         one JSON document per category
//!   staging/            in-progress transaction (invisible to readers)
//!   current.old/        transient during the commit swap
//!   snapshots/          <timestamp>_<event>/ immutable copies of current/
//!   status.json         last run outcome
//!   backup.lock         per-repository lease
//! ```

use std::path::{Path, PathBuf};

pub const MIRROR_DIR: &str = "repo.git";
pub const METADATA_DIR: &str = "metadata";
pub const CURRENT_DIR: &str = "current";
pub const STAGING_DIR: &str = "staging";
pub const PREVIOUS_DIR: &str = "current.old";
pub const SNAPSHOTS_DIR: &str = "snapshots";
pub const LOCK_FILE: &str = "backup.lock";

/// Paths for one repository's backup tree
#[derive(Debug, Clone)]
pub struct RepoLayout {
    root: PathBuf,
}

impl RepoLayout {
    pub fn new(backup_root: &Path, account: &str, repo: &str) -> Self {
        Self {
            root: backup_root.join(account).join(repo),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Live payload directory; the only tree readers may observe
    pub fn current(&self) -> PathBuf {
        self.root.join(CURRENT_DIR)
    }

    pub fn staging(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub fn previous(&self) -> PathBuf {
        self.root.join(PREVIOUS_DIR)
    }

    pub fn snapshots(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Mirror directory inside a payload (current, staging, or snapshot)
    pub fn mirror_in(payload: &Path) -> PathBuf {
        payload.join(MIRROR_DIR)
    }

    /// Metadata directory inside a payload
    pub fn metadata_in(payload: &Path) -> PathBuf {
        payload.join(METADATA_DIR)
    }
}
