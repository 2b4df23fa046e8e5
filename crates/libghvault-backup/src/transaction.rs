//! Atomic backup transactions
//!
//! All fetch work lands in `staging/`, seeded from the live `current/`
//! payload via hard links. Commit is a rename swap:
//!
//! 1. `current/`  -> `current.old/`
//! 2. `staging/`  -> `current/`
//! 3. remove `current.old/` (best effort)
//!
//! A crash before step 1 or between 1 and 2 leaves the old payload
//! recoverable; a crash after step 2 leaves the new payload live.
//! `begin` runs recovery for every such crash point, so no intermediate
//! state is ever observable through `current/`.

use std::fs;
use std::path::PathBuf;

use libghvault_core::VaultError;
use tracing::{debug, info, warn};

use crate::error::BackupError;
use crate::fsutil;
use crate::layout::RepoLayout;

/// An open staging area for one repository
#[derive(Debug)]
pub struct Transaction {
    current: PathBuf,
    staging: PathBuf,
    previous: PathBuf,
    finished: bool,
}

impl Transaction {
    /// Recover from any prior crash, then open a fresh staging area
    /// seeded with the live payload.
    pub fn begin(layout: &RepoLayout) -> Result<Self, BackupError> {
        let current = layout.current();
        let staging = layout.staging();
        let previous = layout.previous();

        fs::create_dir_all(layout.root())?;
        recover(&current, &staging, &previous)?;

        if current.exists() {
            fsutil::link_or_copy_dir(&current, &staging)?;
        } else {
            fs::create_dir_all(&staging)?;
        }
        fs::create_dir_all(RepoLayout::metadata_in(&staging))?;

        debug!(staging = %staging.display(), "transaction opened");
        Ok(Self {
            current,
            staging,
            previous,
            finished: false,
        })
    }

    /// Mirror directory inside the staging payload
    pub fn mirror_dir(&self) -> PathBuf {
        RepoLayout::mirror_in(&self.staging)
    }

    /// Metadata directory inside the staging payload
    pub fn metadata_dir(&self) -> PathBuf {
        RepoLayout::metadata_in(&self.staging)
    }

    /// Atomically publish the staged payload.
    ///
    /// A failed swap is surfaced as a transaction error and never
    /// retried here; retries belong to the operations that produced the
    /// staged content.
    pub fn commit(mut self) -> Result<(), BackupError> {
        self.finished = true;

        if self.current.exists() {
            fs::rename(&self.current, &self.previous).map_err(|e| {
                VaultError::Transaction(format!("failed to set aside live payload: {}", e))
            })?;
        }
        if let Err(e) = fs::rename(&self.staging, &self.current) {
            // Put the old payload back so the repository stays usable
            if self.previous.exists() {
                if let Err(undo) = fs::rename(&self.previous, &self.current) {
                    warn!("failed to restore payload after aborted swap: {}", undo);
                }
            }
            return Err(VaultError::Transaction(format!("atomic swap failed: {}", e)).into());
        }
        if let Err(e) = fsutil::remove_dir_if_exists(&self.previous) {
            warn!("failed to remove previous payload: {}", e);
        }

        info!(current = %self.current.display(), "transaction committed");
        Ok(())
    }

    /// Discard the staging area; the live payload is untouched.
    /// Safe to call after partial failure at any stage.
    pub fn rollback(mut self) -> Result<(), BackupError> {
        self.finished = true;
        fsutil::remove_dir_if_exists(&self.staging)?;
        debug!(staging = %self.staging.display(), "transaction rolled back");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = fsutil::remove_dir_if_exists(&self.staging) {
                warn!("failed to clean staging on drop: {}", e);
            }
        }
    }
}

/// Repair the tree after a crashed run.
///
/// - missing `current` with `current.old` present: the swap died between
///   renames; the old payload is the committed state, put it back.
/// - both present: the swap died before removing the old payload.
/// - leftover `staging`: an uncommitted run; discard it.
fn recover(
    current: &PathBuf,
    staging: &PathBuf,
    previous: &PathBuf,
) -> Result<(), BackupError> {
    if !current.exists() && previous.exists() {
        warn!("recovering interrupted commit: restoring previous payload");
        fs::rename(previous, current)
            .map_err(|e| VaultError::Transaction(format!("crash recovery failed: {}", e)))?;
    } else if previous.exists() {
        warn!("removing leftover previous payload from interrupted commit");
        fsutil::remove_dir_if_exists(previous)?;
    }
    if staging.exists() {
        warn!("discarding stale staging directory from interrupted run");
        fsutil::remove_dir_if_exists(staging)?;
    }
    Ok(())
}
