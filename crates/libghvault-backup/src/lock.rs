//! Per-repository lease lock
//!
//! A JSON lease file created with `create_new` so exactly one run can
//! hold a repository at a time. Leases expire, so a crashed run cannot
//! wedge future backups; a live conflicting holder is reported as
//! "already in progress" rather than waited on.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use libghvault_core::{EventType, VaultError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::BackupError;

/// Default lease: generous enough for a slow initial mirror clone
pub const DEFAULT_LEASE_MS: u64 = 30 * 60 * 1000;

/// Lease body stored in `backup.lock`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoLock {
    pub pid: u32,
    pub host: String,
    /// Unique id of this lease instance; release verifies it
    pub nonce: String,
    pub event: EventType,
    pub started_ts: u64,
    pub lease_ms: u64,
    pub expires_ts: u64,
}

impl RepoLock {
    fn new(event: EventType, lease_ms: u64) -> Self {
        let now = current_time_ms();
        Self {
            pid: std::process::id(),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            nonce: uuid::Uuid::new_v4().to_string(),
            event,
            started_ts: now,
            lease_ms,
            expires_ts: now + lease_ms,
        }
    }

    pub fn is_expired(&self) -> bool {
        current_time_ms() > self.expires_ts
    }

    pub fn time_remaining_ms(&self) -> u64 {
        self.expires_ts.saturating_sub(current_time_ms())
    }

    /// Acquire the lease for a repository.
    ///
    /// An unexpired lease held by anyone else rejects the call; expired
    /// or unreadable lease files are reclaimed.
    pub fn acquire(path: &Path, event: EventType, lease_ms: u64) -> Result<LockGuard, BackupError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let lock = RepoLock::new(event, lease_ms);
                    file.write_all(serde_json::to_string_pretty(&lock)?.as_bytes())?;
                    debug!(path = %path.display(), nonce = %lock.nonce, "lease acquired");
                    return Ok(LockGuard {
                        path: path.to_path_buf(),
                        nonce: lock.nonce,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match Self::read(path) {
                        Ok(Some(existing)) if !existing.is_expired() => {
                            return Err(VaultError::InProgress {
                                pid: existing.pid,
                                expires_in_ms: existing.time_remaining_ms(),
                            }
                            .into());
                        }
                        Ok(Some(existing)) => {
                            warn!(
                                pid = existing.pid,
                                path = %path.display(),
                                "reclaiming expired lease"
                            );
                            reclaim(path)?;
                        }
                        Ok(None) => { /* raced with a release; retry create */ }
                        Err(_) => {
                            warn!(path = %path.display(), "reclaiming unreadable lease file");
                            reclaim(path)?;
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read(path: &Path) -> Result<Option<Self>, BackupError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Take a stale lease out of the way atomically. Rename before delete:
/// of two racing reclaimers only the rename winner removes anything, so
/// neither can delete a fresh lease the other just created.
fn reclaim(path: &Path) -> Result<(), BackupError> {
    let displaced = path.with_extension(format!("stale.{}", uuid::Uuid::new_v4()));
    match fs::rename(path, &displaced) {
        Ok(()) => {
            let _ = fs::remove_file(&displaced);
            Ok(())
        }
        // Lost the race; the winner displaced it already
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn remove_quietly(path: &Path) -> Result<(), BackupError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Held lease; releasing removes the file only if the nonce still matches
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    nonce: String,
    released: bool,
}

impl LockGuard {
    pub fn release(mut self) -> Result<(), BackupError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), BackupError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match RepoLock::read(&self.path) {
            Ok(Some(lock)) if lock.nonce == self.nonce => remove_quietly(&self.path),
            // Someone reclaimed an expired lease from us; nothing to remove
            _ => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release_inner() {
                warn!(path = %self.path.display(), "failed to release lease on drop: {}", e);
            }
        }
    }
}

fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
