//! Point-in-time snapshots of a repository's backup state
//!
//! Destructive events (force-push, deletions) copy the live payload to
//! `snapshots/<timestamp>_<event>/` before the transaction replaces it.
//! Snapshots are immutable after creation; only the retention sweep
//! removes them. Age comes from the identifier timestamp, not file
//! mtimes, which the copy does not preserve.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use libghvault_core::EventType;
use tracing::{info, warn};

use crate::error::BackupError;
use crate::fsutil;
use crate::layout::RepoLayout;

/// Snapshot identifier timestamp format
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// A snapshot found on disk
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    /// Directory name, `<timestamp>_<event>`
    pub name: String,
    pub created: DateTime<Utc>,
    pub event: String,
}

/// Result of a retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub removed: usize,
    pub kept: usize,
    pub failed: usize,
}

/// Creates and prunes snapshots for one repository
pub struct SnapshotManager;

impl SnapshotManager {
    /// Copy the live payload aside before a destructive update.
    ///
    /// Returns the snapshot name, or `None` when there is no live state
    /// to preserve yet (first backup of a repository).
    pub fn create(layout: &RepoLayout, event: EventType) -> Result<Option<String>, BackupError> {
        let current = layout.current();
        if !current.exists() {
            return Ok(None);
        }
        let name = format!("{}_{}", Utc::now().format(TIMESTAMP_FORMAT), event);
        let dest = layout.snapshots().join(&name);
        info!(snapshot = %name, "creating pre-update snapshot");
        fsutil::copy_dir(&current, &dest)?;
        Ok(Some(name))
    }

    /// List snapshots, oldest first. Directories whose name does not
    /// parse are skipped with a warning.
    pub fn list(layout: &RepoLayout) -> Result<Vec<SnapshotInfo>, BackupError> {
        let dir = layout.snapshots();
        let mut snapshots = Vec::new();
        if !dir.exists() {
            return Ok(snapshots);
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match parse_snapshot_name(&name) {
                Some((created, event)) => snapshots.push(SnapshotInfo {
                    name,
                    created,
                    event,
                }),
                None => warn!(snapshot = %name, "skipping unparsable snapshot directory"),
            }
        }
        snapshots.sort_by_key(|s| s.created);
        Ok(snapshots)
    }

    /// Remove snapshots older than the retention window. Runs only after
    /// successful commits.
    pub fn prune_expired(layout: &RepoLayout, retention_days: u32) -> Result<PruneStats, BackupError> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        Self::prune_older_than(layout, cutoff)
    }

    /// Remove snapshots created strictly before `cutoff`. Deletion is
    /// best effort per snapshot; one failure does not block the rest.
    pub fn prune_older_than(
        layout: &RepoLayout,
        cutoff: DateTime<Utc>,
    ) -> Result<PruneStats, BackupError> {
        let mut stats = PruneStats::default();
        for snapshot in Self::list(layout)? {
            if snapshot.created < cutoff {
                let path = layout.snapshots().join(&snapshot.name);
                match std::fs::remove_dir_all(&path) {
                    Ok(()) => {
                        info!(snapshot = %snapshot.name, "removed expired snapshot");
                        stats.removed += 1;
                    }
                    Err(e) => {
                        warn!(snapshot = %snapshot.name, "failed to remove snapshot: {}", e);
                        stats.failed += 1;
                    }
                }
            } else {
                stats.kept += 1;
            }
        }
        Ok(stats)
    }
}

/// Split `<timestamp>_<event>` into creation time and event name
fn parse_snapshot_name(name: &str) -> Option<(DateTime<Utc>, String)> {
    // Timestamp is a fixed-width prefix: 2024-01-31_12-00-00
    let ts_len = "0000-00-00_00-00-00".len();
    if name.len() < ts_len + 2 || name.as_bytes()[ts_len] != b'_' {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(&name[..ts_len], TIMESTAMP_FORMAT).ok()?;
    Some((naive.and_utc(), name[ts_len + 1..].to_string()))
}
