//! Backup orchestration
//!
//! One engine per process, configured once. A single-repository run is
//! lock, optional snapshot, transaction, mirror fetch, metadata pass,
//! commit, status, retention sweep. Account-wide runs fan the same
//! sequence over a bounded worker pool with per-repository isolation:
//! one repository failing never stops the rest.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use libghvault_core::{
    AccountConfig, BackupStatus, Config, EventType, Outcome, RetryPolicy, SnapshotPolicy,
    StatusStore, VaultError,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::BackupError;
use crate::fsutil;
use crate::layout::{RepoLayout, METADATA_DIR, MIRROR_DIR};
use crate::lock::{RepoLock, DEFAULT_LEASE_MS};
use crate::metadata::MetadataFetcher;
use crate::mirror::MirrorManager;
use crate::snapshot::SnapshotManager;
use crate::transaction::Transaction;

/// Result of one repository backup run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub account: String,
    pub repo: String,
    pub event: EventType,
    pub outcome: Outcome,
    pub size_bytes: u64,
    pub refs: usize,
    pub new_refs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    /// Snapshot taken before a destructive update, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    pub pruned_snapshots: usize,
    /// Metadata categories that failed this run
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub category_failures: Vec<String>,
}

/// Per-repository line in an account-wide run
#[derive(Debug, Clone, Serialize)]
pub struct RepoResult {
    pub repo: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate outcome of an account-wide run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregateOutcome {
    AllSucceeded,
    Partial,
    AllFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub account: String,
    pub results: Vec<RepoResult>,
}

impl AggregateReport {
    pub fn succeeded(&self) -> usize {
        self.count(Outcome::Success)
    }

    pub fn partial(&self) -> usize {
        self.count(Outcome::Partial)
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::Failed)
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn outcome(&self) -> AggregateOutcome {
        if self.results.is_empty() || self.failed() + self.partial() == 0 {
            AggregateOutcome::AllSucceeded
        } else if self.succeeded() + self.partial() == 0 {
            AggregateOutcome::AllFailed
        } else {
            AggregateOutcome::Partial
        }
    }

    /// 0 = everything succeeded, 1 = mixed, 2 = nothing succeeded
    pub fn exit_code(&self) -> i32 {
        match self.outcome() {
            AggregateOutcome::AllSucceeded => 0,
            AggregateOutcome::Partial => 1,
            AggregateOutcome::AllFailed => 2,
        }
    }
}

/// Result of restoring a repository to a working tree
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub account: String,
    pub repo: String,
    pub target: PathBuf,
    /// Snapshot restored from, or live state when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    pub metadata_restored: bool,
}

pub struct BackupEngine {
    config: Config,
    status: StatusStore,
}

impl BackupEngine {
    pub fn new(config: Config) -> Self {
        let status = StatusStore::new(config.backup_root.clone());
        Self { config, status }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status_store(&self) -> &StatusStore {
        &self.status
    }

    /// Back up one repository for `event`.
    ///
    /// The live payload is replaced atomically; on mirror failure it is
    /// left exactly as it was and the run is reported as failed.
    pub fn backup(
        &self,
        account_name: &str,
        repo: &str,
        event: EventType,
    ) -> Result<RunReport, BackupError> {
        validate_ident("account", account_name)?;
        validate_ident("repository", repo)?;
        if !self.config.settings.event_allowed(event) {
            return Err(VaultError::Validation(format!(
                "event type not accepted by configuration: {}",
                event
            ))
            .into());
        }
        let account = self.config.account(account_name)?;
        let layout = RepoLayout::new(&self.config.backup_root, account_name, repo);

        let guard = RepoLock::acquire(&layout.lock_file(), event, DEFAULT_LEASE_MS)?;
        let result = self.run_locked(account, &layout, repo, event);
        // Every executed run leaves a status record, whichever stage failed
        if let Err(e) = &result {
            error!(account = account_name, repo, "backup run failed: {}", e);
            if let Err(status_err) = self.record_failure(account_name, repo, event) {
                warn!(
                    account = account_name,
                    repo, "failed to record run status: {}", status_err
                );
            }
        }
        if let Err(e) = guard.release() {
            warn!(account = account_name, repo, "lease release failed: {}", e);
        }
        result
    }

    fn run_locked(
        &self,
        account: &AccountConfig,
        layout: &RepoLayout,
        repo: &str,
        event: EventType,
    ) -> Result<RunReport, BackupError> {
        info!(account = %account.name, repo, event = %event, "backup run starting");

        let snapshot = match event.snapshot_policy() {
            SnapshotPolicy::SnapshotBeforeUpdate => SnapshotManager::create(layout, event)?,
            SnapshotPolicy::None => None,
        };

        let txn = Transaction::begin(layout)?;

        let settings = &self.config.settings;
        let retry = RetryPolicy::new(
            settings.max_retries,
            settings.backoff_factor,
            settings.backoff_base(),
            settings.backoff_max(),
        );
        let mirror = MirrorManager::new(settings.git_timeout());
        let remote_url = account.remote_url(repo);
        let mirror_dir = txn.mirror_dir();

        let summary = match retry.execute(
            || mirror.ensure_mirror(&mirror_dir, &remote_url, account),
            BackupError::is_transient,
        ) {
            Ok(summary) => summary,
            Err(e) => {
                txn.rollback()?;
                return Err(e);
            }
        };

        let fetcher = MetadataFetcher::new(settings);
        let bundle = fetcher.fetch(&txn.metadata_dir(), &account.name, repo)?;

        txn.commit()?;

        let outcome = if bundle.all_ok() {
            Outcome::Success
        } else {
            Outcome::Partial
        };
        let size_bytes = fsutil::dir_size(&layout.current())?;
        self.status.write(
            &account.name,
            repo,
            &BackupStatus {
                last_backup: chrono::Utc::now(),
                outcome,
                size_bytes,
                last_commit: summary.head.clone(),
                event,
            },
        )?;

        let pruned = if outcome == Outcome::Success {
            SnapshotManager::prune_expired(layout, settings.retention_days)?.removed
        } else {
            0
        };

        info!(
            account = %account.name,
            repo,
            outcome = outcome.as_str(),
            size_bytes,
            "backup run finished"
        );
        Ok(RunReport {
            account: account.name.clone(),
            repo: repo.to_string(),
            event,
            outcome,
            size_bytes,
            refs: summary.refs,
            new_refs: summary.new_refs,
            head: summary.head,
            snapshot,
            pruned_snapshots: pruned,
            category_failures: bundle.failures(),
        })
    }

    /// Record a failed run without touching the live payload. The last
    /// known commit survives from the previous record.
    fn record_failure(
        &self,
        account: &str,
        repo: &str,
        event: EventType,
    ) -> Result<(), BackupError> {
        let previous = self.status.read(account, repo).unwrap_or(None);
        let current = RepoLayout::new(&self.config.backup_root, account, repo).current();
        let size_bytes = if current.exists() {
            fsutil::dir_size(&current)?
        } else {
            0
        };
        self.status.write(
            account,
            repo,
            &BackupStatus {
                last_backup: chrono::Utc::now(),
                outcome: Outcome::Failed,
                size_bytes,
                last_commit: previous.and_then(|s| s.last_commit),
                event,
            },
        )?;
        Ok(())
    }

    /// Back up every repository of one account.
    ///
    /// Repositories come from the pinned config list, or from discovery
    /// when none is pinned. Runs are spread over `settings.workers`
    /// threads; each repository's failure stays its own.
    pub fn backup_all(&self, account_name: &str) -> Result<AggregateReport, BackupError> {
        validate_ident("account", account_name)?;
        let account = self.config.account(account_name)?;

        let repos = match &account.repos {
            Some(pinned) => pinned.clone(),
            None => MetadataFetcher::new(&self.config.settings)
                .client()
                .list_repos(account_name)?,
        };
        if repos.is_empty() {
            return Ok(AggregateReport {
                account: account_name.to_string(),
                results: Vec::new(),
            });
        }

        let workers = self.config.settings.workers.min(repos.len());
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<(usize, RepoResult)>();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                let repos = &repos;
                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= repos.len() {
                        break;
                    }
                    let result = self.run_one(account_name, &repos[index]);
                    if tx.send((index, result)).is_err() {
                        break;
                    }
                });
            }
        });
        drop(tx);

        let mut indexed: Vec<(usize, RepoResult)> = rx.into_iter().collect();
        indexed.sort_by_key(|(index, _)| *index);
        Ok(AggregateReport {
            account: account_name.to_string(),
            results: indexed.into_iter().map(|(_, r)| r).collect(),
        })
    }

    fn run_one(&self, account: &str, repo: &str) -> RepoResult {
        match self.backup(account, repo, EventType::Manual) {
            Ok(report) => RepoResult {
                repo: repo.to_string(),
                outcome: report.outcome,
                error: None,
            },
            Err(e) => {
                error!(account, repo, "repository backup failed: {}", e);
                RepoResult {
                    repo: repo.to_string(),
                    outcome: Outcome::Failed,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Back up every configured account in turn
    pub fn backup_all_accounts(&self) -> Result<Vec<AggregateReport>, BackupError> {
        let names: Vec<String> = self.config.accounts.iter().map(|a| a.name.clone()).collect();
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            reports.push(self.backup_all(&name)?);
        }
        Ok(reports)
    }

    /// Restore a repository into a working tree at `target`.
    ///
    /// Reads from the live payload, or from a named snapshot. The target
    /// must be absent or an empty directory, and must lie outside the
    /// backup root so a restore can never overwrite backup state.
    pub fn restore(
        &self,
        account_name: &str,
        repo: &str,
        target: &Path,
        snapshot: Option<&str>,
    ) -> Result<RestoreReport, BackupError> {
        validate_ident("account", account_name)?;
        validate_ident("repository", repo)?;
        let layout = RepoLayout::new(&self.config.backup_root, account_name, repo);

        let payload = match snapshot {
            Some(name) => {
                let dir = layout.snapshots().join(name);
                if !dir.exists() {
                    return Err(VaultError::NotFound(format!("snapshot not found: {}", name)).into());
                }
                dir
            }
            None => {
                let dir = layout.current();
                if !dir.exists() {
                    return Err(VaultError::NotFound(format!(
                        "no backup exists for {}/{}",
                        account_name, repo
                    ))
                    .into());
                }
                dir
            }
        };
        let mirror = payload.join(MIRROR_DIR);
        if !mirror.join("HEAD").exists() {
            return Err(VaultError::NotFound(format!(
                "backup payload holds no mirror: {}",
                payload.display()
            ))
            .into());
        }

        self.check_restore_target(target)?;

        info!(
            account = account_name,
            repo,
            target = %target.display(),
            "restoring working tree"
        );
        let restored = git2::build::RepoBuilder::new()
            .clone(&mirror.to_string_lossy(), target)?;
        let head = restored
            .head()
            .ok()
            .and_then(|r| r.target())
            .map(|oid| oid.to_string());

        let metadata_src = payload.join(METADATA_DIR);
        let metadata_restored = if metadata_src.exists() && !fsutil::dir_is_empty(&metadata_src)? {
            fsutil::copy_dir(&metadata_src, &target.join(".ghvault-metadata"))?;
            true
        } else {
            false
        };

        Ok(RestoreReport {
            account: account_name.to_string(),
            repo: repo.to_string(),
            target: target.to_path_buf(),
            snapshot: snapshot.map(|s| s.to_string()),
            head,
            metadata_restored,
        })
    }

    fn check_restore_target(&self, target: &Path) -> Result<(), BackupError> {
        if target.exists() {
            if !target.is_dir() || !fsutil::dir_is_empty(target)? {
                return Err(VaultError::Validation(format!(
                    "restore target must be an empty directory: {}",
                    target.display()
                ))
                .into());
            }
        }
        if let Ok(root) = self.config.backup_root.canonicalize() {
            let absolute = absolutize(target)?;
            if absolute.starts_with(&root) {
                return Err(VaultError::Validation(
                    "restore target must lie outside the backup root".into(),
                )
                .into());
            }
        }
        Ok(())
    }
}

/// Absolute form of a possibly nonexistent path, resolving the nearest
/// existing ancestor
fn absolutize(path: &Path) -> Result<PathBuf, BackupError> {
    if let Ok(resolved) = path.canonicalize() {
        return Ok(resolved);
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let mut resolved = PathBuf::new();
    let mut pending = Vec::new();
    let mut cursor = absolute.as_path();
    loop {
        if let Ok(base) = cursor.canonicalize() {
            resolved = base;
            break;
        }
        match (cursor.parent(), cursor.file_name()) {
            (Some(parent), Some(name)) => {
                pending.push(name.to_os_string());
                cursor = parent;
            }
            _ => return Ok(absolute),
        }
    }
    for name in pending.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Account and repository names become path components; anything that
/// could traverse out of the layout is rejected before touching disk.
fn validate_ident(kind: &str, value: &str) -> Result<(), VaultError> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(VaultError::Validation(format!(
            "invalid {} name: {:?}",
            kind, value
        )))
    }
}
