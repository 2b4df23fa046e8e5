//! Bare mirror maintenance via libgit2
//!
//! One fetch shape covers both the initial clone and incremental
//! updates: `+refs/*:refs/*` with pruning, so the mirror exactly tracks
//! the remote's ref set. Credentials are resolved at the transport
//! callback per the account's auth mode; no secret ever appears in a
//! URL or on disk.

use std::cell::Cell;
use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use git2::{AutotagOption, Cred, FetchOptions, FetchPrune, RemoteCallbacks, Repository};
use libghvault_core::{AccountConfig, AuthMode, VaultError};
use tracing::{debug, info};

use crate::error::BackupError;
use crate::fsutil;

/// Refspec mirroring every remote ref
pub const MIRROR_REFSPEC: &str = "+refs/*:refs/*";

/// Outcome of one mirror fetch, for status and logging
#[derive(Debug, Clone)]
pub struct MirrorSummary {
    /// Total refs in the mirror after the fetch
    pub refs: usize,
    /// Refs not present before this fetch
    pub new_refs: usize,
    /// Commit id HEAD resolves to, if any
    pub head: Option<String>,
    pub size_bytes: u64,
}

/// Maintains the bare mirror inside a staging payload
pub struct MirrorManager {
    timeout: Duration,
}

impl MirrorManager {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Clone or incrementally update the mirror at `mirror_dir`.
    pub fn ensure_mirror(
        &self,
        mirror_dir: &Path,
        remote_url: &str,
        account: &AccountConfig,
    ) -> Result<MirrorSummary, BackupError> {
        let repo = if mirror_dir.join("HEAD").exists() {
            debug!(mirror = %mirror_dir.display(), "updating existing mirror");
            Repository::open_bare(mirror_dir)?
        } else {
            info!(mirror = %mirror_dir.display(), "initializing new mirror");
            Repository::init_bare(mirror_dir)?
        };

        let before = ref_names(&repo)?;

        let timed_out = Rc::new(Cell::new(false));
        let mut callbacks = RemoteCallbacks::new();
        add_credentials(&mut callbacks, account);
        {
            let timed_out = Rc::clone(&timed_out);
            let deadline = Instant::now() + self.timeout;
            callbacks.transfer_progress(move |_stats| {
                if Instant::now() >= deadline {
                    timed_out.set(true);
                    false
                } else {
                    true
                }
            });
        }

        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);
        options.prune(FetchPrune::On);
        options.download_tags(AutotagOption::All);

        let mut remote = repo.remote_anonymous(remote_url)?;
        let fetch_result = remote.fetch(&[MIRROR_REFSPEC], Some(&mut options), None);
        let default_branch = remote.default_branch().ok();
        drop(remote);

        if let Err(e) = fetch_result {
            if timed_out.get() {
                return Err(VaultError::Timeout(format!(
                    "git fetch exceeded {}s",
                    self.timeout.as_secs()
                ))
                .into());
            }
            return Err(e.into());
        }

        align_head(&repo, default_branch.as_ref().and_then(|b| b.as_str()))?;

        let after = ref_names(&repo)?;
        let new_refs = after.difference(&before).count();
        let head = repo
            .find_reference("HEAD")
            .ok()
            .and_then(|r| r.resolve().ok())
            .and_then(|r| r.target())
            .map(|oid| oid.to_string());
        let size_bytes = fsutil::dir_size(mirror_dir)?;

        info!(
            refs = after.len(),
            new_refs,
            size_bytes,
            "mirror fetch complete"
        );
        Ok(MirrorSummary {
            refs: after.len(),
            new_refs,
            head,
            size_bytes,
        })
    }
}

/// Point the mirror's HEAD at the remote's default branch, the way a
/// mirror clone would. Fetching alone never moves HEAD, and a dangling
/// HEAD breaks restore checkouts.
fn align_head(repo: &Repository, default_branch: Option<&str>) -> Result<(), BackupError> {
    if let Some(name) = default_branch {
        if repo.find_reference(name).is_ok() {
            repo.set_head(name)?;
            return Ok(());
        }
    }
    let head_ok = repo
        .find_reference("HEAD")
        .ok()
        .and_then(|r| r.resolve().ok())
        .is_some();
    if !head_ok {
        for candidate in ["refs/heads/main", "refs/heads/master"] {
            if repo.find_reference(candidate).is_ok() {
                repo.set_head(candidate)?;
                break;
            }
        }
    }
    Ok(())
}

fn ref_names(repo: &Repository) -> Result<HashSet<String>, BackupError> {
    let mut names = HashSet::new();
    for reference in repo.references()? {
        if let Some(name) = reference?.name() {
            names.insert(name.to_string());
        }
    }
    Ok(names)
}

/// Install the credential callback for the account's transport.
///
/// The component never holds raw credentials: SSH defers to the agent,
/// CLI mode to the configured git credential helper, token mode reads
/// the named environment variable at callback time.
fn add_credentials(callbacks: &mut RemoteCallbacks<'_>, account: &AccountConfig) {
    let auth = account.auth;
    let token_env = account.token_env.clone();
    callbacks.credentials(move |url, username_from_url, _allowed| match auth {
        AuthMode::Ssh => Cred::ssh_key_from_agent(username_from_url.unwrap_or("git")),
        AuthMode::Cli => {
            let config = git2::Config::open_default()?;
            Cred::credential_helper(&config, url, username_from_url)
        }
        AuthMode::Token => {
            let var = token_env.as_deref().unwrap_or("GHVAULT_TOKEN");
            match std::env::var(var) {
                Ok(token) => Cred::userpass_plaintext("x-access-token", &token),
                Err(_) => Err(git2::Error::from_str(&format!(
                    "token environment variable {} not set",
                    var
                ))),
            }
        }
    });
}
