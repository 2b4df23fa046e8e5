//! End-to-end engine runs against local git remotes and a stubbed gh
//! binary. Unix-only: the stub is a shell script.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use git2::{Repository, Signature};
use libghvault_backup::{BackupEngine, BackupError, RepoLayout, RepoLock, SnapshotManager};
use libghvault_core::{
    AccountConfig, AuthMode, Config, EventType, Outcome, Settings, VaultError,
};
use tempfile::{tempdir, TempDir};

fn commit_on(repo: &Repository, reference: &str, message: &str) -> git2::Oid {
    let sig = Signature::now("test", "test@test.com").unwrap();
    let blob = repo.blob(message.as_bytes()).unwrap();
    let mut builder = repo.treebuilder(None).unwrap();
    builder.insert("file.txt", blob, 0o100644).unwrap();
    let tree = repo.find_tree(builder.write().unwrap()).unwrap();
    let parent = repo
        .find_reference(reference)
        .ok()
        .and_then(|r| r.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some(reference), &sig, &sig, message, &tree, &parents)
        .unwrap()
}

fn make_remote(path: &Path) -> Repository {
    let repo = Repository::init_bare(path).unwrap();
    commit_on(&repo, "refs/heads/main", "initial");
    repo.set_head("refs/heads/main").unwrap();
    repo
}

/// Stub gh that answers every call with canned JSON; optionally one
/// subcommand fails to exercise category isolation.
fn write_stub_gh(dir: &Path, failing: Option<&str>) -> PathBuf {
    let fail = failing.unwrap_or("");
    let script = format!(
        r#"#!/bin/sh
sub="$1 $2"
if [ "$1" = "{fail}" ]; then
    echo "HTTP 500: stub failure" >&2
    exit 1
fi
case "$sub" in
    "api rate_limit")
        echo '{{"resources":{{"core":{{"remaining":5000,"reset":0}}}}}}' ;;
    "api "*)
        echo '{{"name":"demo","full_name":"octocat/demo","private":false,"default_branch":"main","topics":[]}}' ;;
    "issue list")
        echo '[{{"number":1,"title":"stub issue","state":"OPEN"}}]' ;;
    "pr list")
        echo '[]' ;;
    "release list")
        echo '[]' ;;
    "repo list")
        echo '[{{"name":"demo"}}]' ;;
    *)
        echo "unexpected: $sub" >&2
        exit 1 ;;
esac
"#
    );
    let path = dir.join("gh");
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

struct Fixture {
    _dir: TempDir,
    remotes: PathBuf,
    engine: BackupEngine,
    backup_root: PathBuf,
}

impl Fixture {
    fn new(repos: &[&str], failing_gh: Option<&str>) -> Self {
        let dir = tempdir().unwrap();
        let remotes = dir.path().join("remotes");
        fs::create_dir_all(&remotes).unwrap();
        for repo in repos {
            make_remote(&remotes.join(format!("{}.git", repo)));
        }

        let gh_path = write_stub_gh(dir.path(), failing_gh);
        let backup_root = dir.path().join("backups");
        let config = Config {
            backup_root: backup_root.clone(),
            settings: Settings {
                max_retries: 0,
                backoff_base_ms: 1,
                gh_path: gh_path.to_string_lossy().into_owned(),
                ..Settings::default()
            },
            accounts: vec![AccountConfig {
                name: "octocat".into(),
                auth: AuthMode::Cli,
                token_env: None,
                host: "github.com".into(),
                repos: Some(repos.iter().map(|r| r.to_string()).collect()),
                remote: Some(format!("{}/{{repo}}.git", remotes.display())),
            }],
        };
        Self {
            _dir: dir,
            remotes,
            engine: BackupEngine::new(config),
            backup_root,
        }
    }

    fn remote(&self, repo: &str) -> Repository {
        Repository::open_bare(self.remotes.join(format!("{}.git", repo))).unwrap()
    }

    fn layout(&self, repo: &str) -> RepoLayout {
        RepoLayout::new(&self.backup_root, "octocat", repo)
    }
}

#[test]
fn test_backup_publishes_mirror_and_metadata() {
    let fx = Fixture::new(&["demo"], None);

    let report = fx.engine.backup("octocat", "demo", EventType::Manual).unwrap();
    assert_eq!(report.outcome, Outcome::Success);
    assert!(report.refs >= 1);
    assert!(report.size_bytes > 0);
    assert!(report.snapshot.is_none());

    let current = fx.layout("demo").current();
    assert!(current.join("repo.git").join("HEAD").exists());
    for doc in ["repository.json", "issues.json", "pulls.json", "releases.json"] {
        assert!(current.join("metadata").join(doc).exists(), "missing {}", doc);
    }
    assert!(!fx.layout("demo").staging().exists());
    assert!(!fx.layout("demo").lock_file().exists());

    let status = fx.engine.status_store().read("octocat", "demo").unwrap().unwrap();
    assert_eq!(status.outcome, Outcome::Success);
    assert_eq!(status.last_commit, report.head);
}

#[test]
fn test_incremental_backup_is_idempotent() {
    let fx = Fixture::new(&["demo"], None);

    fx.engine.backup("octocat", "demo", EventType::Manual).unwrap();
    let second = fx.engine.backup("octocat", "demo", EventType::Push).unwrap();
    assert_eq!(second.outcome, Outcome::Success);
    assert_eq!(second.new_refs, 0);
    // Non-destructive events never snapshot
    assert!(SnapshotManager::list(&fx.layout("demo")).unwrap().is_empty());
}

#[test]
fn test_force_push_snapshots_before_update() {
    let fx = Fixture::new(&["demo"], None);

    fx.engine.backup("octocat", "demo", EventType::Manual).unwrap();
    let before_head = fx.engine.status_store().read("octocat", "demo").unwrap().unwrap();

    commit_on(&fx.remote("demo"), "refs/heads/main", "rewritten history");
    let report = fx.engine.backup("octocat", "demo", EventType::ForcePush).unwrap();

    let snapshots = SnapshotManager::list(&fx.layout("demo")).unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].event, "force-push");
    assert_eq!(report.snapshot.as_deref(), Some(snapshots[0].name.as_str()));

    // The snapshot preserves the pre-update mirror
    let snap_mirror = fx
        .layout("demo")
        .snapshots()
        .join(&snapshots[0].name)
        .join("repo.git");
    let snap_repo = Repository::open_bare(&snap_mirror).unwrap();
    let snap_head = snap_repo
        .find_reference("refs/heads/main")
        .unwrap()
        .target()
        .unwrap()
        .to_string();
    assert_eq!(Some(snap_head), before_head.last_commit);
    assert_ne!(report.head, before_head.last_commit);
}

#[test]
fn test_first_backup_of_destructive_event_skips_snapshot() {
    let fx = Fixture::new(&["demo"], None);
    let report = fx
        .engine
        .backup("octocat", "demo", EventType::BranchDelete)
        .unwrap();
    assert!(report.snapshot.is_none());
    assert_eq!(report.outcome, Outcome::Success);
}

#[test]
fn test_mirror_failure_leaves_live_payload_and_records_failed() {
    let fx = Fixture::new(&["demo"], None);
    fx.engine.backup("octocat", "demo", EventType::Manual).unwrap();

    // Break the remote, then try again
    fs::remove_dir_all(fx.remotes.join("demo.git")).unwrap();
    let err = fx
        .engine
        .backup("octocat", "demo", EventType::Push)
        .unwrap_err();
    assert!(!format!("{}", err).is_empty());

    // Old payload survives, staging is gone, failure is recorded
    let layout = fx.layout("demo");
    assert!(layout.current().join("repo.git").join("HEAD").exists());
    assert!(!layout.staging().exists());
    assert!(!layout.lock_file().exists());
    let status = fx.engine.status_store().read("octocat", "demo").unwrap().unwrap();
    assert_eq!(status.outcome, Outcome::Failed);
    // Last known commit survives from the successful run
    assert!(status.last_commit.is_some());
}

#[test]
fn test_snapshot_failure_records_failed_status() {
    let fx = Fixture::new(&["demo"], None);
    fx.engine.backup("octocat", "demo", EventType::Manual).unwrap();

    // Block snapshot creation entirely
    fs::write(fx.layout("demo").snapshots(), b"blocked").unwrap();
    fx.engine
        .backup("octocat", "demo", EventType::ForcePush)
        .unwrap_err();

    let status = fx.engine.status_store().read("octocat", "demo").unwrap().unwrap();
    assert_eq!(status.outcome, Outcome::Failed);
    assert!(status.last_commit.is_some());
    // Live payload untouched by the aborted run
    assert!(fx.layout("demo").current().join("repo.git").join("HEAD").exists());
    assert!(!fx.layout("demo").lock_file().exists());
}

#[test]
fn test_transaction_failure_records_failed_status() {
    let fx = Fixture::new(&["demo"], None);
    fx.engine.backup("octocat", "demo", EventType::Manual).unwrap();

    // A file where crash recovery expects a directory makes begin fail
    fs::write(fx.layout("demo").previous(), b"blocked").unwrap();
    fx.engine
        .backup("octocat", "demo", EventType::Push)
        .unwrap_err();

    let status = fx.engine.status_store().read("octocat", "demo").unwrap().unwrap();
    assert_eq!(status.outcome, Outcome::Failed);
    assert!(!fx.layout("demo").lock_file().exists());
}

#[test]
fn test_metadata_failure_commits_partial() {
    let fx = Fixture::new(&["demo"], Some("issue"));

    let report = fx.engine.backup("octocat", "demo", EventType::Manual).unwrap();
    assert_eq!(report.outcome, Outcome::Partial);
    assert_eq!(report.category_failures.len(), 1);
    assert!(report.category_failures[0].starts_with("issues:"));

    // Mirror and the other categories committed anyway
    let current = fx.layout("demo").current();
    assert!(current.join("repo.git").join("HEAD").exists());
    assert!(current.join("metadata").join("repository.json").exists());
    assert!(!current.join("metadata").join("issues.json").exists());

    let status = fx.engine.status_store().read("octocat", "demo").unwrap().unwrap();
    assert_eq!(status.outcome, Outcome::Partial);
}

#[test]
fn test_concurrent_run_rejected() {
    let fx = Fixture::new(&["demo"], None);
    let layout = fx.layout("demo");

    let guard = RepoLock::acquire(&layout.lock_file(), EventType::Push, 60_000).unwrap();
    let err = fx
        .engine
        .backup("octocat", "demo", EventType::Manual)
        .unwrap_err();
    assert!(matches!(
        err,
        BackupError::Core(VaultError::InProgress { .. })
    ));
    guard.release().unwrap();

    fx.engine.backup("octocat", "demo", EventType::Manual).unwrap();
}

#[test]
fn test_backup_all_isolates_failures() {
    let fx = Fixture::new(&["alpha", "beta", "gamma"], None);
    fs::remove_dir_all(fx.remotes.join("beta.git")).unwrap();

    let report = fx.engine.backup_all("octocat").unwrap();
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.exit_code(), 1);

    let failed: Vec<&str> = report
        .results
        .iter()
        .filter(|r| r.outcome == Outcome::Failed)
        .map(|r| r.repo.as_str())
        .collect();
    assert_eq!(failed, vec!["beta"]);

    // The healthy repositories were fully backed up
    assert!(fx.layout("alpha").current().join("repo.git").join("HEAD").exists());
    assert!(fx.layout("gamma").current().join("repo.git").join("HEAD").exists());
}

#[test]
fn test_unknown_account_and_bad_names_rejected() {
    let fx = Fixture::new(&["demo"], None);

    let err = fx
        .engine
        .backup("nobody", "demo", EventType::Manual)
        .unwrap_err();
    assert!(matches!(err, BackupError::Core(VaultError::NotFound(_))));

    let err = fx
        .engine
        .backup("octocat", "../escape", EventType::Manual)
        .unwrap_err();
    assert!(matches!(err, BackupError::Core(VaultError::Validation(_))));
}

#[test]
fn test_restore_produces_working_tree() {
    let fx = Fixture::new(&["demo"], None);
    fx.engine.backup("octocat", "demo", EventType::Manual).unwrap();

    let target = fx._dir.path().join("restored");
    let report = fx
        .engine
        .restore("octocat", "demo", &target, None)
        .unwrap();

    assert!(target.join(".git").exists());
    assert!(target.join("file.txt").exists());
    assert!(target.join(".ghvault-metadata").join("repository.json").exists());
    assert!(report.metadata_restored);
    assert!(report.head.is_some());
}

#[test]
fn test_restore_from_snapshot() {
    let fx = Fixture::new(&["demo"], None);
    fx.engine.backup("octocat", "demo", EventType::Manual).unwrap();
    commit_on(&fx.remote("demo"), "refs/heads/main", "new work");
    fx.engine.backup("octocat", "demo", EventType::ForcePush).unwrap();

    let snapshots = SnapshotManager::list(&fx.layout("demo")).unwrap();
    let target = fx._dir.path().join("restored-snap");
    let report = fx
        .engine
        .restore("octocat", "demo", &target, Some(&snapshots[0].name))
        .unwrap();

    assert_eq!(report.snapshot.as_deref(), Some(snapshots[0].name.as_str()));
    assert!(target.join("file.txt").exists());
}

#[test]
fn test_restore_target_rules() {
    let fx = Fixture::new(&["demo"], None);
    fx.engine.backup("octocat", "demo", EventType::Manual).unwrap();

    // Inside the backup root
    let inside = fx.backup_root.join("octocat").join("elsewhere");
    let err = fx
        .engine
        .restore("octocat", "demo", &inside, None)
        .unwrap_err();
    assert!(matches!(err, BackupError::Core(VaultError::Validation(_))));

    // Non-empty target
    let occupied = fx._dir.path().join("occupied");
    fs::create_dir_all(&occupied).unwrap();
    fs::write(occupied.join("keep.txt"), b"data").unwrap();
    let err = fx
        .engine
        .restore("octocat", "demo", &occupied, None)
        .unwrap_err();
    assert!(matches!(err, BackupError::Core(VaultError::Validation(_))));

    // Missing snapshot
    let target = fx._dir.path().join("fresh");
    let err = fx
        .engine
        .restore("octocat", "demo", &target, Some("2020-01-01_00-00-00_push"))
        .unwrap_err();
    assert!(matches!(err, BackupError::Core(VaultError::NotFound(_))));
}
