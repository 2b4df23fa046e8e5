//! Repository metadata via the gh CLI
//!
//! Four categories — settings, issues, pull requests, releases — each an
//! independent sub-operation: one category failing leaves the others
//! intact, and the baseline document for a failed category survives in
//! staging. Every call goes through the rate limiter and the retry
//! policy. Documents are typed, serialized whole, and fully replace
//! their predecessor on commit.

use std::path::Path;

use chrono::{DateTime, Utc};
use libghvault_core::{
    ProcessRunner, RateLimiter, RateQuota, RetryPolicy, Settings, VaultError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::BackupError;

pub const REPOSITORY_FILE: &str = "repository.json";
pub const ISSUES_FILE: &str = "issues.json";
pub const PULLS_FILE: &str = "pulls.json";
pub const RELEASES_FILE: &str = "releases.json";

const ISSUE_FIELDS: &str = "number,title,body,state,author,assignees,labels,createdAt,updatedAt,comments";
const PULL_FIELDS: &str =
    "number,title,body,state,author,assignees,labels,createdAt,updatedAt,mergedAt,reviews,comments";
const RELEASE_FIELDS: &str = "tagName,name,isDraft,isPrerelease,createdAt,publishedAt";

// ---------------------------------------------------------------------------
// Typed documents (gh list output is camelCase; `gh api` is REST-shaped)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: String,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub assignees: Vec<Author>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: String,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub assignees: Vec<Author>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub is_prerelease: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// Repository settings from the REST API (snake_case)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSettings {
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

// ---------------------------------------------------------------------------
// gh client
// ---------------------------------------------------------------------------

/// Thin wrapper over the gh binary: structured args, hard timeout,
/// failure classification from stderr.
pub struct GhClient {
    runner: ProcessRunner,
    program: String,
    page_limit: u32,
}

impl GhClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            runner: ProcessRunner::new(settings.api_timeout()),
            program: settings.gh_path.clone(),
            page_limit: settings.page_limit,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, VaultError> {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let output = self.runner.run(&self.program, &owned)?;
        if !output.success() {
            return Err(classify_gh_failure(&output.stderr));
        }
        Ok(output.stdout)
    }

    /// Remaining core API quota; `None` when the probe itself fails
    /// (the limiter then lets the call proceed).
    pub fn rate_quota(&self) -> Option<RateQuota> {
        let stdout = match self.run(&["api", "rate_limit"]) {
            Ok(out) => out,
            Err(e) => {
                debug!("rate quota probe failed: {}", e);
                return None;
            }
        };
        let value: serde_json::Value = serde_json::from_str(&stdout).ok()?;
        let core = value.get("resources")?.get("core")?;
        Some(RateQuota {
            remaining: core.get("remaining")?.as_u64()?,
            reset_epoch: core.get("reset")?.as_u64()?,
        })
    }

    pub fn repo_settings(&self, slug: &str) -> Result<RepoSettings, VaultError> {
        let stdout = self.run(&["api", &format!("repos/{}", slug)])?;
        Ok(serde_json::from_str(&stdout)?)
    }

    pub fn list_issues(&self, slug: &str) -> Result<Vec<Issue>, VaultError> {
        let limit = self.page_limit.to_string();
        let stdout = self.run(&[
            "issue", "list", "--repo", slug, "--state", "all", "--limit", &limit, "--json",
            ISSUE_FIELDS,
        ])?;
        Ok(serde_json::from_str(&stdout)?)
    }

    pub fn list_pulls(&self, slug: &str) -> Result<Vec<PullRequest>, VaultError> {
        let limit = self.page_limit.to_string();
        let stdout = self.run(&[
            "pr", "list", "--repo", slug, "--state", "all", "--limit", &limit, "--json",
            PULL_FIELDS,
        ])?;
        Ok(serde_json::from_str(&stdout)?)
    }

    pub fn list_releases(&self, slug: &str) -> Result<Vec<Release>, VaultError> {
        let limit = self.page_limit.to_string();
        match self.run(&[
            "release", "list", "--repo", slug, "--limit", &limit, "--json", RELEASE_FIELDS,
        ]) {
            Ok(stdout) => Ok(serde_json::from_str(&stdout)?),
            // A repository with no releases is success with empty data
            Err(VaultError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Names of an account's repositories, for backup-all discovery
    pub fn list_repos(&self, account: &str) -> Result<Vec<String>, VaultError> {
        let limit = self.page_limit.to_string();
        let stdout = self.run(&[
            "repo", "list", account, "--json", "name", "--limit", &limit,
        ])?;

        #[derive(Deserialize)]
        struct RepoName {
            name: String,
        }
        let repos: Vec<RepoName> = serde_json::from_str(&stdout)?;
        Ok(repos.into_iter().map(|r| r.name).collect())
    }
}

/// Map a failed gh invocation onto the error taxonomy so the retry
/// policy can tell transient from permanent.
fn classify_gh_failure(stderr: &str) -> VaultError {
    let text = stderr.trim();
    let lower = text.to_lowercase();
    if lower.contains("rate limit") {
        // Exhausted budget despite the limiter; transient, the next
        // attempt goes back through the gate
        VaultError::Network(text.to_string())
    } else if lower.contains("http 401")
        || lower.contains("http 403")
        || lower.contains("bad credentials")
        || lower.contains("authentication")
    {
        VaultError::Auth(text.to_string())
    } else if lower.contains("http 404") || lower.contains("not found") {
        VaultError::NotFound(text.to_string())
    } else if lower.contains("http 5")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("could not resolve")
    {
        VaultError::Network(text.to_string())
    } else {
        VaultError::Process(text.to_string())
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Result of one category fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryOutcome {
    /// Document written with this many items (1 for settings)
    Fetched(usize),
    /// Not applicable; an empty document was written
    Empty,
    /// Category discarded; the baseline document, if any, survives
    Failed(String),
}

impl CategoryOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, CategoryOutcome::Failed(_))
    }
}

/// Per-category outcomes of one metadata pass
#[derive(Debug)]
pub struct MetadataBundle {
    pub repository: CategoryOutcome,
    pub issues: CategoryOutcome,
    pub pulls: CategoryOutcome,
    pub releases: CategoryOutcome,
}

impl MetadataBundle {
    pub fn all_ok(&self) -> bool {
        self.categories().iter().all(|(_, o)| o.is_ok())
    }

    pub fn categories(&self) -> [(&'static str, &CategoryOutcome); 4] {
        [
            ("repository", &self.repository),
            ("issues", &self.issues),
            ("pulls", &self.pulls),
            ("releases", &self.releases),
        ]
    }

    pub fn failures(&self) -> Vec<String> {
        self.categories()
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                CategoryOutcome::Failed(reason) => Some(format!("{}: {}", name, reason)),
                _ => None,
            })
            .collect()
    }
}

/// Fetches all metadata categories into a staging directory
pub struct MetadataFetcher {
    client: GhClient,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl MetadataFetcher {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: GhClient::new(settings),
            retry: RetryPolicy::new(
                settings.max_retries,
                settings.backoff_factor,
                settings.backoff_base(),
                settings.backoff_max(),
            ),
            limiter: RateLimiter::new(settings.rate_limit_threshold, settings.rate_limit_max_wait()),
        }
    }

    pub fn client(&self) -> &GhClient {
        &self.client
    }

    pub fn fetch(
        &self,
        metadata_dir: &Path,
        account: &str,
        repo: &str,
    ) -> Result<MetadataBundle, BackupError> {
        std::fs::create_dir_all(metadata_dir)?;
        let slug = format!("{}/{}", account, repo);

        let repository = self.category(metadata_dir, REPOSITORY_FILE, || {
            self.client.repo_settings(&slug).map(|doc| (doc, 1))
        });
        let issues = self.category(metadata_dir, ISSUES_FILE, || {
            self.client.list_issues(&slug).map(with_len)
        });
        let pulls = self.category(metadata_dir, PULLS_FILE, || {
            self.client.list_pulls(&slug).map(with_len)
        });
        let releases = self.category(metadata_dir, RELEASES_FILE, || {
            self.client.list_releases(&slug).map(with_len)
        });

        let bundle = MetadataBundle {
            repository,
            issues,
            pulls,
            releases,
        };
        info!(
            slug = %slug,
            ok = bundle.all_ok(),
            "metadata pass finished"
        );
        Ok(bundle)
    }

    /// Gate on rate budget, fetch with retry, write the whole document.
    /// Failures are contained in the returned outcome.
    fn category<T: Serialize>(
        &self,
        dir: &Path,
        file: &str,
        fetch: impl Fn() -> Result<(T, usize), VaultError>,
    ) -> CategoryOutcome {
        // Every attempt re-probes the quota, so a rate-limited retry
        // waits for the window before going again.
        let result = self.retry.execute(
            || {
                self.limiter.gate(self.client.rate_quota().as_ref());
                fetch()
            },
            |e: &VaultError| e.is_transient(),
        );
        match result {
            Ok((doc, count)) => match write_document(dir, file, &doc) {
                Ok(()) => {
                    if count == 0 {
                        CategoryOutcome::Empty
                    } else {
                        CategoryOutcome::Fetched(count)
                    }
                }
                Err(e) => CategoryOutcome::Failed(e.to_string()),
            },
            Err(e) => {
                warn!(category = file, "metadata category failed: {}", e);
                CategoryOutcome::Failed(e.to_string())
            }
        }
    }
}

fn with_len<T>(items: Vec<T>) -> (Vec<T>, usize) {
    let len = items.len();
    (items, len)
}

/// Staged documents may share inodes with the live payload (staging is
/// seeded with hard links), so writing in place would mutate the live
/// copy before commit. Write a fresh file and rename it over the link.
fn write_document<T: Serialize>(dir: &Path, file: &str, doc: &T) -> Result<(), VaultError> {
    let path = dir.join(file);
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(doc)?)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_gh_failure() {
        assert!(matches!(
            classify_gh_failure("HTTP 401: Bad credentials"),
            VaultError::Auth(_)
        ));
        assert!(matches!(
            classify_gh_failure("HTTP 404: Not Found (repos/a/b)"),
            VaultError::NotFound(_)
        ));
        assert!(matches!(
            classify_gh_failure("HTTP 502: Bad Gateway"),
            VaultError::Network(_)
        ));
        assert!(matches!(
            classify_gh_failure("connection refused"),
            VaultError::Network(_)
        ));
        assert!(matches!(
            classify_gh_failure("API rate limit exceeded"),
            VaultError::Network(_)
        ));
        assert!(matches!(
            classify_gh_failure("something unexpected"),
            VaultError::Process(_)
        ));
    }

    #[test]
    fn test_issue_document_parses_gh_output() {
        let json = r#"[{
            "number": 7,
            "title": "Crash on startup",
            "body": "Stack trace attached",
            "state": "OPEN",
            "author": {"login": "alice"},
            "assignees": [{"login": "bob"}],
            "labels": [{"name": "bug", "color": "d73a4a"}],
            "createdAt": "2024-01-15T10:00:00Z",
            "updatedAt": "2024-01-16T09:30:00Z",
            "comments": [
                {"author": {"login": "bob"}, "body": "Looking into it", "createdAt": "2024-01-15T11:00:00Z"}
            ]
        }]"#;
        let issues: Vec<Issue> = serde_json::from_str(json).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].number, 7);
        assert_eq!(issues[0].comments.len(), 1);
        assert_eq!(issues[0].labels[0].name, "bug");
    }

    #[test]
    fn test_pull_document_parses_reviews() {
        let json = r#"[{
            "number": 12,
            "title": "Add feature",
            "state": "MERGED",
            "mergedAt": "2024-02-01T12:00:00Z",
            "reviews": [{"author": {"login": "carol"}, "state": "APPROVED", "body": ""}]
        }]"#;
        let pulls: Vec<PullRequest> = serde_json::from_str(json).unwrap();
        assert_eq!(pulls[0].reviews.len(), 1);
        assert_eq!(pulls[0].reviews[0].state, "APPROVED");
    }

    #[test]
    fn test_release_document_parses() {
        let json = r#"[{
            "tagName": "v1.0.0",
            "name": "First release",
            "isDraft": false,
            "isPrerelease": false,
            "createdAt": "2024-03-01T00:00:00Z",
            "publishedAt": "2024-03-01T01:00:00Z"
        }]"#;
        let releases: Vec<Release> = serde_json::from_str(json).unwrap();
        assert_eq!(releases[0].tag_name, "v1.0.0");
        assert!(!releases[0].is_draft);
    }

    #[test]
    fn test_repo_settings_parse_rest_shape() {
        let json = r#"{
            "name": "demo",
            "full_name": "octocat/demo",
            "description": null,
            "private": false,
            "default_branch": "main",
            "topics": ["backup", "git"]
        }"#;
        let settings: RepoSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.name, "demo");
        assert_eq!(settings.default_branch.as_deref(), Some("main"));
        assert_eq!(settings.topics.len(), 2);
    }

    #[test]
    fn test_write_document_never_writes_through_hard_links() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("current");
        let staged = dir.path().join("staging");
        std::fs::create_dir_all(&live).unwrap();
        std::fs::write(live.join(ISSUES_FILE), r#"["old"]"#).unwrap();
        crate::fsutil::link_or_copy_dir(&live, &staged).unwrap();

        write_document(&staged, ISSUES_FILE, &vec!["new".to_string()]).unwrap();

        // The live copy keeps its content; only the staged file changed
        let live_doc = std::fs::read_to_string(live.join(ISSUES_FILE)).unwrap();
        assert_eq!(live_doc, r#"["old"]"#);
        let staged_doc: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(staged.join(ISSUES_FILE)).unwrap())
                .unwrap();
        assert_eq!(staged_doc, vec!["new".to_string()]);
    }

    #[test]
    #[cfg(unix)]
    fn test_every_retry_attempt_consults_rate_budget() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let probes = dir.path().join("probes");
        // Quota probe logs each call; everything else fails transiently
        let script = format!(
            r#"#!/bin/sh
if [ "$1 $2" = "api rate_limit" ]; then
    echo probe >> "{probes}"
    echo '{{"resources":{{"core":{{"remaining":0,"reset":0}}}}}}'
    exit 0
fi
echo "connection refused" >&2
exit 1
"#,
            probes = probes.display()
        );
        let gh = dir.path().join("gh");
        std::fs::write(&gh, script).unwrap();
        std::fs::set_permissions(&gh, std::fs::Permissions::from_mode(0o755)).unwrap();

        let settings = Settings {
            max_retries: 1,
            backoff_base_ms: 1,
            gh_path: gh.to_string_lossy().into_owned(),
            ..Settings::default()
        };
        let fetcher = MetadataFetcher::new(&settings);
        let outcome = fetcher.category(dir.path(), ISSUES_FILE, || {
            fetcher.client.list_issues("octocat/demo").map(with_len)
        });

        assert!(matches!(outcome, CategoryOutcome::Failed(_)));
        // One gate per attempt: initial try plus one retry
        let probes = std::fs::read_to_string(&probes).unwrap();
        assert_eq!(probes.lines().count(), 2);
    }

    #[test]
    fn test_bundle_failures_isolated() {
        let bundle = MetadataBundle {
            repository: CategoryOutcome::Fetched(1),
            issues: CategoryOutcome::Failed("HTTP 500".into()),
            pulls: CategoryOutcome::Fetched(3),
            releases: CategoryOutcome::Empty,
        };
        assert!(!bundle.all_ok());
        let failures = bundle.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].starts_with("issues:"));
    }
}
