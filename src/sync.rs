//! Sync Sequencer - Brings a new upstream release into the fork
//!
//! One invocation lists upstream tags, picks the newest release the fork
//! does not have yet (the fork's own `refs/tags`), fetches upstream tags into
//! `refs/upstream-tags/` so they never leak into that set, merges it on a dedicated branch, reapplies the fork's
//! customization patch and reports the result as either a pull request or a
//! failure issue. Conflicts and rejected patches are outcomes, not errors:
//! they end up in the issue. Anything else (git or platform failures)
//! propagates to the caller.

use anyhow::{Context, Result};
use chrono::Utc;
use path_clean::PathClean;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::git::{GitRepo, MergeResult, PatchCheck, RemoteTag};
use crate::github::{CreatedItem, NewIssue, NewPullRequest, Platform};

/// Ref namespace upstream tags are fetched into
pub const UPSTREAM_TAG_NAMESPACE: &str = "upstream-tags";

/// A release published by upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTag {
    pub name: String,
    pub commit: String,
}

impl ReleaseTag {
    pub fn new(name: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commit: commit.into(),
        }
    }
}

impl From<RemoteTag> for ReleaseTag {
    fn from(tag: RemoteTag) -> Self {
        Self::new(tag.name, tag.commit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    Clean,
    Conflicts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStatus {
    /// No customization patch in the repository
    NotApplicable,
    Success,
    Failed,
}

impl fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MergeStatus::Clean => "clean",
            MergeStatus::Conflicts => "conflicts",
        })
    }
}

impl fmt::Display for PatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PatchStatus::NotApplicable => "not_applicable",
            PatchStatus::Success => "success",
            PatchStatus::Failed => "failed",
        })
    }
}

/// What happened when a release was merged and patched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub tag: ReleaseTag,
    pub branch: String,
    pub merge_status: MergeStatus,
    pub patch_status: PatchStatus,
    pub conflicted_paths: Vec<String>,
    pub patch_error: Option<String>,
}

impl SyncOutcome {
    /// Whether this outcome warrants a pull request rather than an issue
    pub fn is_pr_eligible(&self, allow_missing_patch: bool) -> bool {
        self.merge_status == MergeStatus::Clean
            && match self.patch_status {
                PatchStatus::Success => true,
                PatchStatus::NotApplicable => allow_missing_patch,
                PatchStatus::Failed => false,
            }
    }
}

/// Final result of one sync invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    /// Upstream advertises no (matching) release tags
    NoReleases,
    /// The latest release is already in the fork
    UpToDate { tag: ReleaseTag },
    /// Dry run: the release that would be synchronized
    NewRelease { tag: ReleaseTag },
    PullRequestOpened {
        outcome: SyncOutcome,
        pull_request: CreatedItem,
        merged: bool,
    },
    IssueOpened {
        outcome: SyncOutcome,
        issue: CreatedItem,
    },
}

/// Sequencer settings, resolved from configuration
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub upstream_remote: String,
    pub push_remote: String,
    pub base_branch: String,
    pub patch_path: PathBuf,
    pub branch_prefix: String,
    pub tag_pattern: Option<Regex>,
    pub auto_merge: bool,
    pub allow_missing_patch: bool,
    pub dry_run: bool,
}

impl SyncSettings {
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let tag_pattern = config
            .tag_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("Invalid tag pattern")?;

        Ok(Self {
            upstream_remote: config.upstream_remote.clone(),
            push_remote: config.push_remote.clone(),
            base_branch: config.base_branch.clone(),
            patch_path: PathBuf::from(&config.patch_path),
            branch_prefix: config.branch_prefix.clone(),
            tag_pattern,
            auto_merge: config.auto_merge,
            allow_missing_patch: config.allow_missing_patch,
            dry_run: false,
        })
    }

    pub fn branch_name(&self, tag: &str) -> String {
        format!("{}{}", self.branch_prefix, tag)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            upstream_remote: "upstream".to_string(),
            push_remote: "origin".to_string(),
            base_branch: "main".to_string(),
            patch_path: PathBuf::from(".github/patches/customizations.patch"),
            branch_prefix: "sync/".to_string(),
            tag_pattern: None,
            auto_merge: false,
            allow_missing_patch: false,
            dry_run: false,
        }
    }
}

/// Pick the release with the greatest tag name.
///
/// Names are compared as plain strings, so `v1.9.0` ranks above `v1.10.0`.
pub fn select_latest_tag<'a>(
    tags: &'a [ReleaseTag],
    pattern: Option<&Regex>,
) -> Option<&'a ReleaseTag> {
    tags.iter()
        .filter(|tag| pattern.map_or(true, |re| re.is_match(&tag.name)))
        .max_by(|a, b| a.name.cmp(&b.name))
}

/// Drives one sync attempt against a working copy and a platform
pub struct SyncSequencer<'a> {
    repo: &'a GitRepo,
    platform: &'a dyn Platform,
    settings: SyncSettings,
}

impl<'a> SyncSequencer<'a> {
    pub fn new(repo: &'a GitRepo, platform: &'a dyn Platform, settings: SyncSettings) -> Self {
        Self {
            repo,
            platform,
            settings,
        }
    }

    /// Run the whole sequence: detect, merge, patch, report
    pub async fn run(&self) -> Result<SyncReport> {
        let upstream = &self.settings.upstream_remote;

        let fork_tags: HashSet<String> = self
            .repo
            .list_tags()
            .await
            .context("Failed to list fork tags")?
            .into_iter()
            .collect();
        debug!("Fork has {} tags", fork_tags.len());

        let upstream_tags: Vec<ReleaseTag> = self
            .repo
            .remote_tags(upstream)
            .await
            .with_context(|| format!("Failed to list tags of {}", upstream))?
            .into_iter()
            .map(ReleaseTag::from)
            .collect();

        let Some(latest) = select_latest_tag(&upstream_tags, self.settings.tag_pattern.as_ref())
        else {
            info!("{} has no release tags", upstream);
            return Ok(SyncReport::NoReleases);
        };
        let latest = latest.clone();

        if fork_tags.contains(&latest.name) {
            info!("Fork already has release {}", latest.name);
            return Ok(SyncReport::UpToDate { tag: latest });
        }

        info!("New upstream release detected: {}", latest.name);

        if self.settings.dry_run {
            return Ok(SyncReport::NewRelease { tag: latest });
        }

        self.repo
            .fetch_tags(upstream, UPSTREAM_TAG_NAMESPACE)
            .await
            .with_context(|| format!("Failed to fetch tags from {}", upstream))?;

        let outcome = self.attempt(latest).await?;
        self.report(outcome).await
    }

    /// Branch, merge and patch; conflicts and rejected patches are recorded, not raised.
    ///
    /// Expects upstream tags already fetched into `refs/upstream-tags/`, as [`Self::run`] does.
    pub async fn attempt(&self, tag: ReleaseTag) -> Result<SyncOutcome> {
        let branch = self.settings.branch_name(&tag.name);
        self.repo
            .create_branch(&branch, &self.settings.base_branch)
            .await
            .with_context(|| {
                format!(
                    "Failed to create branch {} from {}",
                    branch, self.settings.base_branch
                )
            })?;

        let revision = format!("refs/{}/{}", UPSTREAM_TAG_NAMESPACE, tag.name);
        let (merge_status, conflicted_paths) = match self.repo.merge(&revision).await? {
            MergeResult::Merged => (MergeStatus::Clean, Vec::new()),
            MergeResult::Conflicted { paths } => (MergeStatus::Conflicts, paths),
        };

        let patch = self.repo.path().join(&self.settings.patch_path).clean();
        let (patch_status, patch_error) = if !patch.is_file() {
            debug!("No customization patch at {}", patch.display());
            (PatchStatus::NotApplicable, None)
        } else {
            match self.repo.check_patch(&patch).await? {
                // Conflicted syncs end in an issue: check only, keep the tree clean
                PatchCheck::Applies if merge_status == MergeStatus::Conflicts => {
                    debug!("Patch applies but merge conflicted, leaving tree untouched");
                    (PatchStatus::Success, None)
                }
                PatchCheck::Applies => {
                    self.repo.apply_patch(&patch).await?;
                    (PatchStatus::Success, None)
                }
                PatchCheck::Rejected { reason } => {
                    warn!("Customization patch no longer applies: {}", reason);
                    (PatchStatus::Failed, Some(reason))
                }
            }
        };

        info!(
            "Release {}: merge {}, patch {}",
            tag.name, merge_status, patch_status
        );

        Ok(SyncOutcome {
            tag,
            branch,
            merge_status,
            patch_status,
            conflicted_paths,
            patch_error,
        })
    }

    /// Open exactly one of: a pull request for a good outcome, an issue otherwise
    pub async fn report(&self, outcome: SyncOutcome) -> Result<SyncReport> {
        if !outcome.is_pr_eligible(self.settings.allow_missing_patch) {
            let issue = self.platform.create_issue(&failure_issue(&outcome)).await?;
            return Ok(SyncReport::IssueOpened { outcome, issue });
        }

        if outcome.patch_status == PatchStatus::Success {
            let message = format!(
                "Apply customizations for upstream release {}",
                outcome.tag.name
            );
            self.repo.commit_all(&message).await?;
        }

        self.repo
            .push_branch(&self.settings.push_remote, &outcome.branch)
            .await?;

        let pull_request = self
            .platform
            .create_pull_request(&sync_pull_request(&outcome, &self.settings.base_branch))
            .await?;

        let merged = if self.settings.auto_merge {
            self.platform
                .merge_pull_request(pull_request.number)
                .await?;
            true
        } else {
            false
        };

        Ok(SyncReport::PullRequestOpened {
            outcome,
            pull_request,
            merged,
        })
    }
}

/// Pull request announcing a successfully synchronized release
pub fn sync_pull_request(outcome: &SyncOutcome, base_branch: &str) -> NewPullRequest {
    let tag = &outcome.tag;

    NewPullRequest {
        title: format!("Sync: Upstream release {}", tag.name),
        body: format!(
            "This PR synchronizes our fork with upstream release {}\n\n\
             - Upstream commit: `{}`\n\
             - Merge Status: {}\n\
             - Patch Status: {}\n",
            tag.name, tag.commit, outcome.merge_status, outcome.patch_status
        ),
        head: outcome.branch.clone(),
        base: base_branch.to_string(),
    }
}

/// Issue asking for manual help with a release that could not be synchronized
pub fn failure_issue(outcome: &SyncOutcome) -> NewIssue {
    let tag = &outcome.tag;
    let mut body = format!(
        "Synchronization with upstream release {} failed.\n\n\
         Merge Status: {}\n\
         Patch Status: {}\n",
        tag.name, outcome.merge_status, outcome.patch_status
    );

    if !outcome.conflicted_paths.is_empty() {
        body.push_str("\nConflicting files:\n");
        for path in &outcome.conflicted_paths {
            body.push_str(&format!("- `{}`\n", path));
        }
    }

    if let Some(error) = &outcome.patch_error {
        body.push_str(&format!("\nPatch check output:\n```\n{}\n```\n", error));
    }

    body.push_str(&format!(
        "\nManual intervention is required to merge `{}` and reapply the customization patch.\n\
         Attempted at {}.\n",
        tag.name,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ));

    NewIssue {
        title: format!("⚠️ Sync failed for release {}", tag.name),
        body,
    }
}
