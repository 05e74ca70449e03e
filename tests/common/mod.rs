//! Common test utilities and helpers for forksync tests
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use forksync::github::{CreatedItem, NewIssue, NewPullRequest, Platform, WorkflowRun};
use forksync::GitRepo;

pub const PATCH_PATH: &str = ".github/patches/customizations.patch";

/// Patch that adds a file nobody upstream touches
pub const NEW_FILE_PATCH: &str = "\
diff --git a/custom_feature.txt b/custom_feature.txt
new file mode 100644
--- /dev/null
+++ b/custom_feature.txt
@@ -0,0 +1 @@
+Fork-only feature
";

/// Patch that edits the README heading
pub const README_PATCH: &str = "\
diff --git a/README.md b/README.md
--- a/README.md
+++ b/README.md
@@ -1 +1 @@
-# Upstream project
+# Upstream project (customized)
";

/// Run git in `dir`, panicking with its stderr on failure
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to execute git");

    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn configure_identity(dir: &Path) {
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test User"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    git(dir, &["config", "tag.gpgsign", "false"]);
}

fn commit_file(dir: &Path, file: &str, contents: &str, message: &str) {
    let path = dir.join(file);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create directories");
    }
    fs::write(&path, contents).expect("Failed to write file");
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", message]);
}

/// An upstream repository, a bare fork on the "hosting side" and the fork's working copy.
///
/// The fork is cloned from upstream at `v1.0.0` and carries one commit of its own
/// (`custom.txt`). Its remotes are `upstream` and `origin` (the bare fork).
pub struct ForkFixture {
    pub root: TempDir,
    pub upstream: PathBuf,
    pub fork_remote: PathBuf,
    pub fork: PathBuf,
}

impl ForkFixture {
    pub fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        let upstream = root.path().join("upstream");
        let fork_remote = root.path().join("fork.git");
        let fork = root.path().join("fork");

        fs::create_dir_all(&upstream).expect("Failed to create upstream dir");
        git(&upstream, &["init", "-q"]);
        git(&upstream, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        configure_identity(&upstream);
        commit_file(&upstream, "README.md", "# Upstream project\n", "Initial commit");
        git(&upstream, &["tag", "v1.0.0"]);

        git(
            root.path(),
            &["init", "-q", "--bare", fork_remote.to_str().expect("utf-8 path")],
        );
        git(
            root.path(),
            &[
                "clone",
                "-q",
                upstream.to_str().expect("utf-8 path"),
                fork.to_str().expect("utf-8 path"),
            ],
        );
        configure_identity(&fork);
        git(&fork, &["remote", "rename", "origin", "upstream"]);
        git(
            &fork,
            &["remote", "add", "origin", fork_remote.to_str().expect("utf-8 path")],
        );
        commit_file(&fork, "custom.txt", "Custom feature\n", "Add custom feature");
        git(&fork, &["push", "-q", "origin", "main"]);

        Self {
            root,
            upstream,
            fork_remote,
            fork,
        }
    }

    /// Commit a customization patch to the fork
    pub fn with_patch(self, patch: &str) -> Self {
        commit_file(&self.fork, PATCH_PATH, patch, "Add customization patch");
        self
    }

    /// Publish an upstream release that touches `file`
    pub fn release(&self, tag: &str, file: &str, contents: &str) -> &Self {
        commit_file(&self.upstream, file, contents, &format!("Release {}", tag));
        git(&self.upstream, &["tag", tag]);
        self
    }

    /// Publish v1.1.0 and v1.2.0, neither touching fork files
    pub fn with_releases(self) -> Self {
        self.release("v1.1.0", "feature_a.txt", "Feature A\n");
        self.release("v1.2.0", "feature_b.txt", "Feature B\n");
        self
    }

    pub fn repo(&self) -> GitRepo {
        GitRepo::open(&self.fork).expect("fork working copy")
    }

    /// Head commit of a branch in the bare fork, if it was pushed
    pub fn pushed_branch(&self, branch: &str) -> Option<String> {
        let refs = git(
            &self.fork_remote,
            &["for-each-ref", "--format=%(objectname)", &format!("refs/heads/{}", branch)],
        );
        (!refs.is_empty()).then_some(refs)
    }

    /// Files tracked on a branch of the bare fork
    pub fn pushed_paths(&self, branch: &str) -> Vec<String> {
        git(&self.fork_remote, &["ls-tree", "-r", "--name-only", branch])
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Contents of `file` on a branch of the bare fork
    pub fn pushed_file(&self, branch: &str, file: &str) -> String {
        git(&self.fork_remote, &["show", &format!("{}:{}", branch, file)])
    }
}

/// Platform double that records every call
#[derive(Default)]
pub struct RecordingPlatform {
    pub runs: Vec<WorkflowRun>,
    pub fail_requests: bool,
    pub pull_requests: Mutex<Vec<NewPullRequest>>,
    pub issues: Mutex<Vec<NewIssue>>,
    pub merged: Mutex<Vec<u64>>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_requests: true,
            ..Self::default()
        }
    }

    pub fn pull_requests(&self) -> Vec<NewPullRequest> {
        self.pull_requests.lock().unwrap().clone()
    }

    pub fn issues(&self) -> Vec<NewIssue> {
        self.issues.lock().unwrap().clone()
    }

    pub fn merged(&self) -> Vec<u64> {
        self.merged.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.pull_requests().len() + self.issues().len() + self.merged().len()
    }

    fn check(&self) -> Result<()> {
        if self.fail_requests {
            Err(anyhow!("GitHub API unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn list_workflow_runs(&self, _event: &str) -> Result<Vec<WorkflowRun>> {
        self.check()?;
        Ok(self.runs.clone())
    }

    async fn create_pull_request(&self, pr: &NewPullRequest) -> Result<CreatedItem> {
        self.check()?;
        let mut pull_requests = self.pull_requests.lock().unwrap();
        pull_requests.push(pr.clone());
        let number = pull_requests.len() as u64;
        Ok(CreatedItem {
            number,
            url: Some(format!("https://github.com/me/fork/pull/{}", number)),
        })
    }

    async fn merge_pull_request(&self, number: u64) -> Result<()> {
        self.check()?;
        self.merged.lock().unwrap().push(number);
        Ok(())
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<CreatedItem> {
        self.check()?;
        let mut issues = self.issues.lock().unwrap();
        issues.push(issue.clone());
        let number = 100 + issues.len() as u64;
        Ok(CreatedItem {
            number,
            url: Some(format!("https://github.com/me/fork/issues/{}", number)),
        })
    }
}

/// Assertion helper for multi-line text
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
