use anyhow::{anyhow, Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

/// Handle on a fork's working copy; every git operation runs inside it
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
}

/// A tag as advertised by a remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTag {
    pub name: String,
    pub commit: String,
}

/// Result of merging a revision into the current branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// Merge committed (or was already up to date)
    Merged,
    /// Merge stopped on conflicts and was aborted
    Conflicted { paths: Vec<String> },
}

/// Result of `git apply --check`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchCheck {
    Applies,
    Rejected { reason: String },
}

impl GitRepo {
    /// Open an existing working copy
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.join(".git").exists() {
            return Err(anyhow!("Not a git repository: {}", path.display()));
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tags present in the local repository
    pub async fn list_tags(&self) -> Result<Vec<String>> {
        let stdout = self.run_checked(["tag", "--list"]).await?;

        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Fetch every tag from `remote` into `refs/<namespace>/`, leaving `refs/tags` alone
    pub async fn fetch_tags(&self, remote: &str, namespace: &str) -> Result<()> {
        info!("Fetching tags from {} into refs/{}", remote, namespace);
        let refspec = format!("+refs/tags/*:refs/{}/*", namespace);
        self.run_checked(["fetch", "--no-tags", remote, refspec.as_str()])
            .await?;
        Ok(())
    }

    /// Tags advertised by `remote`, with the commits they point at
    pub async fn remote_tags(&self, remote: &str) -> Result<Vec<RemoteTag>> {
        let stdout = self
            .run_checked(["ls-remote", "--tags", "--refs", remote])
            .await?;

        Ok(parse_ls_remote_tags(&stdout))
    }

    pub async fn current_branch(&self) -> Result<Option<String>> {
        let output = self.run(["branch", "--show-current"]).await?;

        if output.status.success() && !output.stdout.is_empty() {
            let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(Some(branch))
        } else {
            Ok(None)
        }
    }

    /// Point `branch` at `start_point` and switch to it, resetting a leftover branch
    pub async fn create_branch(&self, branch: &str, start_point: &str) -> Result<()> {
        for name in [branch, start_point] {
            if name.starts_with('-') {
                return Err(anyhow!("Invalid ref name (starts with '-'): {}", name));
            }
        }

        debug!("Creating branch {} from {}", branch, start_point);
        self.run_checked(["checkout", "-B", branch, start_point])
            .await?;
        Ok(())
    }

    /// Merge `revision` into the current branch without opening an editor.
    ///
    /// A conflicting merge is aborted before returning, so the working tree is
    /// left as it was. Failures that leave no unmerged paths are errors.
    pub async fn merge(&self, revision: &str) -> Result<MergeResult> {
        let output = self.run(["merge", "--no-edit", revision]).await?;

        if output.status.success() {
            info!("Merged {} cleanly", revision);
            return Ok(MergeResult::Merged);
        }

        let paths = self.conflicted_paths().await?;
        if paths.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Git merge of {} failed: {}", revision, stderr.trim()));
        }

        warn!(
            "Merge of {} conflicts in {} file(s), aborting",
            revision,
            paths.len()
        );
        self.abort_merge().await?;

        Ok(MergeResult::Conflicted { paths })
    }

    pub async fn abort_merge(&self) -> Result<()> {
        self.run_checked(["merge", "--abort"]).await?;
        Ok(())
    }

    /// Paths left unmerged by an interrupted merge
    pub async fn conflicted_paths(&self) -> Result<Vec<String>> {
        let stdout = self
            .run_checked(["diff", "--name-only", "--diff-filter=U"])
            .await
            .context("Failed to check for merge conflicts")?;

        Ok(stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn has_uncommitted_changes(&self) -> Result<bool> {
        let stdout = self
            .run_checked(["status", "--porcelain"])
            .await
            .context("Failed to check git status")?;

        Ok(!stdout.trim().is_empty())
    }

    /// Dry-run a patch against the working tree
    pub async fn check_patch(&self, patch: &Path) -> Result<PatchCheck> {
        let output = self
            .run([OsStr::new("apply"), OsStr::new("--check"), patch.as_os_str()])
            .await?;

        if output.status.success() {
            Ok(PatchCheck::Applies)
        } else {
            let reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!("Patch {} does not apply: {}", patch.display(), reason);
            Ok(PatchCheck::Rejected { reason })
        }
    }

    pub async fn apply_patch(&self, patch: &Path) -> Result<()> {
        self.run_checked([OsStr::new("apply"), patch.as_os_str()])
            .await
            .with_context(|| format!("Failed to apply patch {}", patch.display()))?;

        info!("Applied patch {}", patch.display());
        Ok(())
    }

    /// Stage everything and commit it. Returns false when there was nothing to commit.
    pub async fn commit_all(&self, message: &str) -> Result<bool> {
        if !self.has_uncommitted_changes().await? {
            return Ok(false);
        }

        self.run_checked(["add", "--all"]).await?;
        self.run_checked(["commit", "--no-verify", "-m", message])
            .await?;

        Ok(true)
    }

    pub async fn push_branch(&self, remote: &str, branch: &str) -> Result<()> {
        info!("Pushing {} to {}", branch, remote);
        self.run_checked(["push", remote, branch]).await?;
        Ok(())
    }

    async fn run<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();

        AsyncCommand::new("git")
            .args(&args)
            .current_dir(&self.path)
            .output()
            .await
            .with_context(|| format!("Failed to execute git {}", describe(&args)))
    }

    /// Run git and return stdout, failing on a non-zero exit
    async fn run_checked<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        let output = self.run(&args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Git {} failed: {}",
                describe(&args),
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn describe(args: &[std::ffi::OsString]) -> String {
    args.iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse `git ls-remote --tags --refs` output ("<sha>\trefs/tags/<name>")
pub fn parse_ls_remote_tags(output: &str) -> Vec<RemoteTag> {
    output
        .lines()
        .filter_map(|line| {
            let (commit, reference) = line.split_once('\t')?;
            let name = reference.trim().strip_prefix("refs/tags/")?;
            Some(RemoteTag {
                name: name.to_string(),
                commit: commit.trim().to_string(),
            })
        })
        .collect()
}
