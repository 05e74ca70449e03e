//! Preflight checks for forksync
//!
//! Verifies that git, credentials and the fork's working copy are in place
//! before a scheduled sync runs.

use std::path::Path;
use std::process::Command;

use crate::github::detect_authentication;
use crate::Config;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// GitHub credential status
    pub github_auth: CheckResult,
    /// Fork working copy and its upstream remote
    pub repository: CheckResult,
    /// Customization patch presence (warning only, not required)
    pub patch: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..Self::ok(message)
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks
    pub fn run(config: &Config) -> Self {
        let repo_path = Path::new(&config.sync.repo_path);

        Self {
            git: Self::check_git(),
            github_auth: Self::check_github_auth(config),
            repository: Self::check_repository(repo_path, &config.sync.upstream_remote),
            patch: Self::check_patch(repo_path, &config.sync.patch_path),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.git.passed && self.github_auth.passed && self.repository.passed
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, result)| result)
            .filter(|r| r.is_warning)
            .collect()
    }

    fn check_git() -> CheckResult {
        match Command::new("git").arg("--version").output() {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                CheckResult::ok_with_details("Git installed", version.trim().to_string())
            }
            Ok(_) => CheckResult::error_with_details("Git command failed", "git --version exited non-zero"),
            Err(_) => CheckResult::error_with_details(
                "Git not found in PATH",
                "Install git: https://git-scm.com/downloads",
            ),
        }
    }

    fn check_github_auth(config: &Config) -> CheckResult {
        match detect_authentication(config) {
            Ok((strategy, _)) => {
                CheckResult::ok_with_details("GitHub credentials found", format!("{:?}", strategy))
            }
            Err(e) => CheckResult::error_with_details("GitHub credentials missing", e.to_string()),
        }
    }

    fn check_repository(repo_path: &Path, upstream_remote: &str) -> CheckResult {
        if !repo_path.join(".git").exists() {
            return CheckResult::error_with_details(
                "Fork working copy not found",
                format!("{} is not a git repository", repo_path.display()),
            );
        }

        let output = Command::new("git")
            .args(["remote", "get-url", upstream_remote])
            .current_dir(repo_path)
            .output();

        match output {
            Ok(output) if output.status.success() => CheckResult::ok_with_details(
                format!("Upstream remote '{}' configured", upstream_remote),
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ),
            _ => CheckResult::error_with_details(
                format!("Upstream remote '{}' missing", upstream_remote),
                format!("Run: git remote add {} <upstream-url>", upstream_remote),
            ),
        }
    }

    fn check_patch(repo_path: &Path, patch_path: &str) -> CheckResult {
        let patch = repo_path.join(patch_path);
        if patch.is_file() {
            CheckResult::ok_with_details("Customization patch present", patch.display().to_string())
        } else {
            CheckResult::warning_with_details(
                "No customization patch",
                format!(
                    "{} not found; syncs will report a failure issue unless sync.allow_missing_patch is set",
                    patch.display()
                ),
            )
        }
    }

    /// Get all checks for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 4] {
        [
            ("Git Installation", &self.git),
            ("GitHub Authentication", &self.github_auth),
            ("Fork Repository", &self.repository),
            ("Customization Patch", &self.patch),
        ]
    }
}
