use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use std::env;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::config::{parse_repository, Config};

/// Status of a workflow run as reported by the Actions API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Requested,
    Queued,
    Pending,
    Waiting,
    InProgress,
    Completed,
    #[serde(other)]
    Unknown,
}

/// A single workflow run, reduced to the fields the poller reads
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowRun {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_title: Option<String>,
    #[serde(default)]
    pub head_branch: Option<String>,
    #[serde(default)]
    pub event: String,
    pub status: RunStatus,
    pub conclusion: Option<String>, // "success", "failure", "cancelled", ...
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunList {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Serialize)]
struct ListRunsParams<'a> {
    event: &'a str,
    per_page: u8,
}

/// Pull request to be opened on the fork
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// Issue to be opened on the fork
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
}

/// Number and link of a pull request or issue the platform created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedItem {
    pub number: u64,
    pub url: Option<String>,
}

/// Hosting platform operations used by the poller and the sync sequencer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Platform: Send + Sync {
    /// List workflow runs triggered by `event`, newest first
    async fn list_workflow_runs(&self, event: &str) -> Result<Vec<WorkflowRun>>;

    /// Open a pull request
    async fn create_pull_request(&self, pr: &NewPullRequest) -> Result<CreatedItem>;

    /// Merge an open pull request
    async fn merge_pull_request(&self, number: u64) -> Result<()>;

    /// Open an issue
    async fn create_issue(&self, issue: &NewIssue) -> Result<CreatedItem>;
}

/// GitHub client bound to a single repository
pub struct GitHubClient {
    client: Octocrab,
    owner: String,
    repo: String,
}

/// GitHub authentication strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Use GitHub CLI authentication
    GitHubCLI,
    /// Use environment variable token
    EnvironmentToken,
}

impl GitHubClient {
    /// Create a client for `repository` ("owner/name") authenticated with `token`
    pub fn new(token: String, repository: &str, api_url: Option<&str>) -> Result<Self> {
        let (owner, repo) = parse_repository(repository)?;

        let mut builder = Octocrab::builder().personal_token(token);
        if let Some(url) = api_url {
            builder = builder
                .base_uri(url)
                .with_context(|| format!("Invalid GitHub API url: {}", url))?;
        }

        let client = builder.build().context("Failed to create GitHub client")?;

        debug!("GitHub client ready for {}/{}", owner, repo);
        Ok(Self {
            client,
            owner,
            repo,
        })
    }

    /// Resolve credentials from config and create a client for `repository`
    pub fn from_config(config: &Config, repository: &str) -> Result<Self> {
        let (auth_strategy, token) = detect_authentication(config)?;
        info!("Using authentication strategy: {:?}", auth_strategy);

        Self::new(token, repository, config.github.api_url.as_deref())
    }

    /// The repository this client acts on, as "owner/name"
    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[async_trait]
impl Platform for GitHubClient {
    async fn list_workflow_runs(&self, event: &str) -> Result<Vec<WorkflowRun>> {
        let route = format!("/repos/{}/{}/actions/runs", self.owner, self.repo);
        let params = ListRunsParams {
            event,
            per_page: 100,
        };

        let list: WorkflowRunList = self
            .client
            .get(&route, Some(&params))
            .await
            .with_context(|| format!("Failed to list workflow runs for {}", self.repository()))?;

        debug!(
            "Fetched {} {} runs for {}",
            list.workflow_runs.len(),
            event,
            self.repository()
        );
        Ok(list.workflow_runs)
    }

    async fn create_pull_request(&self, pr: &NewPullRequest) -> Result<CreatedItem> {
        let created = self
            .client
            .pulls(&self.owner, &self.repo)
            .create(&pr.title, &pr.head, &pr.base)
            .body(&pr.body)
            .send()
            .await
            .with_context(|| format!("Failed to create pull request from {}", pr.head))?;

        info!("Created pull request #{}: {}", created.number, pr.title);
        Ok(CreatedItem {
            number: created.number,
            url: created.html_url.map(|url| url.to_string()),
        })
    }

    async fn merge_pull_request(&self, number: u64) -> Result<()> {
        self.client
            .pulls(&self.owner, &self.repo)
            .merge(number)
            .send()
            .await
            .with_context(|| format!("Failed to merge pull request #{}", number))?;

        info!("Merged pull request #{}", number);
        Ok(())
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<CreatedItem> {
        let created = self
            .client
            .issues(&self.owner, &self.repo)
            .create(&issue.title)
            .body(&issue.body)
            .send()
            .await
            .with_context(|| format!("Failed to create issue: {}", issue.title))?;

        info!("Created issue #{}: {}", created.number, issue.title);
        Ok(CreatedItem {
            number: created.number,
            url: Some(created.html_url.to_string()),
        })
    }
}

/// Detect and obtain GitHub authentication
pub fn detect_authentication(config: &Config) -> Result<(AuthStrategy, String)> {
    match config.github.auth_method.as_str() {
        "auto" => {
            // Environment token first: that is what CI provides
            if let Ok(token) = try_environment_token() {
                Ok((AuthStrategy::EnvironmentToken, token))
            } else if let Ok(token) = try_github_cli() {
                Ok((AuthStrategy::GitHubCLI, token))
            } else {
                Err(anyhow!(
                    "No GitHub authentication found. Please either:\n\
                     1. Set GITHUB_TOKEN environment variable\n\
                     2. Install and authenticate GitHub CLI: gh auth login"
                ))
            }
        }
        "gh_cli" => {
            let token =
                try_github_cli().context("GitHub CLI authentication failed. Run: gh auth login")?;
            Ok((AuthStrategy::GitHubCLI, token))
        }
        "token" => {
            let token = try_environment_token()
                .context("GITHUB_TOKEN environment variable not found or invalid")?;
            Ok((AuthStrategy::EnvironmentToken, token))
        }
        other => Err(anyhow!("Unknown auth method: {}", other)),
    }
}

/// Try to get token from GitHub CLI
fn try_github_cli() -> Result<String> {
    debug!("Attempting GitHub CLI authentication");

    if !is_command_available("gh") {
        return Err(anyhow!("GitHub CLI (gh) is not installed"));
    }

    let token_output = Command::new("gh")
        .args(["auth", "token"])
        .output()
        .context("Failed to get GitHub CLI token")?;

    if !token_output.status.success() {
        return Err(anyhow!(
            "Failed to retrieve token from GitHub CLI: {}",
            String::from_utf8_lossy(&token_output.stderr)
        ));
    }

    let token = String::from_utf8(token_output.stdout)
        .context("GitHub CLI token is not valid UTF-8")?
        .trim()
        .to_string();

    if token.is_empty() {
        return Err(anyhow!("GitHub CLI returned empty token"));
    }

    debug!("Successfully obtained token from GitHub CLI");
    Ok(token)
}

/// Try to get token from environment variable
fn try_environment_token() -> Result<String> {
    debug!("Attempting environment variable authentication");

    let token = env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable not set")?;

    if token.is_empty() {
        return Err(anyhow!("GITHUB_TOKEN is empty"));
    }

    if !looks_like_github_token(&token) {
        warn!("GITHUB_TOKEN doesn't look like a GitHub token (expected a ghp_, gho_, ghs_ or github_pat_ prefix)");
    }

    debug!("Successfully found GITHUB_TOKEN environment variable");
    Ok(token)
}

fn looks_like_github_token(token: &str) -> bool {
    ["ghp_", "gho_", "ghs_", "ghu_", "github_pat_"]
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

/// Check if a command is available in PATH
pub(crate) fn is_command_available(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}
