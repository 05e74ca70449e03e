//! forksync - Keeps a customized fork in step with upstream releases
//!
//! forksync watches an upstream repository for new release tags, merges each
//! new release into the fork on its own branch, reapplies the fork's
//! customization patch and reports the result on GitHub.
//!
//! ## Core Features
//!
//! - **Release Sync**: Tag detection, merge-or-abort and patch reapplication
//! - **Reporting**: A pull request for clean syncs, an issue when a human is needed
//! - **Workflow Polling**: Wait for a dispatched GitHub Actions run to conclude
//! - **Configuration Management**: YAML-based configuration with XDG compliance
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`git`]: Working copy handle over the git executable
//! - [`github`]: GitHub API integration and authentication
//! - [`sync`]: The release sync sequence
//! - [`poll`]: The workflow run poller
//! - [`health`]: Preflight checks behind `forksync doctor`

pub mod config;
pub mod git;
pub mod github;
pub mod health;
pub mod logging;
pub mod poll;
pub mod sync;

pub use config::Config;
pub use git::GitRepo;
pub use github::{GitHubClient, Platform};
pub use health::HealthCheck;
pub use poll::{PollOutcome, PollRequest, WorkflowPoller};
pub use sync::{SyncReport, SyncSequencer, SyncSettings};
