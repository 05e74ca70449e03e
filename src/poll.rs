//! Workflow Poller - Waits for a dispatched workflow run to finish
//!
//! The poller never fails: platform errors, failed runs and an exhausted
//! time budget all come back as a [`PollOutcome`] that maps to an exit code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::github::{GitHubClient, Platform, RunStatus, WorkflowRun};

/// Source of time for the polling loop
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time backed by the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How a poll ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded,
    Failed { conclusion: String },
    TimedOut,
    ApiError { message: String },
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Succeeded)
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for PollOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollOutcome::Succeeded => write!(f, "Workflow completed successfully"),
            PollOutcome::Failed { conclusion } => {
                write!(f, "Workflow failed with conclusion: {}", conclusion)
            }
            PollOutcome::TimedOut => {
                write!(f, "Timeout reached while waiting for workflow completion")
            }
            PollOutcome::ApiError { message } => write!(f, "GitHub API error: {}", message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub event: String,
    pub warmup: Duration,
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            event: config.poll.event.clone(),
            warmup: config.warmup(),
            interval: config.poll_interval(),
            timeout: config.poll_timeout(),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Positional arguments of the poller command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    pub workflow_name: String,
    /// Only runs whose title mentions this tag count
    pub tag: Option<String>,
    pub repository: String,
}

pub const POLL_USAGE: &str = "Usage: poll_workflow WORKFLOW_NAME [TAG_NAME] REPO";

impl PollRequest {
    /// Accepts `WORKFLOW_NAME REPO` or `WORKFLOW_NAME TAG_NAME REPO`
    pub fn from_args(args: &[String]) -> Result<Self> {
        match args {
            [workflow_name, repository] => Ok(Self {
                workflow_name: workflow_name.clone(),
                tag: None,
                repository: repository.clone(),
            }),
            [workflow_name, tag, repository] => Ok(Self {
                workflow_name: workflow_name.clone(),
                tag: Some(tag.clone()),
                repository: repository.clone(),
            }),
            _ => Err(anyhow!(
                "Expected 2 or 3 arguments, got {}\n{}",
                args.len(),
                POLL_USAGE
            )),
        }
    }

    fn matches(&self, run: &WorkflowRun) -> bool {
        if run.name != self.workflow_name {
            return false;
        }

        match &self.tag {
            Some(tag) => run
                .display_title
                .as_deref()
                .is_some_and(|title| title.contains(tag.as_str())),
            None => true,
        }
    }
}

pub struct WorkflowPoller<'a> {
    platform: &'a dyn Platform,
    clock: &'a dyn Clock,
    settings: PollSettings,
}

impl<'a> WorkflowPoller<'a> {
    pub fn new(platform: &'a dyn Platform, clock: &'a dyn Clock, settings: PollSettings) -> Self {
        Self {
            platform,
            clock,
            settings,
        }
    }

    /// Wait for the newest run matching `request` to reach a conclusion
    pub async fn poll(&self, request: &PollRequest) -> PollOutcome {
        info!(
            "Waiting {}s for workflow '{}' to register",
            self.settings.warmup.as_secs(),
            request.workflow_name
        );
        self.clock.sleep(self.settings.warmup).await;

        let start = self.clock.now();

        while self.clock.now().duration_since(start) < self.settings.timeout {
            let runs = match self.platform.list_workflow_runs(&self.settings.event).await {
                Ok(runs) => runs,
                Err(e) => {
                    error!("GitHub API error: {:#}", e);
                    return PollOutcome::ApiError {
                        message: format!("{:#}", e),
                    };
                }
            };

            let Some(latest) = runs.iter().find(|run| request.matches(run)) else {
                info!("No matching workflow runs found. Waiting...");
                self.clock.sleep(self.settings.interval).await;
                continue;
            };

            info!(
                "Latest run - Status: {:?}, Conclusion: {}",
                latest.status,
                latest.conclusion.as_deref().unwrap_or("none")
            );

            if latest.status == RunStatus::Completed {
                match latest.conclusion.as_deref() {
                    Some("success") => {
                        info!("Workflow completed successfully");
                        return PollOutcome::Succeeded;
                    }
                    Some(conclusion) if !conclusion.is_empty() => {
                        warn!("Workflow failed with conclusion: {}", conclusion);
                        return PollOutcome::Failed {
                            conclusion: conclusion.to_string(),
                        };
                    }
                    _ => debug!("Run completed without a conclusion yet"),
                }
            }

            self.clock.sleep(self.settings.interval).await;
        }

        warn!("Timeout reached while waiting for workflow completion");
        PollOutcome::TimedOut
    }
}

/// Build a GitHub client for the requested repository and poll it in real time
pub async fn run_poll(config: &Config, request: &PollRequest) -> PollOutcome {
    let client = match GitHubClient::from_config(config, &request.repository) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to set up GitHub client: {:#}", e);
            return PollOutcome::ApiError {
                message: format!("{:#}", e),
            };
        }
    };

    WorkflowPoller::new(&client, &TokioClock, PollSettings::from_config(config))
        .poll(request)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::MockPlatform;
    use assert_matches::assert_matches;
    use std::sync::Mutex;

    struct ManualClock {
        start: Instant,
        elapsed: Mutex<Duration>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                start: Instant::now(),
                elapsed: Mutex::new(Duration::ZERO),
            }
        }

        fn elapsed(&self) -> Duration {
            *self.elapsed.lock().unwrap()
        }
    }

    #[async_trait]
    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.start + self.elapsed()
        }

        async fn sleep(&self, duration: Duration) {
            *self.elapsed.lock().unwrap() += duration;
        }
    }

    fn run(name: &str, status: RunStatus, conclusion: Option<&str>) -> WorkflowRun {
        WorkflowRun {
            id: 1,
            name: name.to_string(),
            display_title: Some(format!("{} v1.2.0", name)),
            head_branch: Some("main".to_string()),
            event: "repository_dispatch".to_string(),
            status,
            conclusion: conclusion.map(str::to_string),
            created_at: None,
            html_url: None,
        }
    }

    fn request(workflow_name: &str) -> PollRequest {
        PollRequest {
            workflow_name: workflow_name.to_string(),
            tag: None,
            repository: "me/fork".to_string(),
        }
    }

    #[tokio::test]
    async fn test_success_after_two_empty_cycles() {
        let mut platform = MockPlatform::new();
        let mut calls = 0;
        platform
            .expect_list_workflow_runs()
            .withf(|event: &str| event == "repository_dispatch")
            .times(3)
            .returning(move |_| {
                calls += 1;
                if calls <= 2 {
                    Ok(vec![])
                } else {
                    Ok(vec![run("Sync", RunStatus::Completed, Some("success"))])
                }
            });

        let clock = ManualClock::new();
        let poller = WorkflowPoller::new(&platform, &clock, PollSettings::default());
        let outcome = poller.poll(&request("Sync")).await;

        assert_eq!(outcome, PollOutcome::Succeeded);
        assert_eq!(outcome.exit_code(), 0);
        // warm-up plus two poll intervals
        assert_eq!(clock.elapsed(), Duration::from_secs(35));
    }

    #[tokio::test]
    async fn test_times_out_when_run_never_completes() {
        let mut platform = MockPlatform::new();
        platform
            .expect_list_workflow_runs()
            .times(30)
            .returning(|_| Ok(vec![run("Sync", RunStatus::InProgress, None)]));

        let clock = ManualClock::new();
        let poller = WorkflowPoller::new(&platform, &clock, PollSettings::default());
        let outcome = poller.poll(&request("Sync")).await;

        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(clock.elapsed(), Duration::from_secs(15 + 300));
    }

    #[tokio::test]
    async fn test_failed_conclusion_stops_polling() {
        let mut platform = MockPlatform::new();
        platform
            .expect_list_workflow_runs()
            .times(1)
            .returning(|_| Ok(vec![run("Sync", RunStatus::Completed, Some("cancelled"))]));

        let clock = ManualClock::new();
        let poller = WorkflowPoller::new(&platform, &clock, PollSettings::default());
        let outcome = poller.poll(&request("Sync")).await;

        assert_matches!(outcome, PollOutcome::Failed { ref conclusion } if conclusion == "cancelled");
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_api_error_becomes_failure() {
        let mut platform = MockPlatform::new();
        platform
            .expect_list_workflow_runs()
            .times(1)
            .returning(|_| Err(anyhow!("Bad credentials")));

        let clock = ManualClock::new();
        let poller = WorkflowPoller::new(&platform, &clock, PollSettings::default());
        let outcome = poller.poll(&request("Sync")).await;

        assert_matches!(outcome, PollOutcome::ApiError { ref message } if message.contains("Bad credentials"));
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_only_latest_matching_run_counts() {
        let mut platform = MockPlatform::new();
        let mut calls = 0;
        platform
            .expect_list_workflow_runs()
            .times(2)
            .returning(move |_| {
                calls += 1;
                let latest = if calls == 1 {
                    run("Sync", RunStatus::Completed, None)
                } else {
                    run("Sync", RunStatus::Completed, Some("success"))
                };
                Ok(vec![
                    run("Other", RunStatus::Completed, Some("failure")),
                    latest,
                    run("Sync", RunStatus::Completed, Some("failure")),
                ])
            });

        let clock = ManualClock::new();
        let poller = WorkflowPoller::new(&platform, &clock, PollSettings::default());

        assert_eq!(poller.poll(&request("Sync")).await, PollOutcome::Succeeded);
        assert_eq!(clock.elapsed(), Duration::from_secs(25));
    }

    #[tokio::test]
    async fn test_tag_filter_uses_run_title() {
        let mut platform = MockPlatform::new();
        platform.expect_list_workflow_runs().returning(|_| {
            let mut other_release = run("Sync", RunStatus::Completed, Some("failure"));
            other_release.display_title = Some("Sync v1.1.0".to_string());
            Ok(vec![
                other_release,
                run("Sync", RunStatus::Completed, Some("success")),
            ])
        });

        let clock = ManualClock::new();
        let poller = WorkflowPoller::new(&platform, &clock, PollSettings::default());

        let mut tagged = request("Sync");
        tagged.tag = Some("v1.2.0".to_string());
        assert_eq!(poller.poll(&tagged).await, PollOutcome::Succeeded);

        // Without the tag the newer failing run wins
        assert_matches!(
            poller.poll(&request("Sync")).await,
            PollOutcome::Failed { .. }
        );
    }

    #[test]
    fn test_request_from_args() {
        let args = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();

        let plain = PollRequest::from_args(&args(&["Sync", "me/fork"])).unwrap();
        assert_eq!(plain.workflow_name, "Sync");
        assert_eq!(plain.tag, None);
        assert_eq!(plain.repository, "me/fork");

        let tagged = PollRequest::from_args(&args(&["Sync", "v1.2.0", "me/fork"])).unwrap();
        assert_eq!(tagged.tag.as_deref(), Some("v1.2.0"));
        assert_eq!(tagged.repository, "me/fork");

        let err = PollRequest::from_args(&args(&["Sync"])).unwrap_err();
        assert!(err.to_string().contains("Usage: poll_workflow"));
        assert!(PollRequest::from_args(&args(&["a", "b", "c", "d"])).is_err());
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(
            PollOutcome::TimedOut.to_string(),
            "Timeout reached while waiting for workflow completion"
        );
        assert_eq!(
            PollOutcome::Failed {
                conclusion: "failure".to_string()
            }
            .to_string(),
            "Workflow failed with conclusion: failure"
        );
    }
}
