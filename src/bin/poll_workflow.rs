//! Standalone workflow poller for CI pipelines.
//!
//! `poll_workflow WORKFLOW_NAME [TAG_NAME] REPO` waits for the newest
//! dispatched run of a workflow and exits 0 on success, 1 otherwise.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use forksync::logging::init_logging;
use forksync::poll::run_poll;
use forksync::{Config, PollRequest};

#[derive(Parser)]
#[command(name = "poll_workflow")]
#[command(about = "Wait for a dispatched GitHub Actions workflow run to finish")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// WORKFLOW_NAME [TAG_NAME] REPO
    #[arg(num_args = 0.., value_name = "ARGS")]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let request = match PollRequest::from_args(&cli.args) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(1);
        }
    };

    let config = match Config::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    if let Err(e) = init_logging(cli.verbose, &config.logging) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(1);
    }

    let outcome = run_poll(&config, &request).await;
    let code = outcome.exit_code();

    println!("{}", outcome);
    println!("Workflow result: {}", code);
    if code != 0 {
        println!("Triggered workflow failed...");
    }

    ExitCode::from(code)
}
