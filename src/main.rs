use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

use forksync::config::LoggingConfig;
use forksync::logging::init_logging;
use forksync::poll::run_poll;
use forksync::{
    Config, GitHubClient, GitRepo, HealthCheck, PollRequest, SyncReport, SyncSequencer,
    SyncSettings,
};

#[derive(Parser)]
#[command(name = "forksync")]
#[command(about = "Keeps a customized fork in step with upstream releases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge the newest upstream release and open a pull request or issue
    Sync {
        /// Working copy of the fork
        #[arg(long)]
        repo_path: Option<PathBuf>,

        /// Fork repository on GitHub (owner/name)
        #[arg(long)]
        repository: Option<String>,

        /// Remote that publishes releases
        #[arg(long)]
        upstream: Option<String>,

        /// Branch the pull request targets
        #[arg(long)]
        base: Option<String>,

        /// Customization patch, relative to the repository root
        #[arg(long)]
        patch: Option<String>,

        /// Merge the pull request right after opening it
        #[arg(long)]
        auto_merge: bool,

        /// Only report which release would be synchronized
        #[arg(long)]
        dry_run: bool,
    },

    /// Wait for a dispatched workflow run: WORKFLOW_NAME [TAG_NAME] REPO
    Poll {
        #[arg(num_args = 0.., value_name = "ARGS")]
        args: Vec<String>,
    },

    /// System health check and diagnostics
    Doctor,

    /// Write a default configuration file
    Init {
        /// Fork repository on GitHub (owner/name)
        #[arg(long)]
        repository: Option<String>,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Usage errors exit 1; --help and --version exit 0
            let _ = e.print();
            return Ok(if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            });
        }
    };

    match cli.command {
        Commands::Sync {
            repo_path,
            repository,
            upstream,
            base,
            patch,
            auto_merge,
            dry_run,
        } => {
            let mut config = setup(cli.config.as_deref(), cli.verbose)?;

            // Command line flags win over the configuration file
            if let Some(path) = repo_path {
                config.sync.repo_path = path.to_string_lossy().into_owned();
            }
            if repository.is_some() {
                config.github.repository = repository;
            }
            if let Some(upstream) = upstream {
                config.sync.upstream_remote = upstream;
            }
            if let Some(base) = base {
                config.sync.base_branch = base;
            }
            if let Some(patch) = patch {
                config.sync.patch_path = patch;
            }
            config.sync.auto_merge |= auto_merge;
            config.validate()?;

            cmd_sync(&config, dry_run).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Poll { args } => {
            let config = setup(cli.config.as_deref(), cli.verbose)?;
            Ok(cmd_poll(&args, &config).await)
        }
        Commands::Doctor => {
            let config = setup(cli.config.as_deref(), cli.verbose)?;
            Ok(cmd_doctor(&config))
        }
        Commands::Init { repository, force } => {
            init_logging(cli.verbose, &LoggingConfig::default())?;
            cmd_init(cli.config, repository, force)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load configuration and initialize logging from it
fn setup(config_path: Option<&Path>, verbose: bool) -> Result<Config> {
    let config = Config::load_from(config_path)?;
    init_logging(verbose, &config.logging)?;
    info!("Starting forksync v{}", env!("CARGO_PKG_VERSION"));
    Ok(config)
}

/// Run one release sync against the configured fork
async fn cmd_sync(config: &Config, dry_run: bool) -> Result<()> {
    let repository = config.fork_repository().context(
        "No fork repository configured. Pass --repository, set github.repository or GITHUB_REPOSITORY",
    )?;

    let repo = GitRepo::open(&config.sync.repo_path)?;
    let client = GitHubClient::from_config(config, &repository)?;

    let mut settings = SyncSettings::from_config(&config.sync)?;
    settings.dry_run = dry_run;

    println!("🔍 Checking {} for new releases...", settings.upstream_remote);
    let report = SyncSequencer::new(&repo, &client, settings).run().await?;

    match report {
        SyncReport::NoReleases => println!("   No release tags found upstream"),
        SyncReport::UpToDate { tag } => println!("✅ Already up to date with {}", tag.name),
        SyncReport::NewRelease { tag } => {
            println!("📥 New release available: {} ({})", tag.name, tag.commit);
            println!("   Dry run - no branch, pull request or issue created");
        }
        SyncReport::PullRequestOpened {
            outcome,
            pull_request,
            merged,
        } => {
            println!("🎉 Synchronized release {}", outcome.tag.name);
            println!("   Pull request #{}", pull_request.number);
            if let Some(url) = &pull_request.url {
                println!("   🔗 {}", url);
            }
            if merged {
                println!("   ✅ Pull request merged");
            }
        }
        SyncReport::IssueOpened { outcome, issue } => {
            println!("⚠️  Sync of {} needs manual attention", outcome.tag.name);
            println!("   Merge status: {}", outcome.merge_status);
            println!("   Patch status: {}", outcome.patch_status);
            println!("   Issue #{}", issue.number);
            if let Some(url) = &issue.url {
                println!("   🔗 {}", url);
            }
        }
    }

    Ok(())
}

/// Poll a workflow run; usage and API errors are exit codes, not crashes
async fn cmd_poll(args: &[String], config: &Config) -> ExitCode {
    let request = match PollRequest::from_args(args) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(1);
        }
    };

    let outcome = run_poll(config, &request).await;
    let code = outcome.exit_code();

    println!("{}", outcome);
    println!("Workflow result: {}", code);
    if code != 0 {
        println!("Triggered workflow failed...");
    }

    ExitCode::from(code)
}

/// System health check and diagnostics
fn cmd_doctor(config: &Config) -> ExitCode {
    let health = HealthCheck::run(config);

    println!("🔍 forksync System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
        ExitCode::SUCCESS
    } else {
        println!("❌ Some checks failed");
        ExitCode::from(1)
    }
}

/// Write a default configuration file
fn cmd_init(path: Option<PathBuf>, repository: Option<String>, force: bool) -> Result<()> {
    let config_path = match path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };

    if config_path.exists() && !force {
        println!("⚠️  Configuration already exists: {}", config_path.display());
        println!("   Use --force to overwrite it");
        return Ok(());
    }

    let mut config = Config::default();
    config.github.repository = repository;
    config.validate()?;
    config.save(&config_path)?;

    println!("✅ Configuration written to {}", config_path.display());
    Ok(())
}
