use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize logging; `--verbose` forces debug, RUST_LOG overrides both
pub fn init_logging(verbose: bool, config: &LoggingConfig) -> Result<()> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so stdout stays readable for the result lines
    let registry = tracing_subscriber::registry().with(filter);
    match config.format.as_str() {
        "pretty" => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(config.color)
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
        _ => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(config.color)
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
    }

    Ok(())
}
