//! Tracing subscriber setup.
use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingOptions;

/// Installs the global subscriber. `RUST_LOG` takes precedence over the configured level.
///
/// Logs go to stderr so stdout stays clean for JSON listings and reports.
pub fn init_logging(options: &LoggingOptions) -> Result<()> {
    let filter = build_filter(options)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = if options.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    };
    result.context("Failed to initialize logging")
}

fn build_filter(options: &LoggingOptions) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&options.level)
            .with_context(|| format!("Invalid log level: {}", options.level)),
    }
}
