//! Tracing setup for hosts embedding the sandbox.

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::{Context, Result};
use confine_config::LoggingConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Filter from `RUST_LOG` when set, otherwise from the configured level and
/// targets.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.filter_directive()))
}

/// Install a global subscriber writing to stderr, or appending to
/// `config.file` when one is configured.
///
/// Returns `Ok(false)` when another subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool> {
    let filter = env_filter(config);

    let init_result = match &config.file {
        Some(path) if !path.as_os_str().is_empty() => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory {}", parent.display())
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
        }
        _ => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
        }
    };

    if let Err(err) = init_result {
        tracing::warn!(error = %err, "tracing already initialized; keeping existing subscriber");
        return Ok(false);
    }
    Ok(true)
}
