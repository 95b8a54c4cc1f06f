//! Global `tracing` subscriber setup for applications embedding the engine.
//!
//! The engine itself only emits events and spans. Calling [`init_tracing`] is
//! optional and belongs to the host process.

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::TelemetryConfig;

/// Installs a global subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over the configured filter when set.
///
/// # Errors
///
/// Fails on an empty or unparsable filter, an unknown format, or when a global
/// subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => build_env_filter(&directives)?,
        _ => build_env_filter(&config.filter)?,
    };

    let layer = match config.format.as_str() {
        "plain" => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
        "json" => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        other => return Err(anyhow!("unknown log format '{other}'")),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    tracing::debug!(filter = %config.filter, format = %config.format, "tracing initialized");
    Ok(())
}

fn build_env_filter(filter: &str) -> Result<EnvFilter> {
    if filter.trim().is_empty() {
        return Err(anyhow!("log filter cannot be empty"));
    }
    EnvFilter::try_new(filter).with_context(|| format!("failed to parse log filter '{filter}'"))
}
