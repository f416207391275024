//! Logging setup for Conduit
//!
//! Installs a `tracing-subscriber` registry with an env filter and a text or
//! JSON formatter. Library crates only emit `tracing` events; binaries call
//! [`init`] once at startup.

use anyhow::Context;
use conduit_config::{LogFormat, TelemetryConfig};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `override_filter`, which takes
/// precedence over the configured filter.
///
/// # Errors
///
/// Returns an error if the filter directive is malformed or a global
/// subscriber is already installed.
pub fn init(config: &TelemetryConfig, override_filter: Option<&str>) -> anyhow::Result<()> {
    let filter = build_filter(config, override_filter)?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init(),
    }
    .context("failed to install the tracing subscriber")?;

    tracing::debug!(service = %config.service_name, format = ?config.format, "logging initialized");
    Ok(())
}

fn build_filter(config: &TelemetryConfig, override_filter: Option<&str>) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directive = override_filter.unwrap_or(&config.filter);
    EnvFilter::try_new(directive).with_context(|| format!("invalid log filter '{directive}'"))
}
