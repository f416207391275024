//! Typed configuration for the conduit gateway
//!
//! Configuration is read from TOML, with `{{ env.VAR }}` placeholders expanded
//! before deserialization. Adapters never read the environment themselves;
//! everything they need flows through these types.

#![allow(clippy::must_use_candidate)]

mod duration;
mod env;
pub mod llm;
mod loader;
pub mod run;
pub mod telemetry;
pub mod voice;

use serde::Deserialize;

pub use llm::*;
pub use run::RunDefaults;
pub use telemetry::{LogFormat, TelemetryConfig};
pub use voice::VoiceConfig;

/// Top-level conduit configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Provider adapters
    #[serde(default)]
    pub llm: LlmConfig,
    /// Agentic run defaults
    #[serde(default)]
    pub run: RunDefaults,
    /// Live voice session settings
    #[serde(default)]
    pub voice: Option<VoiceConfig>,
    /// Logging
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
