use serde::Deserialize;

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Output encoding for log lines
    #[serde(default)]
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset (e.g. "info,conduit_llm=debug")
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            format: LogFormat::default(),
            filter: default_filter(),
        }
    }
}

/// Log line encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

fn default_service_name() -> String {
    "conduit".to_string()
}

fn default_filter() -> String {
    "info".to_string()
}
