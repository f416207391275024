use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Top-level LLM configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// Provider adapters keyed by the name used in `"<provider>/<model>"` strings
    #[serde(default)]
    pub providers: IndexMap<String, LlmProviderConfig>,
}

/// Configuration for a single provider adapter
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmProviderConfig {
    /// Wire protocol spoken by the upstream
    #[serde(rename = "type")]
    pub provider_type: LlmProviderType,
    /// Credential forwarded to the upstream
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Base URL override (e.g. a proxy or a compatible self-hosted server)
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Per-request HTTP timeout (e.g. "60s")
    #[serde(default, deserialize_with = "crate::duration::deserialize_option")]
    pub timeout: Option<Duration>,
}

/// Supported provider wire protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderType {
    /// Anthropic Messages API
    Anthropic,
    /// `OpenAI` Responses API
    Openai,
    /// Google Gemini `generateContent`
    Gemini,
    /// Any `OpenAI`-compatible Chat Completions server
    OpenaiChat,
}

impl LlmProviderType {
    /// Key used for this protocol in a request's extension bag
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Gemini => "gemini",
            Self::OpenaiChat => "openai_chat",
        }
    }
}
