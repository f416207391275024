//! Configuration builder for integration tests

use conduit_config::Config;

use super::mock_upstream::MockUpstream;

/// Builds a [`Config`] through the same TOML path users go through
pub struct ConfigBuilder {
    toml: String,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self { toml: String::new() }
    }

    /// Add a provider of wire type `kind` pointed at `base_url`
    pub fn with_provider(mut self, name: &str, kind: &str, base_url: &str) -> Self {
        self.toml.push_str(&format!(
            "[llm.providers.{name}]\ntype = \"{kind}\"\napi_key = \"test-key\"\nbase_url = \"{base_url}\"\n\n"
        ));
        self
    }

    /// Add a provider like [`Self::with_provider`] with a request `timeout` such as "250ms"
    pub fn with_timed_provider(mut self, name: &str, kind: &str, base_url: &str, timeout: &str) -> Self {
        self = self.with_provider(name, kind, base_url);
        self.toml.insert_str(self.toml.len() - 1, &format!("timeout = \"{timeout}\"\n"));
        self
    }

    /// Register one provider per wire format, all served by `mock`
    ///
    /// Names: `claude` (anthropic), `gpt` (openai), `gemini` (gemini) and
    /// `local` (openai_chat).
    pub fn with_mock(self, mock: &MockUpstream) -> Self {
        let base = mock.base_url();
        self.with_provider("claude", "anthropic", &format!("{base}/v1"))
            .with_provider("gpt", "openai", &format!("{base}/v1"))
            .with_provider("gemini", "gemini", &format!("{base}/v1beta"))
            .with_provider("local", "openai_chat", &format!("{base}/v1"))
    }

    /// Set the run defaults
    pub fn with_run(mut self, max_tool_calls: usize, max_turns: usize) -> Self {
        self.toml.push_str(&format!(
            "[run]\nmax_tool_calls = {max_tool_calls}\nmax_turns = {max_turns}\n\n"
        ));
        self
    }

    /// Parse and validate the final config
    pub fn build(self) -> Config {
        Config::from_toml_str(&self.toml).expect("test config is valid")
    }
}
