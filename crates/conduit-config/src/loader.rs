use std::path::Path;

use secrecy::ExposeSecret;

use crate::{Config, LlmProviderType};

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, a placeholder cannot be
    /// expanded, the TOML is malformed, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::from_toml_str(&raw)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if a placeholder cannot be expanded, the TOML is
    /// malformed, or validation fails
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistency found
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_providers()?;
        self.validate_run()?;
        self.validate_voice()?;
        Ok(())
    }

    fn validate_providers(&self) -> anyhow::Result<()> {
        if self.llm.providers.is_empty() {
            anyhow::bail!("at least one LLM provider must be configured");
        }

        for (name, provider) in &self.llm.providers {
            if name.is_empty() || name.contains('/') {
                anyhow::bail!("provider name '{name}' must be non-empty and must not contain '/'");
            }

            // Compatible servers are often unauthenticated; hosted APIs are not
            let needs_key = provider.provider_type != LlmProviderType::OpenaiChat;
            let has_key = provider.api_key.as_ref().is_some_and(|key| !key.expose_secret().is_empty());
            if needs_key && !has_key {
                anyhow::bail!("provider '{name}' requires a non-empty api_key");
            }

            if provider.provider_type == LlmProviderType::OpenaiChat && provider.base_url.is_none() && !has_key {
                anyhow::bail!("provider '{name}' needs either a base_url or an api_key");
            }
        }

        Ok(())
    }

    fn validate_run(&self) -> anyhow::Result<()> {
        if self.run.max_turns == 0 {
            anyhow::bail!("run.max_turns must be greater than 0");
        }

        if self.run.timeout.is_some_and(|timeout| timeout.is_zero()) {
            anyhow::bail!("run.timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_voice(&self) -> anyhow::Result<()> {
        let Some(ref voice) = self.voice else {
            return Ok(());
        };

        let Some((provider, model)) = voice.model.split_once('/') else {
            anyhow::bail!("voice.model '{}' must have the form '<provider>/<model>'", voice.model);
        };

        if model.is_empty() {
            anyhow::bail!("voice.model '{}' is missing a model name", voice.model);
        }

        if !self.llm.providers.contains_key(provider) {
            anyhow::bail!("voice.model references unknown provider '{provider}'");
        }

        if voice.max_segment_chars == 0 {
            anyhow::bail!("voice.max_segment_chars must be greater than 0");
        }

        Ok(())
    }
}
