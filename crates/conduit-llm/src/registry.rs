//! Model string parsing and the configured set of providers

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use conduit_config::{LlmConfig, LlmProviderConfig, LlmProviderType};

use crate::error::LlmError;
use crate::provider::Provider;
use crate::provider::anthropic::AnthropicProvider;
use crate::provider::gemini::GeminiProvider;
use crate::provider::openai::OpenAiProvider;
use crate::provider::openai_chat::OpenAiChatProvider;

/// A `"<provider>/<model-name>"` string split into its parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelId<'a> {
    /// Configured provider name
    pub provider: &'a str,
    /// Model name as the provider knows it; may itself contain `/`
    pub model: &'a str,
}

impl<'a> ModelId<'a> {
    /// Split on the first `/`
    pub fn parse(model: &'a str) -> Result<Self, LlmError> {
        match model.split_once('/') {
            Some((provider, name)) if !provider.is_empty() && !name.is_empty() => Ok(Self { provider, model: name }),
            _ => Err(LlmError::InvalidRequest(format!(
                "model '{model}' must have the form '<provider>/<model-name>'"
            ))),
        }
    }
}

impl fmt::Display for ModelId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Providers by configured name
///
/// Instance-owned; build one per engine. Adapters are shared behind `Arc`
/// and are safe for unlimited concurrent use.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an adapter for every configured provider
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let mut set = Self::new();
        for (name, provider_config) in &config.providers {
            let provider = build_provider(name, provider_config)?;
            tracing::debug!(provider = %name, kind = provider_config.provider_type.as_str(), "provider configured");
            set.insert(provider);
        }
        Ok(set)
    }

    /// Add or replace a provider under its own name
    pub fn insert(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_owned(), provider);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.get(name)
    }

    /// Configured provider names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Find the adapter for a model string and return it with the bare model name
    pub fn resolve<'a>(&self, model: &'a str) -> Result<(Arc<dyn Provider>, &'a str), LlmError> {
        let id = ModelId::parse(model)?;
        let provider = self
            .providers
            .get(id.provider)
            .ok_or_else(|| LlmError::UnknownProvider(id.provider.to_owned()))?;
        Ok((Arc::clone(provider), id.model))
    }
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSet").field("providers", &self.names()).finish()
    }
}

fn build_provider(name: &str, config: &LlmProviderConfig) -> Result<Arc<dyn Provider>, LlmError> {
    let name = name.to_owned();
    Ok(match config.provider_type {
        LlmProviderType::Anthropic => Arc::new(AnthropicProvider::new(name, config)?),
        LlmProviderType::Openai => Arc::new(OpenAiProvider::new(name, config)?),
        LlmProviderType::Gemini => Arc::new(GeminiProvider::new(name, config)?),
        LlmProviderType::OpenaiChat => Arc::new(OpenAiChatProvider::new(name, config)?),
    })
}
