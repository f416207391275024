use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::{ContentBlock, Message, collect_text};
use super::tool::{Tool, ToolChoice};

/// Canonical request accepted by every adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRequest {
    /// Target model as `"<provider>/<model-name>"`
    ///
    /// Adapters receive the bare model name after the provider set has
    /// resolved the prefix.
    pub model: String,
    /// Conversation history
    pub messages: Vec<Message>,
    /// System prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    /// Tools the model may invoke
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    /// How the model should pick tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-k sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Output token limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sequences that end generation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    /// Required shape of the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,
    /// Opaque per-provider settings keyed by provider kind (e.g. `"gemini"`)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extensions: HashMap<String, Value>,
}

impl MessageRequest {
    /// A request for `model` over `messages` with every option unset
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Self::default()
        }
    }

    /// Extension settings addressed to one provider kind
    pub fn extension(&self, kind: &str) -> Option<&Value> {
        self.extensions.get(kind)
    }

    /// Look up a nested extension value, e.g. `("gemini", &["thinking", "budget"])`
    pub fn extension_path(&self, kind: &str, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(self.extension(kind)?, |value, key| value.get(key))
    }
}

/// System prompt, either a plain string or a list of text blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl SystemPrompt {
    /// Concatenated text; non-text blocks are ignored
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => collect_text(blocks),
        }
    }

    /// Text blocks, one per block for list prompts
    pub fn text_blocks(&self) -> Vec<String> {
        match self {
            Self::Text(text) => vec![text.clone()],
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(ContentBlock::as_text)
                .map(str::to_owned)
                .collect(),
        }
    }
}

impl From<&str> for SystemPrompt {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// Required shape of the model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputFormat {
    /// Free-form text
    Text,
    /// JSON matching a schema
    JsonSchema {
        /// Schema name, where the provider requires one
        name: String,
        /// JSON Schema
        schema: Value,
        /// Ask the provider to enforce the schema strictly
        #[serde(default)]
        strict: bool,
    },
}
