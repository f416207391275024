//! Conversion between the canonical model and provider wire formats
//!
//! Each submodule builds its provider's request (failing before any network
//! call when the request cannot be expressed), converts the complete
//! response, and implements the provider's stream converter.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod openai_chat;

use serde_json::{Map, Value};

use crate::error::LlmError;
use crate::types::{ContentBlock, MessageRequest, Role};

/// Coerce a provider's tool arguments into an input map
///
/// `null` becomes an empty map; other non-object values are kept under a
/// `value` key so nothing is lost.
pub(crate) fn input_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => Map::from_iter([("value".to_owned(), other)]),
    }
}

/// Parse JSON-encoded tool arguments, treating an empty string as `{}`
pub(crate) fn parse_arguments(arguments: &str) -> Result<Map<String, Value>, serde_json::Error> {
    if arguments.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(arguments).map(input_map)
}

pub(crate) fn unsupported(provider: &str, block: &ContentBlock, role: Role) -> LlmError {
    LlmError::InvalidRequest(format!(
        "{provider} does not accept {} content in {} messages",
        block.variant_name(),
        match role {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    ))
}

/// Warn when a request uses an output format the adapter cannot express
pub(crate) fn note_ignored_output_format(provider: &str, request: &MessageRequest) {
    if request.output_format.is_some() {
        tracing::debug!(provider, "structured output is not supported; ignoring output_format");
    }
}

/// Unsigned integer from an extension value, rejecting anything else
pub(crate) fn extension_u32(value: Option<&Value>, what: &str) -> Result<Option<u32>, LlmError> {
    value
        .map(|value| {
            value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| LlmError::InvalidRequest(format!("{what} must be a non-negative integer, got {value}")))
        })
        .transpose()
}
