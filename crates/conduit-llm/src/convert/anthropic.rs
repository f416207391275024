//! Conversion between canonical types and the Anthropic wire format

use std::collections::HashMap;

use conduit_core::ErrorKind;
use serde_json::{Map, Value};

use super::{extension_u32, input_map, note_ignored_output_format, unsupported};
use crate::error::LlmError;
use crate::protocol::anthropic::{
    AnthropicContentBlock, AnthropicErrorDetail, AnthropicMessage, AnthropicRequest, AnthropicResponse,
    AnthropicResponseBlock, AnthropicSource, AnthropicStreamDelta, AnthropicStreamEvent, AnthropicSystem,
    AnthropicThinking, AnthropicTool, AnthropicToolChoice, AnthropicUsage,
};
use crate::stream::{StreamConverter, StreamNormalizer};
use crate::types::{
    BlockStart, ContentBlock, Delta, MediaSource, Message, MessageRequest, MessageResponse, Role, StopReason,
    StreamEvent, SystemPrompt, Tool, ToolChoice, Usage,
};

/// Default max tokens when not specified (Anthropic requires this field)
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

const PROVIDER: &str = "anthropic";

// -- Outbound: canonical request -> Anthropic wire format --

impl TryFrom<&MessageRequest> for AnthropicRequest {
    type Error = LlmError;

    fn try_from(request: &MessageRequest) -> Result<Self, Self::Error> {
        let messages = request
            .messages
            .iter()
            .map(message_to_anthropic)
            .collect::<Result<Vec<_>, _>>()?;

        let tools: Vec<_> = request.tools.iter().filter_map(tool_to_anthropic).collect();

        note_ignored_output_format(PROVIDER, request);

        Ok(Self {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: request.system.as_ref().map(system_to_anthropic),
            messages,
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            stop_sequences: (!request.stop_sequences.is_empty()).then(|| request.stop_sequences.clone()),
            stream: None,
            tool_choice: request
                .tool_choice
                .as_ref()
                .filter(|_| !tools.is_empty())
                .map(tool_choice_to_anthropic),
            tools: (!tools.is_empty()).then_some(tools),
            thinking: thinking_from_extensions(request)?,
        })
    }
}

fn system_to_anthropic(system: &SystemPrompt) -> AnthropicSystem {
    match system {
        SystemPrompt::Text(text) => AnthropicSystem::Text(text.clone()),
        SystemPrompt::Blocks(_) => AnthropicSystem::Blocks(
            system
                .text_blocks()
                .into_iter()
                .map(|text| AnthropicContentBlock::Text { text })
                .collect(),
        ),
    }
}

fn message_to_anthropic(message: &Message) -> Result<AnthropicMessage, LlmError> {
    let mut content = Vec::with_capacity(message.content.len());

    for block in &message.content {
        if let Some(converted) = block_to_anthropic(block, message.role)? {
            content.push(converted);
        }
    }

    Ok(AnthropicMessage {
        role: match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
        .to_owned(),
        content,
    })
}

fn block_to_anthropic(block: &ContentBlock, role: Role) -> Result<Option<AnthropicContentBlock>, LlmError> {
    let converted = match block {
        ContentBlock::Text { text } => AnthropicContentBlock::Text { text: text.clone() },
        ContentBlock::Image { source } => AnthropicContentBlock::Image {
            source: source_to_anthropic(source),
        },
        ContentBlock::Document { source } => AnthropicContentBlock::Document {
            source: source_to_anthropic(source),
        },
        ContentBlock::Audio { .. } | ContentBlock::Video { .. } => return Err(unsupported(PROVIDER, block, role)),
        ContentBlock::ToolUse { id, name, input, .. } => AnthropicContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: Value::Object(input.clone()),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => AnthropicContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content
                .iter()
                .map(|inner| block_to_anthropic(inner, role))
                .filter_map(Result::transpose)
                .collect::<Result<_, _>>()?,
            is_error: is_error.then_some(true),
        },
        ContentBlock::Thinking { thinking, signature } => match signature {
            Some(signature) => AnthropicContentBlock::Thinking {
                thinking: thinking.clone(),
                signature: signature.clone(),
            },
            // Unsigned reasoning from another provider cannot be replayed
            None => {
                tracing::debug!(provider = PROVIDER, "dropping unsigned thinking block");
                return Ok(None);
            }
        },
    };

    Ok(Some(converted))
}

fn source_to_anthropic(source: &MediaSource) -> AnthropicSource {
    match source {
        MediaSource::Base64 { media_type, data } => AnthropicSource::Base64 {
            media_type: media_type.clone(),
            data: data.clone(),
        },
        MediaSource::Url { url, .. } => AnthropicSource::Url { url: url.clone() },
    }
}

fn native_tool(tool_type: &str, name: &str, options: Map<String, Value>) -> AnthropicTool {
    AnthropicTool::Native {
        tool_type: tool_type.to_owned(),
        name: name.to_owned(),
        options,
    }
}

fn tool_to_anthropic(tool: &Tool) -> Option<AnthropicTool> {
    let converted = match tool {
        Tool::Function(function) => AnthropicTool::Custom {
            name: function.name.clone(),
            description: (!function.description.is_empty()).then(|| function.description.clone()),
            input_schema: function.input_schema.clone(),
        },
        Tool::WebSearch(config) => {
            let mut options = Map::new();
            if let Some(max_uses) = config.max_uses {
                options.insert("max_uses".into(), max_uses.into());
            }
            if !config.allowed_domains.is_empty() {
                options.insert("allowed_domains".into(), config.allowed_domains.clone().into());
            }
            if !config.blocked_domains.is_empty() {
                options.insert("blocked_domains".into(), config.blocked_domains.clone().into());
            }
            native_tool("web_search_20250305", "web_search", options)
        }
        Tool::CodeExecution(_) => native_tool("code_execution_20250522", "code_execution", Map::new()),
        Tool::ComputerUse(config) => native_tool(
            "computer_20250124",
            "computer",
            Map::from_iter([
                ("display_width_px".to_owned(), config.width().into()),
                ("display_height_px".to_owned(), config.height().into()),
            ]),
        ),
        Tool::TextEditor(_) => native_tool("text_editor_20250124", "str_replace_editor", Map::new()),
        Tool::FileSearch(_) | Tool::ImageGeneration(_) => return None,
    };

    Some(converted)
}

fn tool_choice_to_anthropic(choice: &ToolChoice) -> AnthropicToolChoice {
    match choice {
        ToolChoice::Auto => AnthropicToolChoice::Auto,
        ToolChoice::None => AnthropicToolChoice::None,
        ToolChoice::Any => AnthropicToolChoice::Any,
        ToolChoice::Tool { name } => AnthropicToolChoice::Tool { name: name.clone() },
    }
}

/// `extensions.anthropic.thinking.budget_tokens` enables extended thinking
fn thinking_from_extensions(request: &MessageRequest) -> Result<Option<AnthropicThinking>, LlmError> {
    let budget = extension_u32(
        request.extension_path(PROVIDER, &["thinking", "budget_tokens"]),
        "anthropic.thinking.budget_tokens",
    )?;

    Ok(budget.map(|budget_tokens| AnthropicThinking {
        thinking_type: "enabled".to_owned(),
        budget_tokens,
    }))
}

// -- Inbound: Anthropic wire format -> canonical response --

pub(crate) fn stop_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "end_turn" | "pause_turn" => Some(StopReason::EndTurn),
        "max_tokens" => Some(StopReason::MaxTokens),
        "stop_sequence" => Some(StopReason::StopSequence),
        "tool_use" => Some(StopReason::ToolUse),
        "refusal" => Some(StopReason::Refusal),
        _ => None,
    }
}

impl From<AnthropicUsage> for Usage {
    fn from(usage: AnthropicUsage) -> Self {
        Self::new(usage.input_tokens, usage.output_tokens)
    }
}

impl From<AnthropicResponse> for MessageResponse {
    fn from(response: AnthropicResponse) -> Self {
        let content = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicResponseBlock::Text { text } => Some(ContentBlock::Text { text }),
                AnthropicResponseBlock::ToolUse { id, name, input } => Some(ContentBlock::ToolUse {
                    id,
                    name,
                    input: input_map(input),
                    signature: None,
                }),
                AnthropicResponseBlock::Thinking { thinking, signature } => {
                    Some(ContentBlock::Thinking { thinking, signature })
                }
                AnthropicResponseBlock::Other => None,
            })
            .collect();

        Self {
            id: response.id,
            model: response.model,
            content,
            stop_reason: response.stop_reason.as_deref().and_then(stop_reason),
            usage: response.usage.into(),
        }
    }
}

fn error_kind(error: &AnthropicErrorDetail) -> ErrorKind {
    match error.error_type.as_str() {
        "overloaded_error" | "api_error" | "timeout_error" => ErrorKind::ProviderTransport,
        _ => ErrorKind::ProviderRejected,
    }
}

// -- Stream conversion --

/// State tracker for converting Anthropic stream events
///
/// Anthropic already streams block-structured events; this maps its block
/// indices onto the normalizer's so skipped server-tool blocks leave no gaps.
#[derive(Debug, Default)]
pub struct AnthropicStreamState {
    normalizer: StreamNormalizer,
    indices: HashMap<u32, usize>,
    stop_reason: Option<StopReason>,
    usage: Usage,
}

impl AnthropicStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert an Anthropic stream event to canonical events
    pub fn convert_event(&mut self, event: AnthropicStreamEvent) -> Vec<StreamEvent> {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.usage = usage.into();
                }
                self.normalizer.start(message.id, message.model);
            }
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => {
                let (start, initial) = match content_block {
                    AnthropicResponseBlock::Text { text } => (BlockStart::Text, Some(Delta::Text { text })),
                    AnthropicResponseBlock::Thinking { thinking, .. } => {
                        (BlockStart::Thinking, Some(Delta::Thinking { thinking }))
                    }
                    AnthropicResponseBlock::ToolUse { id, name, .. } => (
                        BlockStart::ToolUse {
                            id,
                            name,
                            signature: None,
                        },
                        None,
                    ),
                    AnthropicResponseBlock::Other => return Vec::new(),
                };
                let ours = self.normalizer.start_block(start);
                self.indices.insert(index, ours);
                if let Some(delta) = initial.filter(|delta| !delta_is_empty(delta)) {
                    self.normalizer.delta(ours, delta);
                }
            }
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => {
                let delta = match delta {
                    AnthropicStreamDelta::TextDelta { text } => Delta::Text { text },
                    AnthropicStreamDelta::InputJsonDelta { partial_json } => Delta::ToolInput { partial_json },
                    AnthropicStreamDelta::ThinkingDelta { thinking } => Delta::Thinking { thinking },
                    AnthropicStreamDelta::SignatureDelta { signature } => Delta::Signature { signature },
                    AnthropicStreamDelta::Other => return Vec::new(),
                };
                if let Some(&ours) = self.indices.get(&index) {
                    self.normalizer.delta(ours, delta);
                }
            }
            AnthropicStreamEvent::ContentBlockStop { index } => {
                if let Some(ours) = self.indices.remove(&index) {
                    self.normalizer.stop_block(ours);
                }
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason.as_deref() {
                    self.stop_reason = stop_reason(reason);
                }
                if let Some(usage) = usage {
                    // Output tokens are cumulative; input tokens only arrive at message_start
                    self.usage.output_tokens = usage.output_tokens;
                    if usage.input_tokens > 0 {
                        self.usage.input_tokens = usage.input_tokens;
                    }
                }
            }
            AnthropicStreamEvent::MessageStop => {
                self.normalizer.finish(self.stop_reason, Some(self.usage));
            }
            AnthropicStreamEvent::Ping => {}
            AnthropicStreamEvent::Error { error } => {
                tracing::warn!(provider = PROVIDER, error_type = %error.error_type, "stream error event");
                self.normalizer.fail(error_kind(&error), error.message);
            }
        }

        self.normalizer.take()
    }
}

fn delta_is_empty(delta: &Delta) -> bool {
    match delta {
        Delta::Text { text } => text.is_empty(),
        Delta::Thinking { thinking } => thinking.is_empty(),
        _ => false,
    }
}

impl StreamConverter for AnthropicStreamState {
    fn convert(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        let event: AnthropicStreamEvent = serde_json::from_str(data)?;
        Ok(self.convert_event(event))
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        self.normalizer.take()
    }

    fn fail(&mut self, kind: ErrorKind, message: String) -> Vec<StreamEvent> {
        self.normalizer.fail(kind, message);
        self.normalizer.take()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::stream::check_ordering;
    use crate::types::WebSearchConfig;

    fn request() -> MessageRequest {
        MessageRequest::new("claude-sonnet-4-5", vec![Message::user("hi")])
    }

    #[test]
    fn defaults_max_tokens_and_maps_tool_choice() {
        let mut request = request();
        request.tools = vec![
            Tool::function("get_weather", "", json!({"type": "object"})),
            Tool::FileSearch(crate::types::FileSearchConfig::default()),
            Tool::ImageGeneration(crate::types::ImageGenerationConfig::default()),
            Tool::WebSearch(WebSearchConfig {
                max_uses: Some(2),
                ..WebSearchConfig::default()
            }),
        ];
        request.tool_choice = Some(ToolChoice::Tool {
            name: "get_weather".into(),
        });

        let wire = AnthropicRequest::try_from(&request).unwrap();
        let body = serde_json::to_value(&wire).unwrap();

        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["tool_choice"], json!({"type": "tool", "name": "get_weather"}));
        assert_eq!(
            body["tools"],
            json!([
                {"name": "get_weather", "input_schema": {"type": "object"}},
                {"type": "web_search_20250305", "name": "web_search", "max_uses": 2}
            ])
        );
    }

    #[test]
    fn audio_is_rejected_before_sending() {
        let mut request = request();
        request.messages[0].content.push(ContentBlock::Audio {
            source: MediaSource::from_bytes("audio/wav", b"RIFF"),
        });

        let err = AnthropicRequest::try_from(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn thinking_extension_enables_thinking() {
        let mut request = request();
        request
            .extensions
            .insert("anthropic".into(), json!({"thinking": {"budget_tokens": 2048}}));

        let body = serde_json::to_value(AnthropicRequest::try_from(&request).unwrap()).unwrap();
        assert_eq!(body["thinking"], json!({"type": "enabled", "budget_tokens": 2048}));

        request
            .extensions
            .insert("anthropic".into(), json!({"thinking": {"budget_tokens": "lots"}}));
        assert!(AnthropicRequest::try_from(&request).is_err());
    }

    #[test]
    fn tool_results_stay_inline_by_id() {
        let mut request = request();
        request.messages.push(Message::assistant(vec![ContentBlock::ToolUse {
            id: "toolu_1".into(),
            name: "get_weather".into(),
            input: Map::new(),
            signature: None,
        }]));
        request.messages.push(Message::tool_results(vec![ContentBlock::tool_result(
            "toolu_1", "boom", true,
        )]));

        let body = serde_json::to_value(AnthropicRequest::try_from(&request).unwrap()).unwrap();
        assert_eq!(
            body["messages"][2],
            json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": "toolu_1",
                    "content": [{"type": "text", "text": "boom"}],
                    "is_error": true
                }]
            })
        );
    }

    #[test]
    fn response_converts_blocks_and_skips_server_blocks() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4-5",
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "sig"},
                {"type": "server_tool_use", "id": "srv_1", "name": "web_search", "input": {}},
                {"type": "text", "text": "Sunny"},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 8}
        }))
        .unwrap();

        let response = MessageResponse::from(response);
        assert_eq!(response.content.len(), 3);
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage, Usage::new(12, 8));
        assert_eq!(response.tool_uses().next().unwrap().input.get("city"), Some(&json!("Paris")));
    }

    #[test]
    fn stream_events_normalize() {
        let raw = [
            json!({"type": "message_start", "message": {"id": "msg_1", "model": "m", "usage": {"input_tokens": 5, "output_tokens": 1}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "server_tool_use", "id": "s", "name": "web_search", "input": {}}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "text_delta", "text": "Hi"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "content_block_start", "index": 2, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "f", "input": {}}}),
            json!({"type": "content_block_delta", "index": 2, "delta": {"type": "input_json_delta", "partial_json": "{\"a\":"}}),
            json!({"type": "content_block_delta", "index": 2, "delta": {"type": "input_json_delta", "partial_json": "1}"}}),
            json!({"type": "content_block_stop", "index": 2}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 9}}),
            json!({"type": "message_stop"}),
        ];

        let mut state = AnthropicStreamState::new();
        let events: Vec<_> = raw
            .iter()
            .flat_map(|event| state.convert(&event.to_string()).unwrap())
            .collect();

        check_ordering(&events).unwrap();
        assert!(matches!(
            events[1],
            StreamEvent::ContentBlockStart {
                index: 0,
                block: BlockStart::Text
            }
        ));
        assert!(events.contains(&StreamEvent::MessageDelta {
            stop_reason: Some(StopReason::ToolUse),
            usage: Some(Usage::new(5, 9)),
        }));
    }

    #[test]
    fn stream_error_event_is_terminal() {
        let mut state = AnthropicStreamState::new();
        let events = state
            .convert(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .unwrap();

        assert_eq!(events, vec![StreamEvent::error(ErrorKind::ProviderTransport, "Overloaded")]);
    }
}
