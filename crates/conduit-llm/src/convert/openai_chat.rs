//! Conversion between canonical types and `OpenAI`-compatible chat completions

use std::collections::HashMap;

use conduit_core::ErrorKind;
use serde_json::{Value, json};

use super::{parse_arguments, unsupported};
use crate::error::LlmError;
use crate::protocol::openai_chat::{
    ChatContent, ChatContentPart, ChatErrorResponse, ChatFunction, ChatFunctionCall, ChatMessage, ChatRequest,
    ChatResponse, ChatStreamChunk, ChatTool, ChatToolCall, ChatUsage, ImageUrl,
};
use crate::stream::{StreamConverter, StreamNormalizer};
use crate::types::{
    BlockStart, ContentBlock, Delta, MediaSource, Message, MessageRequest, MessageResponse, OutputFormat, Role,
    StopReason, StreamEvent, Tool, ToolChoice, Usage,
};

const PROVIDER: &str = "openai_chat";

/// Terminal sentinel sent as SSE data after the last chunk
const DONE: &str = "[DONE]";

// -- Outbound --

impl TryFrom<&MessageRequest> for ChatRequest {
    type Error = LlmError;

    fn try_from(request: &MessageRequest) -> Result<Self, Self::Error> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_owned(),
                content: Some(ChatContent::Text(system.text())),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        for message in &request.messages {
            push_messages(message, &mut messages)?;
        }

        let tools: Vec<_> = request
            .tools
            .iter()
            .filter_map(|tool| match tool {
                Tool::Function(function) => Some(ChatTool {
                    tool_type: "function".to_owned(),
                    function: ChatFunction {
                        name: function.name.clone(),
                        description: (!function.description.is_empty()).then(|| function.description.clone()),
                        parameters: Some(function.input_schema.clone()),
                    },
                }),
                native => {
                    tracing::debug!(provider = PROVIDER, tool = %native.kind(), "native tool not supported; omitting");
                    None
                }
            })
            .collect();

        if request.top_k.is_some() {
            tracing::debug!(provider = PROVIDER, "top_k is not supported; ignoring");
        }

        Ok(Self {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stop: (!request.stop_sequences.is_empty()).then(|| request.stop_sequences.clone()),
            stream: None,
            tool_choice: request
                .tool_choice
                .as_ref()
                .filter(|_| !tools.is_empty())
                .map(tool_choice_value),
            tools: (!tools.is_empty()).then_some(tools),
            response_format: request.output_format.as_ref().and_then(response_format),
            stream_options: None,
        })
    }
}

fn push_messages(message: &Message, messages: &mut Vec<ChatMessage>) -> Result<(), LlmError> {
    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in &message.content {
        match (block, message.role) {
            (ContentBlock::Text { text }, _) => parts.push(ChatContentPart::Text { text: text.clone() }),
            (ContentBlock::Image { source }, Role::User) => parts.push(ChatContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: match source {
                        MediaSource::Url { url, .. } => url.clone(),
                        MediaSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
                    },
                },
            }),
            (ContentBlock::ToolUse { id, name, input, .. }, Role::Assistant) => tool_calls.push(ChatToolCall {
                id: id.clone(),
                tool_type: "function".to_owned(),
                function: ChatFunctionCall {
                    name: name.clone(),
                    arguments: Value::Object(input.clone()).to_string(),
                },
            }),
            (
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                },
                Role::User,
            ) => {
                let text = crate::types::message::collect_text(content);
                messages.push(ChatMessage {
                    role: "tool".to_owned(),
                    content: Some(ChatContent::Text(if *is_error { format!("Error: {text}") } else { text })),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
            (ContentBlock::Thinking { .. }, _) => {
                tracing::debug!(provider = PROVIDER, "dropping thinking block from input");
            }
            (block, role) => return Err(unsupported(PROVIDER, block, role)),
        }
    }

    if parts.is_empty() && tool_calls.is_empty() {
        return Ok(());
    }

    let content = match parts.as_slice() {
        [] => None,
        [ChatContentPart::Text { text }] => Some(ChatContent::Text(text.clone())),
        _ if message.role == Role::Assistant => Some(ChatContent::Text(message.text())),
        _ => Some(ChatContent::Parts(parts)),
    };

    messages.push(ChatMessage {
        role: match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
        .to_owned(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    });

    Ok(())
}

fn tool_choice_value(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Any => json!("required"),
        ToolChoice::Tool { name } => json!({"type": "function", "function": {"name": name}}),
    }
}

fn response_format(format: &OutputFormat) -> Option<Value> {
    match format {
        OutputFormat::Text => None,
        OutputFormat::JsonSchema { name, schema, strict } => Some(json!({
            "type": "json_schema",
            "json_schema": {"name": name, "schema": schema, "strict": strict}
        })),
    }
}

// -- Inbound --

fn stop_reason(finish_reason: &str) -> StopReason {
    match finish_reason {
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "content_filter" => StopReason::Refusal,
        _ => StopReason::EndTurn,
    }
}

impl From<ChatUsage> for Usage {
    fn from(usage: ChatUsage) -> Self {
        Self::new(usage.prompt_tokens, usage.completion_tokens)
    }
}

impl TryFrom<ChatResponse> for MessageResponse {
    type Error = LlmError;

    fn try_from(response: ChatResponse) -> Result<Self, Self::Error> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::decode(PROVIDER, "response has no choices"))?;
        let message = choice.message;

        let mut content = Vec::new();
        if let Some(thinking) = message.reasoning_content.filter(|t| !t.is_empty()) {
            content.push(ContentBlock::Thinking {
                thinking,
                signature: None,
            });
        }
        if let Some(text) = message.content.filter(|t| !t.is_empty()) {
            content.push(ContentBlock::text(text));
        }
        let refused = message.refusal.is_some();
        if let Some(refusal) = message.refusal {
            content.push(ContentBlock::text(refusal));
        }
        for call in message.tool_calls.unwrap_or_default() {
            content.push(ContentBlock::ToolUse {
                input: parse_arguments(&call.function.arguments).map_err(|e| LlmError::decode(PROVIDER, e))?,
                id: call.id,
                name: call.function.name,
                signature: None,
            });
        }

        let stop_reason = if refused {
            StopReason::Refusal
        } else {
            stop_reason(choice.finish_reason.as_deref().unwrap_or("stop"))
        };

        Ok(Self {
            id: response.id,
            model: response.model,
            content,
            stop_reason: Some(stop_reason),
            usage: response.usage.map(Usage::from).unwrap_or_default(),
        })
    }
}

// -- Stream conversion --

/// Content that arrived while a tool call was still streaming
#[derive(Debug)]
enum Held {
    Text(String),
    Thinking(String),
}

/// State tracker for converting chat completion chunks
///
/// Tool calls stream as fragments keyed by their position in the
/// `tool_calls` array; the first fragment carries the id and name. Text
/// that interleaves with an open tool call is held until the call closes,
/// so later argument fragments still land in its block.
#[derive(Debug, Default)]
pub struct ChatStreamState {
    normalizer: StreamNormalizer,
    tool_blocks: HashMap<u32, usize>,
    current_tool: Option<usize>,
    held: Vec<Held>,
    stop_reason: Option<StopReason>,
    usage: Option<Usage>,
}

impl ChatStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert_chunk(&mut self, chunk: ChatStreamChunk) -> Vec<StreamEvent> {
        self.normalizer.start(chunk.id, chunk.model);

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());
        }

        if let Some(choice) = chunk.choices.into_iter().next() {
            let delta = choice.delta;

            if let Some(thinking) = delta.reasoning_content {
                self.content(Held::Thinking(thinking));
            }
            if let Some(text) = delta.content {
                self.content(Held::Text(text));
            }
            if let Some(refusal) = delta.refusal {
                self.stop_reason = Some(StopReason::Refusal);
                self.content(Held::Text(refusal));
            }

            for call in delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = call.function.map(|f| (f.name, f.arguments)).unwrap_or_default();

                let index = match (self.tool_blocks.get(&call.index).copied(), call.id) {
                    (Some(index), _) => index,
                    (None, Some(id)) => {
                        if let Some(previous) = self.current_tool.take() {
                            self.normalizer.stop_block(previous);
                        }
                        self.release_held();
                        let index = self.normalizer.start_block(BlockStart::ToolUse {
                            id,
                            name: name.unwrap_or_default(),
                            signature: None,
                        });
                        self.tool_blocks.insert(call.index, index);
                        self.current_tool = Some(index);
                        index
                    }
                    (None, None) => {
                        tracing::debug!(provider = PROVIDER, index = call.index, "tool call fragment without id");
                        continue;
                    }
                };

                if let Some(arguments) = arguments.filter(|a| !a.is_empty()) {
                    self.normalizer.delta(index, Delta::ToolInput {
                        partial_json: arguments,
                    });
                }
            }

            if let Some(reason) = choice.finish_reason
                && self.stop_reason.is_none()
            {
                self.stop_reason = Some(stop_reason(&reason));
            }
        }

        self.normalizer.take()
    }

    fn content(&mut self, content: Held) {
        if self.current_tool.is_some_and(|index| self.normalizer.is_open(index)) {
            self.held.push(content);
            return;
        }
        match content {
            Held::Text(text) => self.normalizer.text(text),
            Held::Thinking(thinking) => self.normalizer.thinking(thinking),
        }
    }

    /// Emit held content; no tool block may be open
    fn release_held(&mut self) {
        if self.held.is_empty() {
            return;
        }
        for content in std::mem::take(&mut self.held) {
            match content {
                Held::Text(text) => self.normalizer.text(text),
                Held::Thinking(thinking) => self.normalizer.thinking(thinking),
            }
        }
        self.normalizer.close_open();
    }

    fn complete(&mut self) {
        if let Some(tool) = self.current_tool.take() {
            self.normalizer.stop_block(tool);
        }
        self.release_held();
        self.normalizer.finish(self.stop_reason, self.usage);
    }
}

impl StreamConverter for ChatStreamState {
    fn convert(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        if data == DONE {
            self.complete();
            return Ok(self.normalizer.take());
        }

        let value: Value = serde_json::from_str(data)?;
        if value.get("error").is_some() {
            let body: ChatErrorResponse = serde_json::from_value(value)?;
            let kind = match body.error.error_type.as_deref() {
                Some("server_error") => ErrorKind::ProviderTransport,
                _ => ErrorKind::ProviderRejected,
            };
            self.normalizer.fail(kind, body.error.message);
            return Ok(self.normalizer.take());
        }

        let chunk: ChatStreamChunk = serde_json::from_value(value)?;
        Ok(self.convert_chunk(chunk))
    }

    /// Servers that omit `[DONE]` still end cleanly once a finish reason arrived
    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.stop_reason.is_some() {
            self.complete();
        }
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
    use crate::stream::{StreamAccumulator, check_ordering};
    use crate::types::WebSearchConfig;

    #[test]
    fn tool_results_become_tool_messages() {
        let mut request = MessageRequest::new("llama3", vec![Message::user("weather?")]);
        request.system = Some("be brief".into());
        request.messages.push(Message::assistant(vec![ContentBlock::ToolUse {
            id: "call_1".into(),
            name: "get_weather".into(),
            input: json!({"city": "Paris"}).as_object().cloned().unwrap(),
            signature: None,
        }]));
        request.messages.push(Message::tool_results(vec![
            ContentBlock::tool_result("call_1", "sunny", false),
            ContentBlock::tool_result("call_2", "boom", true),
        ]));

        let body = serde_json::to_value(ChatRequest::try_from(&request).unwrap()).unwrap();
        assert_eq!(
            body["messages"],
            json!([
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}}]},
                {"role": "tool", "content": "sunny", "tool_call_id": "call_1"},
                {"role": "tool", "content": "Error: boom", "tool_call_id": "call_2"}
            ])
        );
    }

    #[test]
    fn only_function_tools_are_sent() {
        let mut request = MessageRequest::new("llama3", vec![Message::user("hi")]);
        request.tools = vec![Tool::WebSearch(WebSearchConfig::default())];
        request.tool_choice = Some(ToolChoice::Auto);
        let body = serde_json::to_value(ChatRequest::try_from(&request).unwrap()).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());

        request.tools.push(Tool::function("f", "", json!({"type": "object"})));
        request.tool_choice = Some(ToolChoice::Tool { name: "f".into() });
        let body = serde_json::to_value(ChatRequest::try_from(&request).unwrap()).unwrap();
        assert_eq!(body["tools"].as_array().unwrap().len(), 1);
        assert_eq!(body["tool_choice"], json!({"type": "function", "function": {"name": "f"}}));
    }

    #[test]
    fn documents_are_rejected() {
        let mut request = MessageRequest::new("llama3", vec![Message::user("read")]);
        request.messages[0].content.push(ContentBlock::Document {
            source: MediaSource::url("https://example.com/a.pdf"),
        });
        assert_eq!(
            ChatRequest::try_from(&request).unwrap_err().kind(),
            ErrorKind::InvalidRequest
        );
    }

    #[test]
    fn response_converts_tool_calls() {
        let response: ChatResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1,
            "model": "llama3",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": null, "tool_calls": [
                {"id": "call_9", "type": "function", "function": {"name": "f", "arguments": "{\"n\":3}"}}
            ]}, "finish_reason": "tool_calls"}],
            "usage": {"prompt_tokens": 7, "completion_tokens": 2, "total_tokens": 9}
        }))
        .unwrap();

        let response = MessageResponse::try_from(response).unwrap();
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage, Usage::new(7, 2));
        assert_eq!(response.tool_uses().next().unwrap().id, "call_9");
    }

    #[test]
    fn malformed_arguments_are_a_decode_error() {
        let response: ChatResponse = serde_json::from_value(json!({
            "id": "x", "model": "m",
            "choices": [{"message": {"tool_calls": [{"id": "c", "type": "function", "function": {"name": "f", "arguments": "{oops"}}]}}]
        }))
        .unwrap();
        assert_eq!(
            MessageResponse::try_from(response).unwrap_err().kind(),
            ErrorKind::ProviderDecode
        );
    }

    #[test]
    fn stream_assembles_fragmented_tool_calls() {
        let chunks = [
            json!({"id": "c1", "model": "m", "choices": [{"delta": {"role": "assistant", "content": "Sure"}}]}),
            json!({"id": "c1", "model": "m", "choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1", "type": "function", "function": {"name": "f", "arguments": ""}}]}}]}),
            json!({"id": "c1", "model": "m", "choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{\"a\":"}}]}}]}),
            json!({"id": "c1", "model": "m", "choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "1}"}}]}}]}),
            json!({"id": "c1", "model": "m", "choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
            json!({"id": "c1", "model": "m", "choices": [], "usage": {"prompt_tokens": 2, "completion_tokens": 5}}),
        ];

        let mut state = ChatStreamState::new();
        let mut events: Vec<_> = chunks
            .iter()
            .flat_map(|chunk| state.convert(&chunk.to_string()).unwrap())
            .collect();
        events.extend(state.convert(DONE).unwrap());

        check_ordering(&events).unwrap();
        let mut accumulator = StreamAccumulator::new();
        for event in &events {
            accumulator.push(event);
        }
        let response = accumulator.finish().unwrap();
        assert_eq!(response.text(), "Sure");
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage, Usage::new(2, 5));
        assert_eq!(response.tool_uses().next().unwrap().input.get("a"), Some(&json!(1)));
    }

    #[test]
    fn stream_without_done_finishes_after_finish_reason() {
        let mut state = ChatStreamState::new();
        let mut events = state
            .convert(r#"{"id":"c","model":"m","choices":[{"delta":{"content":"hi"},"finish_reason":"stop"}]}"#)
            .unwrap();
        events.extend(StreamConverter::finish(&mut state));
        check_ordering(&events).unwrap();
        assert_eq!(events.last(), Some(&StreamEvent::MessageStop));
    }

    #[test]
    fn text_between_argument_fragments_keeps_the_tool_call_whole() {
        let chunks = [
            json!({"id": "c2", "model": "m", "choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1", "type": "function", "function": {"name": "f", "arguments": "{\"city\":"}}]}}]}),
            json!({"id": "c2", "model": "m", "choices": [{"delta": {"content": "checking"}}]}),
            json!({"id": "c2", "model": "m", "choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "\"Paris\"}"}}]}}]}),
            json!({"id": "c2", "model": "m", "choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
        ];

        let mut state = ChatStreamState::new();
        let mut events: Vec<_> = chunks
            .iter()
            .flat_map(|chunk| state.convert(&chunk.to_string()).unwrap())
            .collect();
        events.extend(state.convert(DONE).unwrap());

        check_ordering(&events).unwrap();
        let mut accumulator = StreamAccumulator::new();
        for event in &events {
            accumulator.push(event);
        }
        let response = accumulator.finish().unwrap();
        assert_eq!(response.text(), "checking");
        let call = response.tool_uses().next().unwrap();
        assert_eq!(call.id, "call_1");
        assert_eq!(call.input.get("city"), Some(&json!("Paris")));
    }
}
