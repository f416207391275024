//! Conversion between canonical types and Gemini `generateContent`

use conduit_core::ErrorKind;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{extension_u32, input_map};
use crate::error::LlmError;
use crate::protocol::gemini::{
    Blob, CodeExecution, FileData, FunctionCall, FunctionCallingConfig, FunctionDeclaration, FunctionResponse,
    GeminiContent, GeminiErrorBody, GeminiPart, GeminiRequest, GeminiResponse, GeminiTool, GeminiToolConfig,
    GenerationConfig, GoogleSearch, ThinkingConfig, UsageMetadata,
};
use crate::stream::{StreamConverter, StreamNormalizer};
use crate::types::{
    ContentBlock, MediaSource, MessageRequest, MessageResponse, OutputFormat, Role, StopReason, StreamEvent, Tool,
    ToolChoice, Usage, resolve_tool_name,
};

const PROVIDER: &str = "gemini";

// -- Outbound --

impl TryFrom<&MessageRequest> for GeminiRequest {
    type Error = LlmError;

    fn try_from(request: &MessageRequest) -> Result<Self, Self::Error> {
        let system_instruction = request.system.as_ref().map(|system| GeminiContent {
            role: None,
            parts: system.text_blocks().into_iter().map(GeminiPart::text).collect(),
        });

        let mut contents = Vec::with_capacity(request.messages.len());
        for (position, message) in request.messages.iter().enumerate() {
            push_contents(request, position, message.role, &message.content, &mut contents);
        }

        Ok(Self {
            contents,
            system_instruction,
            tools: tools_to_gemini(&request.tools),
            tool_config: request.tool_choice.as_ref().map(tool_choice_to_gemini),
            generation_config: Some(generation_config(request)?),
        })
    }
}

/// Translate one canonical message into one or more Gemini turns
///
/// Tool results are addressed by function name, so each becomes its own
/// `function` turn; any other content in the same message follows as a
/// regular turn.
fn push_contents(
    request: &MessageRequest,
    position: usize,
    role: Role,
    blocks: &[ContentBlock],
    contents: &mut Vec<GeminiContent>,
) {
    let mut parts = Vec::with_capacity(blocks.len());

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(GeminiPart::text(text.clone())),
            ContentBlock::Image { source }
            | ContentBlock::Audio { source }
            | ContentBlock::Video { source }
            | ContentBlock::Document { source } => parts.push(media_part(source)),
            ContentBlock::ToolUse {
                name, input, signature, ..
            } => parts.push(GeminiPart {
                function_call: Some(FunctionCall {
                    name: name.clone(),
                    args: Some(Value::Object(input.clone())),
                }),
                thought_signature: signature.clone(),
                ..GeminiPart::default()
            }),
            ContentBlock::ToolResult {
                tool_use_id, content, ..
            } => {
                let name = resolve_tool_name(&request.messages, position, tool_use_id).unwrap_or_else(|| {
                    tracing::warn!(
                        provider = PROVIDER,
                        tool_use_id = %tool_use_id,
                        "no tool use found for tool result; using the id as the function name"
                    );
                    tool_use_id.as_str()
                });
                let mut response = Map::new();
                response.insert(
                    "result".to_owned(),
                    Value::String(crate::types::message::collect_text(content)),
                );
                contents.push(GeminiContent {
                    role: Some("function".to_owned()),
                    parts: vec![GeminiPart {
                        function_response: Some(FunctionResponse {
                            name: name.to_owned(),
                            response,
                        }),
                        ..GeminiPart::default()
                    }],
                });
            }
            ContentBlock::Thinking { .. } => {
                tracing::debug!(provider = PROVIDER, "dropping thinking block from input");
            }
        }
    }

    if !parts.is_empty() {
        contents.push(GeminiContent {
            role: Some(
                match role {
                    Role::User => "user",
                    Role::Assistant => "model",
                }
                .to_owned(),
            ),
            parts,
        });
    }
}

/// References (`gs://` and HTTP alike) become `fileData`; bytes become `inlineData`
fn media_part(source: &MediaSource) -> GeminiPart {
    match source {
        MediaSource::Url { url, media_type } => GeminiPart {
            file_data: Some(FileData {
                mime_type: media_type.clone(),
                file_uri: url.clone(),
            }),
            ..GeminiPart::default()
        },
        MediaSource::Base64 { media_type, data } => GeminiPart {
            inline_data: Some(Blob {
                mime_type: media_type.clone(),
                data: data.clone(),
            }),
            ..GeminiPart::default()
        },
    }
}

fn tools_to_gemini(tools: &[Tool]) -> Vec<GeminiTool> {
    let mut declarations = Vec::new();
    let mut converted = Vec::new();

    for tool in tools {
        match tool {
            Tool::Function(function) => declarations.push(FunctionDeclaration {
                name: function.name.clone(),
                description: function.description.clone(),
                parameters: Some(function.input_schema.clone()),
            }),
            Tool::WebSearch(config) => converted.push(GeminiTool {
                google_search: Some(GoogleSearch {
                    exclude_domains: config.blocked_domains.clone(),
                }),
                ..GeminiTool::default()
            }),
            Tool::CodeExecution(_) => converted.push(GeminiTool {
                code_execution: Some(CodeExecution {}),
                ..GeminiTool::default()
            }),
            Tool::FileSearch(_) | Tool::ComputerUse(_) | Tool::TextEditor(_) | Tool::ImageGeneration(_) => {
                tracing::debug!(provider = PROVIDER, tool = %tool.kind(), "tool not supported; omitting");
            }
        }
    }

    if !declarations.is_empty() {
        converted.push(GeminiTool {
            function_declarations: declarations,
            ..GeminiTool::default()
        });
    }

    converted
}

fn tool_choice_to_gemini(choice: &ToolChoice) -> GeminiToolConfig {
    let (mode, allowed_function_names) = match choice {
        ToolChoice::Auto => ("AUTO", Vec::new()),
        ToolChoice::None => ("NONE", Vec::new()),
        ToolChoice::Any => ("ANY", Vec::new()),
        ToolChoice::Tool { name } => ("ANY", vec![name.clone()]),
    };

    GeminiToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode: mode.to_owned(),
            allowed_function_names,
        },
    }
}

fn generation_config(request: &MessageRequest) -> Result<GenerationConfig, LlmError> {
    let mut config = GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        max_output_tokens: request.max_tokens,
        stop_sequences: request.stop_sequences.clone(),
        ..GenerationConfig::default()
    };

    if let Some(OutputFormat::JsonSchema { schema, .. }) = &request.output_format {
        config.response_mime_type = Some("application/json".to_owned());
        config.response_schema = Some(schema.clone());
    }

    if let Some(thinking) = request.extension_path(PROVIDER, &["thinking"]) {
        config.thinking_config = Some(ThinkingConfig {
            thinking_budget: extension_u32(thinking.get("budget"), "gemini.thinking.budget")?,
            thinking_level: thinking.get("level").and_then(Value::as_str).map(str::to_owned),
            include_thoughts: thinking
                .get("include_thoughts")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        });
    }

    Ok(config)
}

// -- Inbound --

fn stop_reason(finish_reason: &str, saw_tool_call: bool) -> StopReason {
    match finish_reason {
        "MAX_TOKENS" => StopReason::MaxTokens,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" | "IMAGE_SAFETY" => StopReason::Refusal,
        _ if saw_tool_call => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

impl From<UsageMetadata> for Usage {
    fn from(usage: UsageMetadata) -> Self {
        Self::new(
            usage.prompt_token_count,
            usage.candidates_token_count.saturating_add(usage.thoughts_token_count),
        )
    }
}

fn blocked(response: &GeminiResponse) -> Option<LlmError> {
    let reason = response.prompt_feedback.as_ref()?.block_reason.as_ref()?;
    tracing::warn!(provider = PROVIDER, reason = %reason, "prompt blocked");
    Some(LlmError::Rejected {
        provider: PROVIDER.to_owned(),
        status: None,
        message: format!("prompt blocked: {reason}"),
    })
}

fn synthesized_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Convert a complete response; `model` is used when the response omits its version
pub fn into_message_response(response: GeminiResponse, model: &str) -> Result<MessageResponse, LlmError> {
    if let Some(error) = blocked(&response) {
        return Err(error);
    }

    let mut content = Vec::new();
    let mut finish_reason = None;

    if let Some(candidate) = response.candidates.into_iter().next() {
        finish_reason = candidate.finish_reason;
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(call) = part.function_call {
                content.push(ContentBlock::ToolUse {
                    id: synthesized_call_id(),
                    name: call.name,
                    input: input_map(call.args.unwrap_or(Value::Null)),
                    signature: part.thought_signature,
                });
            } else if let Some(text) = part.text {
                content.push(if part.thought {
                    ContentBlock::Thinking {
                        thinking: text,
                        signature: part.thought_signature,
                    }
                } else {
                    ContentBlock::Text { text }
                });
            }
        }
    }

    let saw_tool_call = content.iter().any(|block| matches!(block, ContentBlock::ToolUse { .. }));

    Ok(MessageResponse {
        id: response.response_id.unwrap_or_else(|| format!("gemini-{}", Uuid::new_v4().simple())),
        model: response.model_version.unwrap_or_else(|| model.to_owned()),
        content,
        stop_reason: Some(stop_reason(finish_reason.as_deref().unwrap_or("STOP"), saw_tool_call)),
        usage: response.usage_metadata.map(Usage::from).unwrap_or_default(),
    })
}

// -- Stream conversion --

/// State tracker for converting streamed Gemini chunks
///
/// Each chunk is a partial `GenerateContentResponse`. Function calls arrive
/// whole and are emitted through [`StreamNormalizer::atomic_tool_use`].
#[derive(Debug)]
pub struct GeminiStreamState {
    normalizer: StreamNormalizer,
    model: String,
    saw_tool_call: bool,
    usage: Option<Usage>,
}

impl GeminiStreamState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            normalizer: StreamNormalizer::new(),
            model: model.into(),
            saw_tool_call: false,
            usage: None,
        }
    }

    pub fn convert_chunk(&mut self, chunk: GeminiResponse) -> Vec<StreamEvent> {
        if let Some(error) = blocked(&chunk) {
            self.normalizer.fail(error.kind(), error.to_string());
            return self.normalizer.take();
        }

        let id = chunk
            .response_id
            .clone()
            .unwrap_or_else(|| format!("gemini-{}", Uuid::new_v4().simple()));
        let model = chunk.model_version.clone().unwrap_or_else(|| self.model.clone());
        self.normalizer.start(id, model);

        if let Some(usage) = chunk.usage_metadata {
            self.usage = Some(usage.into());
        }

        if let Some(candidate) = chunk.candidates.into_iter().next() {
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(call) = part.function_call {
                    self.saw_tool_call = true;
                    let input = input_map(call.args.unwrap_or(Value::Null));
                    self.normalizer
                        .atomic_tool_use(synthesized_call_id(), call.name, &input, part.thought_signature);
                } else if let Some(text) = part.text {
                    if part.thought {
                        self.normalizer.thinking(text);
                    } else {
                        self.normalizer.text(text);
                    }
                }
            }

            if let Some(reason) = candidate.finish_reason {
                self.normalizer
                    .finish(Some(stop_reason(&reason, self.saw_tool_call)), self.usage);
            }
        }

        self.normalizer.take()
    }
}

impl StreamConverter for GeminiStreamState {
    fn convert(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        let value: Value = serde_json::from_str(data)?;

        if value.get("error").is_some() {
            let body: GeminiErrorBody = serde_json::from_value(value)?;
            let kind = match body.error.status.as_deref() {
                Some("UNAVAILABLE" | "INTERNAL" | "DEADLINE_EXCEEDED") => ErrorKind::ProviderTransport,
                _ => ErrorKind::ProviderRejected,
            };
            self.normalizer.fail(kind, body.error.message);
            return Ok(self.normalizer.take());
        }

        let chunk: GeminiResponse = serde_json::from_value(value)?;
        Ok(self.convert_chunk(chunk))
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
    use crate::stream::{StreamAccumulator, check_ordering};
    use crate::types::{BlockStart, Message, WebSearchConfig};

    fn weather_history() -> MessageRequest {
        let mut request = MessageRequest::new("gemini-2.5-pro", vec![Message::user("weather in Paris?")]);
        request.messages.push(Message::assistant(vec![ContentBlock::ToolUse {
            id: "call_a".into(),
            name: "get_weather".into(),
            input: json!({"city": "Paris"}).as_object().cloned().unwrap(),
            signature: Some("sig-1".into()),
        }]));
        request
            .messages
            .push(Message::tool_results(vec![ContentBlock::tool_result("call_a", "sunny", false)]));
        request
    }

    #[test]
    fn tool_results_are_addressed_by_name() {
        let body = serde_json::to_value(GeminiRequest::try_from(&weather_history()).unwrap()).unwrap();

        assert_eq!(
            body["contents"][1],
            json!({"role": "model", "parts": [{"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}, "thoughtSignature": "sig-1"}]})
        );
        assert_eq!(
            body["contents"][2],
            json!({"role": "function", "parts": [{"functionResponse": {"name": "get_weather", "response": {"result": "sunny"}}}]})
        );
    }

    #[test]
    fn unresolvable_tool_result_falls_back_to_id() {
        let request = MessageRequest::new(
            "gemini-2.5-pro",
            vec![Message::tool_results(vec![ContentBlock::tool_result("orphan", "x", false)])],
        );
        let body = serde_json::to_value(GeminiRequest::try_from(&request).unwrap()).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["functionResponse"]["name"], "orphan");
    }

    #[test]
    fn media_references_and_bytes() {
        let mut request = MessageRequest::new("gemini-2.5-pro", vec![Message::user("look")]);
        request.messages[0].content.extend([
            ContentBlock::Video {
                source: MediaSource::Url {
                    url: "gs://bucket/clip.mp4".into(),
                    media_type: Some("video/mp4".into()),
                },
            },
            ContentBlock::Image {
                source: MediaSource::from_bytes("image/png", b"abc"),
            },
        ]);

        let body = serde_json::to_value(GeminiRequest::try_from(&request).unwrap()).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[1], json!({"fileData": {"mimeType": "video/mp4", "fileUri": "gs://bucket/clip.mp4"}}));
        assert_eq!(parts[2], json!({"inlineData": {"mimeType": "image/png", "data": "YWJj"}}));
    }

    #[test]
    fn tools_choice_and_generation_config() {
        let mut request = MessageRequest::new("gemini-2.5-pro", vec![Message::user("hi")]);
        request.system = Some("be brief".into());
        request.tools = vec![
            Tool::function("a", "", json!({"type": "object"})),
            Tool::WebSearch(WebSearchConfig {
                blocked_domains: vec!["example.com".into()],
                ..WebSearchConfig::default()
            }),
            Tool::function("b", "second", json!({"type": "object"})),
            Tool::TextEditor(crate::types::TextEditorConfig::default()),
            Tool::ImageGeneration(crate::types::ImageGenerationConfig::default()),
        ];
        request.tool_choice = Some(ToolChoice::Tool { name: "b".into() });
        request.max_tokens = Some(256);
        request.output_format = Some(OutputFormat::JsonSchema {
            name: "out".into(),
            schema: json!({"type": "object"}),
            strict: false,
        });
        request.extensions.insert(
            "gemini".into(),
            json!({"thinking": {"budget": 1024, "include_thoughts": true}}),
        );

        let body = serde_json::to_value(GeminiRequest::try_from(&request).unwrap()).unwrap();

        assert_eq!(body["systemInstruction"], json!({"parts": [{"text": "be brief"}]}));
        assert_eq!(
            body["tools"],
            json!([
                {"googleSearch": {"excludeDomains": ["example.com"]}},
                {"functionDeclarations": [
                    {"name": "a", "parameters": {"type": "object"}},
                    {"name": "b", "description": "second", "parameters": {"type": "object"}}
                ]}
            ])
        );
        assert_eq!(
            body["toolConfig"],
            json!({"functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": ["b"]}})
        );
        assert_eq!(
            body["generationConfig"],
            json!({
                "maxOutputTokens": 256,
                "responseMimeType": "application/json",
                "responseSchema": {"type": "object"},
                "thinkingConfig": {"thinkingBudget": 1024, "includeThoughts": true}
            })
        );
    }

    #[test]
    fn invalid_thinking_budget_is_rejected() {
        let mut request = MessageRequest::new("gemini-2.5-pro", vec![Message::user("hi")]);
        request
            .extensions
            .insert("gemini".into(), json!({"thinking": {"budget": "lots"}}));
        let err = GeminiRequest::try_from(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn response_function_calls_get_ids_and_signatures() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking...", "thought": true},
                    {"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}, "thoughtSignature": "sig-2"}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 3, "thoughtsTokenCount": 2},
            "modelVersion": "gemini-2.5-pro-001"
        }))
        .unwrap();

        let response = into_message_response(response, "gemini-2.5-pro").unwrap();
        assert_eq!(response.model, "gemini-2.5-pro-001");
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage, Usage::new(5, 5));
        let tool_use = response.tool_uses().next().unwrap();
        assert!(tool_use.id.starts_with("call_"));
        assert_eq!(tool_use.signature, Some("sig-2"));
        assert!(!tool_use.input.contains_key("__thought_signature"));
    }

    #[test]
    fn blocked_prompt_is_rejected() {
        let response: GeminiResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "SAFETY"}})).unwrap();
        let err = into_message_response(response, "gemini-2.5-pro").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderRejected);
    }

    #[test]
    fn safety_finish_is_a_refusal() {
        let response: GeminiResponse =
            serde_json::from_value(json!({"candidates": [{"finishReason": "SAFETY"}]})).unwrap();
        let response = into_message_response(response, "m").unwrap();
        assert_eq!(response.stop_reason, Some(StopReason::Refusal));
    }

    #[test]
    fn stream_synthesizes_tool_call_blocks() {
        let chunks = [
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Let me "}]}}], "responseId": "r1"}),
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "check."}]}}]}),
            json!({"candidates": [{"content": {"role": "model", "parts": [{"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}}]}, "finishReason": "STOP"}],
                   "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 6}}),
        ];

        let mut state = GeminiStreamState::new("gemini-2.5-flash");
        let events: Vec<_> = chunks
            .iter()
            .flat_map(|chunk| state.convert(&chunk.to_string()).unwrap())
            .collect();

        check_ordering(&events).unwrap();
        assert!(events.iter().any(|event| matches!(
            event,
            StreamEvent::ContentBlockStart { index: 1, block: BlockStart::ToolUse { name, .. } } if name == "get_weather"
        )));

        let mut accumulator = StreamAccumulator::new();
        for event in &events {
            accumulator.push(event);
        }
        let response = accumulator.finish().unwrap();
        assert_eq!(response.id, "r1");
        assert_eq!(response.text(), "Let me check.");
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage, Usage::new(4, 6));
    }

    #[test]
    fn stream_error_object_is_terminal() {
        let mut state = GeminiStreamState::new("m");
        let events = state
            .convert(r#"{"error": {"code": 503, "message": "overloaded", "status": "UNAVAILABLE"}}"#)
            .unwrap();
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Error {
                kind: ErrorKind::ProviderTransport,
                ..
            })
        ));
    }
}
