//! Conversion between canonical types and the `OpenAI` Responses API

use std::collections::{HashMap, HashSet};

use conduit_core::ErrorKind;
use serde_json::Value;

use super::{parse_arguments, unsupported};
use crate::error::LlmError;
use crate::protocol::openai::{
    ContainerConfig, InputItem, InputPart, OutputItem, OutputPart, ResponsesError, ResponsesRequest,
    ResponsesResponse, ResponsesStreamEvent, ResponsesTool, ResponsesToolChoice, TextConfig, TextFormat,
};
use crate::stream::{StreamConverter, StreamNormalizer};
use crate::types::{
    BlockStart, ContentBlock, Delta, MediaSource, Message, MessageRequest, MessageResponse, OutputFormat, Role,
    StopReason, StreamEvent, Tool, ToolChoice, Usage,
};

const PROVIDER: &str = "openai";

// -- Outbound --

impl TryFrom<&MessageRequest> for ResponsesRequest {
    type Error = LlmError;

    fn try_from(request: &MessageRequest) -> Result<Self, Self::Error> {
        let mut input = Vec::new();
        for message in &request.messages {
            push_message_items(message, &mut input)?;
        }

        let tools: Vec<_> = request.tools.iter().filter_map(tool_to_responses).collect();

        if !request.stop_sequences.is_empty() || request.top_k.is_some() {
            tracing::debug!(provider = PROVIDER, "stop_sequences and top_k are not supported; ignoring");
        }

        Ok(Self {
            model: request.model.clone(),
            input,
            instructions: request.system.as_ref().map(crate::types::SystemPrompt::text),
            tool_choice: request
                .tool_choice
                .as_ref()
                .filter(|_| !tools.is_empty())
                .map(tool_choice_to_responses),
            tools,
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_tokens,
            text: request.output_format.as_ref().map(|format| TextConfig {
                format: match format {
                    OutputFormat::Text => TextFormat::Text,
                    OutputFormat::JsonSchema { name, schema, strict } => TextFormat::JsonSchema {
                        name: name.clone(),
                        schema: schema.clone(),
                        strict: *strict,
                    },
                },
            }),
            reasoning: request.extension_path(PROVIDER, &["reasoning"]).cloned(),
            stream: None,
            store: false,
        })
    }
}

/// Split one canonical message into Responses input items
///
/// Text and media accumulate into a `message` item; tool uses and tool
/// results become standalone items at their position in the turn.
fn push_message_items(message: &Message, items: &mut Vec<InputItem>) -> Result<(), LlmError> {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let mut parts = Vec::new();

    let flush = |parts: &mut Vec<InputPart>, items: &mut Vec<InputItem>| {
        if !parts.is_empty() {
            items.push(InputItem::Message {
                role: role.to_owned(),
                content: std::mem::take(parts),
            });
        }
    };

    for block in &message.content {
        match block {
            ContentBlock::Text { text } => parts.push(match message.role {
                Role::User => InputPart::InputText { text: text.clone() },
                Role::Assistant => InputPart::OutputText { text: text.clone() },
            }),
            ContentBlock::Image { source } if message.role == Role::User => {
                parts.push(InputPart::InputImage {
                    image_url: media_url(source),
                });
            }
            ContentBlock::Document { source } if message.role == Role::User => {
                parts.push(match source {
                    MediaSource::Url { url, .. } => InputPart::InputFile {
                        filename: None,
                        file_data: None,
                        file_url: Some(url.clone()),
                    },
                    MediaSource::Base64 { .. } => InputPart::InputFile {
                        filename: Some("document".to_owned()),
                        file_data: Some(media_url(source)),
                        file_url: None,
                    },
                });
            }
            ContentBlock::ToolUse { id, name, input, .. } => {
                flush(&mut parts, items);
                items.push(InputItem::FunctionCall {
                    call_id: id.clone(),
                    name: name.clone(),
                    arguments: Value::Object(input.clone()).to_string(),
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                flush(&mut parts, items);
                let text = crate::types::message::collect_text(content);
                items.push(InputItem::FunctionCallOutput {
                    call_id: tool_use_id.clone(),
                    output: if *is_error { format!("Error: {text}") } else { text },
                });
            }
            ContentBlock::Thinking { .. } => {
                tracing::debug!(provider = PROVIDER, "dropping thinking block from input");
            }
            ContentBlock::Image { .. }
            | ContentBlock::Document { .. }
            | ContentBlock::Audio { .. }
            | ContentBlock::Video { .. } => return Err(unsupported(PROVIDER, block, message.role)),
        }
    }

    flush(&mut parts, items);
    Ok(())
}

/// URL for a media source, encoding inline bytes as a data URI
fn media_url(source: &MediaSource) -> String {
    match source {
        MediaSource::Url { url, .. } => url.clone(),
        MediaSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
    }
}

fn tool_to_responses(tool: &Tool) -> Option<ResponsesTool> {
    let converted = match tool {
        Tool::Function(function) => ResponsesTool::Function {
            name: function.name.clone(),
            description: (!function.description.is_empty()).then(|| function.description.clone()),
            parameters: function.input_schema.clone(),
        },
        Tool::WebSearch(_) => ResponsesTool::WebSearch {
            search_context_size: "medium".to_owned(),
        },
        Tool::CodeExecution(_) => ResponsesTool::CodeInterpreter {
            container: ContainerConfig {
                container_type: "auto".to_owned(),
            },
        },
        Tool::FileSearch(config) => ResponsesTool::FileSearch {
            vector_store_ids: config.vector_store_ids.clone(),
            max_num_results: config.max_results,
        },
        Tool::ComputerUse(config) => ResponsesTool::ComputerUsePreview {
            display_width: config.width(),
            display_height: config.height(),
            environment: config.environment().to_owned(),
        },
        Tool::ImageGeneration(_) => ResponsesTool::ImageGeneration {},
        Tool::TextEditor(_) => return None,
    };

    Some(converted)
}

fn tool_choice_to_responses(choice: &ToolChoice) -> ResponsesToolChoice {
    match choice {
        ToolChoice::Auto => ResponsesToolChoice::Mode("auto".to_owned()),
        ToolChoice::None => ResponsesToolChoice::Mode("none".to_owned()),
        ToolChoice::Any => ResponsesToolChoice::Mode("required".to_owned()),
        ToolChoice::Tool { name } => ResponsesToolChoice::Function {
            choice_type: "function".to_owned(),
            name: name.clone(),
        },
    }
}

// -- Inbound --

fn stop_reason(response: &ResponsesResponse, saw_tool_call: bool, refused: bool) -> StopReason {
    let incomplete_reason = response
        .incomplete_details
        .as_ref()
        .and_then(|details| details.reason.as_deref());

    match incomplete_reason {
        Some("max_output_tokens") => StopReason::MaxTokens,
        Some("content_filter") => StopReason::Refusal,
        _ if refused => StopReason::Refusal,
        _ if saw_tool_call => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

fn usage(response: &ResponsesResponse) -> Usage {
    response
        .usage
        .map(|usage| Usage::new(usage.input_tokens, usage.output_tokens))
        .unwrap_or_default()
}

fn error_kind(error: Option<&ResponsesError>) -> ErrorKind {
    match error.and_then(|error| error.code.as_deref()) {
        Some("server_error" | "rate_limit_exceeded" | "vector_store_timeout") => ErrorKind::ProviderTransport,
        _ => ErrorKind::ProviderRejected,
    }
}

impl TryFrom<ResponsesResponse> for MessageResponse {
    type Error = LlmError;

    fn try_from(response: ResponsesResponse) -> Result<Self, Self::Error> {
        if response.status.as_deref() == Some("failed") {
            let message = response
                .error
                .as_ref()
                .map_or_else(|| "response failed".to_owned(), |error| error.message.clone());
            return Err(match error_kind(response.error.as_ref()) {
                ErrorKind::ProviderTransport => LlmError::transport(PROVIDER, message),
                _ => LlmError::Rejected {
                    provider: PROVIDER.to_owned(),
                    status: None,
                    message,
                },
            });
        }

        let mut content = Vec::new();
        let mut saw_tool_call = false;
        let mut refused = false;

        for item in &response.output {
            match item {
                OutputItem::Message { content: parts } => {
                    for part in parts {
                        match part {
                            OutputPart::OutputText { text } => content.push(ContentBlock::text(text.clone())),
                            OutputPart::Refusal { refusal } => {
                                refused = true;
                                content.push(ContentBlock::text(refusal.clone()));
                            }
                            OutputPart::Other => {}
                        }
                    }
                }
                OutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                } => {
                    saw_tool_call = true;
                    content.push(ContentBlock::ToolUse {
                        id: call_id.clone(),
                        name: name.clone(),
                        input: parse_arguments(arguments).map_err(|e| LlmError::decode(PROVIDER, e))?,
                        signature: None,
                    });
                }
                OutputItem::Reasoning { summary } => {
                    let thinking: String = summary.iter().map(|part| part.text.as_str()).collect();
                    if !thinking.is_empty() {
                        content.push(ContentBlock::Thinking {
                            thinking,
                            signature: None,
                        });
                    }
                }
                OutputItem::Other => {}
            }
        }

        Ok(Self {
            stop_reason: Some(stop_reason(&response, saw_tool_call, refused)),
            usage: usage(&response),
            id: response.id,
            model: response.model,
            content,
        })
    }
}

// -- Stream conversion --

/// State tracker for converting Responses API stream events
///
/// Output items are keyed by `output_index`; text and reasoning blocks open
/// lazily on their first delta.
#[derive(Debug, Default)]
pub struct ResponsesStreamState {
    normalizer: StreamNormalizer,
    blocks: HashMap<u32, usize>,
    streamed_arguments: HashSet<u32>,
    saw_tool_call: bool,
    refused: bool,
}

impl ResponsesStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    fn block(&mut self, output_index: u32, start: BlockStart) -> usize {
        if let Some(&index) = self.blocks.get(&output_index) {
            return index;
        }
        let index = self.normalizer.start_block(start);
        self.blocks.insert(output_index, index);
        index
    }

    pub fn convert_event(&mut self, event: ResponsesStreamEvent) -> Vec<StreamEvent> {
        match event {
            ResponsesStreamEvent::Created { response } => self.normalizer.start(response.id, response.model),
            ResponsesStreamEvent::OutputItemAdded { output_index, item } => {
                if let OutputItem::FunctionCall { call_id, name, .. } = item {
                    self.saw_tool_call = true;
                    self.block(output_index, BlockStart::ToolUse {
                        id: call_id,
                        name,
                        signature: None,
                    });
                }
            }
            ResponsesStreamEvent::OutputTextDelta { output_index, delta } => {
                let index = self.block(output_index, BlockStart::Text);
                self.normalizer.delta(index, Delta::Text { text: delta });
            }
            ResponsesStreamEvent::RefusalDelta { output_index, delta } => {
                self.refused = true;
                let index = self.block(output_index, BlockStart::Text);
                self.normalizer.delta(index, Delta::Text { text: delta });
            }
            ResponsesStreamEvent::ReasoningSummaryTextDelta { output_index, delta } => {
                let index = self.block(output_index, BlockStart::Thinking);
                self.normalizer.delta(index, Delta::Thinking { thinking: delta });
            }
            ResponsesStreamEvent::FunctionCallArgumentsDelta { output_index, delta } => {
                if let Some(&index) = self.blocks.get(&output_index) {
                    self.streamed_arguments.insert(output_index);
                    self.normalizer.delta(index, Delta::ToolInput { partial_json: delta });
                }
            }
            ResponsesStreamEvent::OutputItemDone { output_index, item } => {
                if let Some(index) = self.blocks.remove(&output_index) {
                    if let OutputItem::FunctionCall { arguments, .. } = item
                        && !self.streamed_arguments.contains(&output_index)
                        && !arguments.is_empty()
                    {
                        self.normalizer.delta(index, Delta::ToolInput {
                            partial_json: arguments,
                        });
                    }
                    self.normalizer.stop_block(index);
                }
            }
            ResponsesStreamEvent::Completed { response } | ResponsesStreamEvent::Incomplete { response } => {
                let reason = stop_reason(&response, self.saw_tool_call, self.refused);
                self.normalizer.finish(Some(reason), Some(usage(&response)));
            }
            ResponsesStreamEvent::Failed { response } => {
                let message = response
                    .error
                    .as_ref()
                    .map_or_else(|| "response failed".to_owned(), |error| error.message.clone());
                self.normalizer.fail(error_kind(response.error.as_ref()), message);
            }
            ResponsesStreamEvent::Error { code, message } => {
                tracing::warn!(provider = PROVIDER, code = ?code, "stream error event");
                let error = ResponsesError { code, message };
                self.normalizer.fail(error_kind(Some(&error)), error.message);
            }
            ResponsesStreamEvent::Other => {}
        }

        self.normalizer.take()
    }
}

impl StreamConverter for ResponsesStreamState {
    fn convert(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        let event: ResponsesStreamEvent = serde_json::from_str(data)?;
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
