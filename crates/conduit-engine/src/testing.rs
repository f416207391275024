//! Scripted provider for exercising the run loop without a network

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use conduit_core::{ErrorKind, RequestContext};
use conduit_llm::{
    Capabilities, ContentBlock, EventStream, LlmError, MessageRequest, MessageResponse, Provider, StopReason,
    StreamEvent, StreamNormalizer, ToolKind, Usage,
};
use futures_util::{StreamExt, stream};
use serde_json::Value;

/// One scripted reaction to a request
#[derive(Debug, Clone)]
pub enum Step {
    Respond(MessageResponse),
    /// Answer with an `invalid_request` error
    Fail(String),
    /// Never answer; resolve only once the call is cancelled
    Hang,
}

/// Provider that replays a fixed script and records what it was sent
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    capabilities: Capabilities,
    steps: Mutex<VecDeque<Step>>,
    repeat_last: bool,
    requests: Mutex<Vec<MessageRequest>>,
}

const ALL_NATIVE_TOOLS: &[ToolKind] = &[ToolKind::WebSearch, ToolKind::CodeExecution];

impl ScriptedProvider {
    pub fn new(name: impl Into<String>, steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            name: name.into(),
            capabilities: Capabilities {
                vision: true,
                audio_input: false,
                audio_output: false,
                video: false,
                tools: true,
                tool_streaming: false,
                thinking: true,
                structured_output: true,
                native_tools: ALL_NATIVE_TOOLS,
            },
            steps: Mutex::new(steps.into_iter().collect()),
            repeat_last: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Keep replaying the final step once the script is exhausted
    #[must_use]
    pub const fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<MessageRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn next_step(&self, request: &MessageRequest) -> Step {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let mut steps = self.steps.lock().unwrap_or_else(PoisonError::into_inner);
        match steps.len() {
            0 => Step::Fail("script exhausted".into()),
            1 if self.repeat_last => steps[0].clone(),
            _ => steps.pop_front().unwrap_or(Step::Hang),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn create_message(
        &self,
        request: &MessageRequest,
        context: &RequestContext,
    ) -> Result<MessageResponse, LlmError> {
        match self.next_step(request) {
            Step::Respond(response) => Ok(response),
            Step::Fail(message) => Err(LlmError::InvalidRequest(message)),
            Step::Hang => {
                context.cancelled().await;
                Err(LlmError::Canceled(
                    context.cancellation_reason().unwrap_or("request canceled").to_owned(),
                ))
            }
        }
    }

    async fn stream_message(
        &self,
        request: &MessageRequest,
        context: &RequestContext,
    ) -> Result<EventStream, LlmError> {
        match self.next_step(request) {
            Step::Respond(response) => Ok(stream::iter(response_events(&response)).boxed()),
            Step::Fail(message) => Err(LlmError::InvalidRequest(message)),
            Step::Hang => {
                let context = context.clone();
                let start = StreamEvent::MessageStart {
                    id: "msg_hang".into(),
                    model: request.model.clone(),
                };
                let canceled = async move {
                    context.cancelled().await;
                    StreamEvent::error(
                        ErrorKind::Canceled,
                        context.cancellation_reason().unwrap_or("request canceled"),
                    )
                };
                Ok(stream::iter([start]).chain(stream::once(canceled)).boxed())
            }
        }
    }
}

/// The canonical event sequence a streaming call would produce for `response`
pub fn response_events(response: &MessageResponse) -> Vec<StreamEvent> {
    let mut normalizer = StreamNormalizer::new();
    normalizer.start(&response.id, &response.model);
    for block in &response.content {
        match block {
            ContentBlock::Text { text } => normalizer.text(text),
            ContentBlock::Thinking { thinking, .. } => normalizer.thinking(thinking),
            ContentBlock::ToolUse {
                id,
                name,
                input,
                signature,
            } => normalizer.atomic_tool_use(id, name, input, signature.clone()),
            _ => {}
        }
    }
    normalizer.finish(response.stop_reason, Some(response.usage));
    normalizer.take()
}

/// A final text answer
pub fn text_response(text: &str) -> MessageResponse {
    MessageResponse {
        id: "msg_text".into(),
        model: "scripted".into(),
        content: vec![ContentBlock::text(text)],
        stop_reason: Some(StopReason::EndTurn),
        usage: Usage::new(10, 5),
    }
}

/// A response requesting each `(id, name, input)` tool call
pub fn tool_use_response(calls: &[(&str, &str, Value)]) -> MessageResponse {
    let content = calls
        .iter()
        .map(|(id, name, input)| ContentBlock::ToolUse {
            id: (*id).to_owned(),
            name: (*name).to_owned(),
            input: input.as_object().cloned().unwrap_or_default(),
            signature: None,
        })
        .collect();

    MessageResponse {
        id: "msg_tools".into(),
        model: "scripted".into(),
        content,
        stop_reason: Some(StopReason::ToolUse),
        usage: Usage::new(10, 5),
    }
}
