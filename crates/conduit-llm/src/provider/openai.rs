//! `OpenAI` Responses API provider implementation

use async_trait::async_trait;
use conduit_config::LlmProviderConfig;
use conduit_core::RequestContext;
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;

use super::{Capabilities, Provider, Upstream, ensure_live};
use crate::convert::openai::ResponsesStreamState;
use crate::error::LlmError;
use crate::http_client::http_client;
use crate::protocol::openai::{ResponsesRequest, ResponsesResponse};
use crate::stream::spawn_sse_pump;
use crate::types::{EventStream, MessageRequest, MessageResponse, ToolKind};

/// Default `OpenAI` API base URL
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const NATIVE_TOOLS: &[ToolKind] = &[
    ToolKind::WebSearch,
    ToolKind::CodeExecution,
    ToolKind::FileSearch,
    ToolKind::ComputerUse,
    ToolKind::ImageGeneration,
];

/// `OpenAI` Responses API provider
pub struct OpenAiProvider {
    upstream: Upstream,
    client: Client,
}

impl OpenAiProvider {
    /// Create from provider configuration
    pub fn new(name: String, config: &LlmProviderConfig) -> Result<Self, LlmError> {
        Ok(Self {
            upstream: Upstream::from_config(name, config, DEFAULT_BASE_URL)?,
            client: http_client(),
        })
    }

    fn post(&self, body: &ResponsesRequest) -> RequestBuilder {
        let builder = self.client.post(self.upstream.endpoint("responses")).json(body);

        match &self.upstream.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.upstream.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            vision: true,
            audio_input: false,
            audio_output: false,
            video: false,
            tools: true,
            tool_streaming: true,
            thinking: true,
            structured_output: true,
            native_tools: NATIVE_TOOLS,
        }
    }

    async fn create_message(
        &self,
        request: &MessageRequest,
        context: &RequestContext,
    ) -> Result<MessageResponse, LlmError> {
        let wire_request = ResponsesRequest::try_from(request)?;
        ensure_live(context)?;

        let response = self.upstream.send(self.post(&wire_request), context).await?;
        let wire_response: ResponsesResponse = self.upstream.read_json(response, context).await?;

        MessageResponse::try_from(wire_response)
    }

    async fn stream_message(
        &self,
        request: &MessageRequest,
        context: &RequestContext,
    ) -> Result<EventStream, LlmError> {
        let mut wire_request = ResponsesRequest::try_from(request)?;
        wire_request.stream = Some(true);
        ensure_live(context)?;

        let response = self.upstream.send_stream(self.post(&wire_request), context).await?;

        Ok(spawn_sse_pump(
            self.upstream.name.clone(),
            response.bytes_stream(),
            ResponsesStreamState::new(),
            context.clone(),
        ))
    }
}
