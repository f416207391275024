//! Anthropic Messages API provider implementation

use async_trait::async_trait;
use conduit_config::LlmProviderConfig;
use conduit_core::RequestContext;
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;

use super::{Capabilities, Provider, Upstream, ensure_live};
use crate::convert::anthropic::AnthropicStreamState;
use crate::error::LlmError;
use crate::http_client::http_client;
use crate::protocol::anthropic::{AnthropicRequest, AnthropicResponse};
use crate::stream::spawn_sse_pump;
use crate::types::{EventStream, MessageRequest, MessageResponse, ToolKind};

/// Default Anthropic API base URL
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

const NATIVE_TOOLS: &[ToolKind] = &[
    ToolKind::WebSearch,
    ToolKind::CodeExecution,
    ToolKind::ComputerUse,
    ToolKind::TextEditor,
];

/// Anthropic Messages API provider
pub struct AnthropicProvider {
    upstream: Upstream,
    client: Client,
}

impl AnthropicProvider {
    /// Create from provider configuration
    pub fn new(name: String, config: &LlmProviderConfig) -> Result<Self, LlmError> {
        Ok(Self {
            upstream: Upstream::from_config(name, config, DEFAULT_BASE_URL)?,
            client: http_client(),
        })
    }

    fn post(&self, body: &AnthropicRequest) -> RequestBuilder {
        let mut builder = self
            .client
            .post(self.upstream.endpoint("messages"))
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);

        if let Some(key) = &self.upstream.api_key {
            builder = builder.header("x-api-key", key.expose_secret());
        }

        builder
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
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
            structured_output: false,
            native_tools: NATIVE_TOOLS,
        }
    }

    async fn create_message(
        &self,
        request: &MessageRequest,
        context: &RequestContext,
    ) -> Result<MessageResponse, LlmError> {
        let wire_request = AnthropicRequest::try_from(request)?;
        ensure_live(context)?;

        let response = self.upstream.send(self.post(&wire_request), context).await?;
        let wire_response: AnthropicResponse = self.upstream.read_json(response, context).await?;

        Ok(wire_response.into())
    }

    async fn stream_message(
        &self,
        request: &MessageRequest,
        context: &RequestContext,
    ) -> Result<EventStream, LlmError> {
        let mut wire_request = AnthropicRequest::try_from(request)?;
        wire_request.stream = Some(true);
        ensure_live(context)?;

        let response = self.upstream.send_stream(self.post(&wire_request), context).await?;

        Ok(spawn_sse_pump(
            self.upstream.name.clone(),
            response.bytes_stream(),
            AnthropicStreamState::new(),
            context.clone(),
        ))
    }
}
