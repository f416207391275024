//! `OpenAI`-compatible chat completions provider implementation

use async_trait::async_trait;
use conduit_config::LlmProviderConfig;
use conduit_core::RequestContext;
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use url::Url;

use super::{Capabilities, Provider, Upstream, ensure_live};
use crate::convert::openai_chat::ChatStreamState;
use crate::error::LlmError;
use crate::http_client::http_client;
use crate::protocol::openai_chat::{ChatRequest, ChatResponse, StreamOptions};
use crate::stream::spawn_sse_pump;
use crate::types::{EventStream, MessageRequest, MessageResponse};

/// Default base URL when only an API key is configured
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Whether the provider is the canonical `OpenAI` API (vs a compatible third-party)
fn is_canonical_openai(base_url: &Url) -> bool {
    base_url.host_str().is_some_and(|h| h == "api.openai.com")
}

/// Provider for any server speaking the chat completions format
pub struct OpenAiChatProvider {
    upstream: Upstream,
    client: Client,
}

impl OpenAiChatProvider {
    /// Create from provider configuration
    pub fn new(name: String, config: &LlmProviderConfig) -> Result<Self, LlmError> {
        Ok(Self {
            upstream: Upstream::from_config(name, config, DEFAULT_BASE_URL)?,
            client: http_client(),
        })
    }

    fn post(&self, body: &ChatRequest) -> RequestBuilder {
        let builder = self.client.post(self.upstream.endpoint("chat/completions")).json(body);

        match &self.upstream.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }
}

#[async_trait]
impl Provider for OpenAiChatProvider {
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
            thinking: false,
            structured_output: true,
            native_tools: &[],
        }
    }

    async fn create_message(
        &self,
        request: &MessageRequest,
        context: &RequestContext,
    ) -> Result<MessageResponse, LlmError> {
        let wire_request = ChatRequest::try_from(request)?;
        ensure_live(context)?;

        let response = self.upstream.send(self.post(&wire_request), context).await?;
        let wire_response: ChatResponse = self.upstream.read_json(response, context).await?;

        MessageResponse::try_from(wire_response)
    }

    async fn stream_message(
        &self,
        request: &MessageRequest,
        context: &RequestContext,
    ) -> Result<EventStream, LlmError> {
        let mut wire_request = ChatRequest::try_from(request)?;
        wire_request.stream = Some(true);
        // Many compatible servers reject unknown stream options
        wire_request.stream_options =
            is_canonical_openai(&self.upstream.base_url).then_some(StreamOptions { include_usage: true });
        ensure_live(context)?;

        let response = self.upstream.send_stream(self.post(&wire_request), context).await?;

        Ok(spawn_sse_pump(
            self.upstream.name.clone(),
            response.bytes_stream(),
            ChatStreamState::new(),
            context.clone(),
        ))
    }
}
