//! Google Gemini provider implementation

use async_trait::async_trait;
use conduit_config::LlmProviderConfig;
use conduit_core::RequestContext;
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;

use super::{Capabilities, Provider, Upstream, ensure_live};
use crate::convert::gemini::{GeminiStreamState, into_message_response};
use crate::error::LlmError;
use crate::http_client::http_client;
use crate::protocol::gemini::{GeminiRequest, GeminiResponse};
use crate::stream::spawn_sse_pump;
use crate::types::{EventStream, MessageRequest, MessageResponse, ToolKind};

/// Default Gemini API base URL
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const NATIVE_TOOLS: &[ToolKind] = &[ToolKind::WebSearch, ToolKind::CodeExecution];

/// Google Gemini provider
pub struct GeminiProvider {
    upstream: Upstream,
    client: Client,
}

impl GeminiProvider {
    /// Create from provider configuration
    pub fn new(name: String, config: &LlmProviderConfig) -> Result<Self, LlmError> {
        Ok(Self {
            upstream: Upstream::from_config(name, config, DEFAULT_BASE_URL)?,
            client: http_client(),
        })
    }

    /// `models/{model}:{method}`, with any query string appended verbatim
    fn post(&self, model: &str, method: &str, body: &GeminiRequest) -> RequestBuilder {
        let builder = self
            .client
            .post(self.upstream.endpoint(&format!("models/{model}:{method}")))
            .json(body);

        match &self.upstream.api_key {
            Some(key) => builder.header("x-goog-api-key", key.expose_secret()),
            None => builder,
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.upstream.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            vision: true,
            audio_input: true,
            audio_output: false,
            video: true,
            tools: true,
            tool_streaming: false,
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
        let wire_request = GeminiRequest::try_from(request)?;
        ensure_live(context)?;

        let builder = self.post(&request.model, "generateContent", &wire_request);
        let response = self.upstream.send(builder, context).await?;
        let wire_response: GeminiResponse = self.upstream.read_json(response, context).await?;

        into_message_response(wire_response, &request.model)
    }

    async fn stream_message(
        &self,
        request: &MessageRequest,
        context: &RequestContext,
    ) -> Result<EventStream, LlmError> {
        let wire_request = GeminiRequest::try_from(request)?;
        ensure_live(context)?;

        let builder = self.post(&request.model, "streamGenerateContent?alt=sse", &wire_request);
        let response = self.upstream.send_stream(builder, context).await?;

        Ok(spawn_sse_pump(
            self.upstream.name.clone(),
            response.bytes_stream(),
            GeminiStreamState::new(request.model.clone()),
            context.clone(),
        ))
    }
}
