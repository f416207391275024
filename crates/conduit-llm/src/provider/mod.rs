//! Provider trait and the HTTP adapters implementing it

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod openai_chat;

use std::time::Duration;

use async_trait::async_trait;
use conduit_config::LlmProviderConfig;
use conduit_core::RequestContext;
use reqwest::{RequestBuilder, Response};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::LlmError;
use crate::types::{EventStream, MessageRequest, MessageResponse, ToolKind};

/// Features an adapter can express
///
/// Callers consult these before requesting a feature and degrade silently
/// when one is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    pub vision: bool,
    pub audio_input: bool,
    pub audio_output: bool,
    pub video: bool,
    /// Function tools
    pub tools: bool,
    /// Tool input arrives incrementally rather than as one unit
    pub tool_streaming: bool,
    pub thinking: bool,
    pub structured_output: bool,
    /// Provider-hosted tools the adapter can declare
    pub native_tools: &'static [ToolKind],
}

impl Capabilities {
    /// Whether a tool of `kind` is sent upstream rather than omitted
    pub fn supports_tool(&self, kind: ToolKind) -> bool {
        match kind {
            ToolKind::Function => self.tools,
            native => self.native_tools.contains(&native),
        }
    }
}

/// A backend that speaks one provider's wire format
///
/// Adapters receive requests whose `model` is the bare model name and are
/// safe to share across any number of concurrent calls.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Configured provider name
    fn name(&self) -> &str;

    /// Advertised capabilities
    fn capabilities(&self) -> Capabilities;

    /// Send a request and wait for the complete response
    async fn create_message(
        &self,
        request: &MessageRequest,
        context: &RequestContext,
    ) -> Result<MessageResponse, LlmError>;

    /// Send a request and stream canonical events
    ///
    /// Errors before the first event (translation failures, non-success
    /// status) are returned directly; later failures arrive as a terminal
    /// `Error` event.
    async fn stream_message(&self, request: &MessageRequest, context: &RequestContext)
    -> Result<EventStream, LlmError>;
}

/// Connection settings shared by every HTTP adapter
#[derive(Debug, Clone)]
pub(crate) struct Upstream {
    pub name: String,
    pub base_url: Url,
    pub api_key: Option<SecretString>,
    pub timeout: Option<Duration>,
}

impl Upstream {
    pub fn from_config(name: String, config: &LlmProviderConfig, default_base_url: &str) -> Result<Self, LlmError> {
        let base_url = match &config.base_url {
            Some(url) => url.clone(),
            None => Url::parse(default_base_url)
                .map_err(|e| LlmError::InvalidRequest(format!("invalid default base URL for '{name}': {e}")))?,
        };

        Ok(Self {
            name,
            base_url,
            api_key: config.api_key.clone(),
            timeout: config.timeout,
        })
    }

    /// Join `path` onto the base URL
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/{}", path.trim_start_matches('/'))
    }

    /// Send a request whose body is read in full
    ///
    /// The provider timeout bounds the whole exchange, body included.
    pub async fn send(&self, builder: RequestBuilder, context: &RequestContext) -> Result<Response, LlmError> {
        let builder = match self.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        };
        self.dispatch(builder, context).await
    }

    /// Send a streaming request
    ///
    /// The provider timeout bounds only the wait for the response head; the
    /// body may take as long as the upstream keeps producing events.
    pub async fn send_stream(&self, builder: RequestBuilder, context: &RequestContext) -> Result<Response, LlmError> {
        let Some(timeout) = self.timeout else {
            return self.dispatch(builder, context).await;
        };
        tokio::time::timeout(timeout, self.dispatch(builder, context))
            .await
            .map_err(|_| {
                tracing::error!(provider = %self.name, ?timeout, "upstream did not respond in time");
                LlmError::transport(&self.name, format!("no response within {timeout:?}"))
            })?
    }

    /// Map transport failures and non-success statuses
    async fn dispatch(&self, builder: RequestBuilder, context: &RequestContext) -> Result<Response, LlmError> {
        let response = tokio::select! {
            biased;
            () = context.cancelled() => return Err(canceled(context)),
            result = builder.send() => result.map_err(|e| {
                tracing::error!(provider = %self.name, error = %e, "upstream request failed");
                LlmError::transport(&self.name, e)
            })?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(provider = %self.name, status = %status, "upstream returned error");

        Err(LlmError::from_status(&self.name, status, body))
    }

    /// Read and deserialize a complete JSON body
    pub async fn read_json<T: DeserializeOwned>(
        &self,
        response: Response,
        context: &RequestContext,
    ) -> Result<T, LlmError> {
        let bytes = tokio::select! {
            biased;
            () = context.cancelled() => return Err(canceled(context)),
            bytes = response.bytes() => bytes.map_err(|e| LlmError::transport(&self.name, e))?,
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            tracing::warn!(provider = %self.name, error = %e, "failed to decode upstream response");
            LlmError::decode(&self.name, e)
        })
    }
}

pub(crate) fn canceled(context: &RequestContext) -> LlmError {
    LlmError::Canceled(context.cancellation_reason().unwrap_or("request canceled").to_owned())
}

/// Fail before any network call if the request was already cancelled
pub(crate) fn ensure_live(context: &RequestContext) -> Result<(), LlmError> {
    if context.is_cancelled() {
        return Err(canceled(context));
    }
    Ok(())
}
