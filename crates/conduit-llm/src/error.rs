use conduit_core::{ErrorKind, HttpError};
use http::StatusCode;
use thiserror::Error;

use crate::types::StreamEvent;

/// Errors produced by adapters and the provider set
#[derive(Debug, Error)]
pub enum LlmError {
    /// Request cannot be expressed for the target provider
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Model string names a provider that is not configured
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Network failure or upstream unavailable
    #[error("{provider} transport error: {message}")]
    Transport { provider: String, message: String },

    /// Upstream declined the request
    #[error("{provider} rejected the request: {message}")]
    Rejected {
        provider: String,
        /// HTTP status, absent for in-band rejections such as a blocked prompt
        status: Option<StatusCode>,
        message: String,
    },

    /// Upstream payload could not be parsed
    #[error("failed to decode {provider} response: {message}")]
    Decode { provider: String, message: String },

    /// Cancelled by the caller or deadline
    #[error("{0}")]
    Canceled(String),

    /// Terminal error event observed on a stream
    #[error("{message}")]
    Stream { kind: ErrorKind, message: String },
}

impl LlmError {
    /// Position in the shared error taxonomy
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) | Self::UnknownProvider(_) => ErrorKind::InvalidRequest,
            Self::Transport { .. } => ErrorKind::ProviderTransport,
            Self::Rejected { .. } => ErrorKind::ProviderRejected,
            Self::Decode { .. } => ErrorKind::ProviderDecode,
            Self::Canceled(_) => ErrorKind::Canceled,
            Self::Stream { kind, .. } => *kind,
        }
    }

    /// Classify a non-success HTTP status
    ///
    /// 5xx and 408 mean the upstream was unavailable; every other status is
    /// the upstream declining the request.
    pub fn from_status(provider: &str, status: StatusCode, body: String) -> Self {
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            Self::Transport {
                provider: provider.to_owned(),
                message: format!("upstream returned {status}: {body}"),
            }
        } else {
            Self::Rejected {
                provider: provider.to_owned(),
                status: Some(status),
                message: body,
            }
        }
    }

    pub fn transport(provider: &str, error: impl std::fmt::Display) -> Self {
        Self::Transport {
            provider: provider.to_owned(),
            message: error.to_string(),
        }
    }

    pub fn decode(provider: &str, error: impl std::fmt::Display) -> Self {
        Self::Decode {
            provider: provider.to_owned(),
            message: error.to_string(),
        }
    }

    /// Terminal stream event describing this error
    pub fn into_event(self) -> StreamEvent {
        StreamEvent::error(self.kind(), self.to_string())
    }
}

impl HttpError for LlmError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Rejected {
                status: Some(status), ..
            } if status.is_client_error() => *status,
            other => other.kind().status_code(),
        }
    }

    fn error_type(&self) -> &str {
        self.kind().error_type()
    }

    fn client_message(&self) -> String {
        match self {
            Self::Transport { provider, .. } => format!("{provider} is unavailable"),
            other => other.to_string(),
        }
    }
}
