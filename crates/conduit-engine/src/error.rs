use conduit_core::{ErrorKind, HttpError};
use conduit_llm::{LlmError, StreamEvent};
use http::StatusCode;
use thiserror::Error;

use crate::tools::ToolError;

/// Errors that end an agentic run
#[derive(Debug, Error)]
pub enum EngineError {
    /// Provider resolution, translation or upstream failure
    #[error(transparent)]
    Llm(LlmError),

    /// A tool handler failed and the error hook chose to abort
    #[error("tool '{name}' failed: {source}")]
    Tool {
        name: String,
        #[source]
        source: ToolError,
    },

    /// Deadline elapsed or the caller cancelled
    #[error("{0}")]
    Canceled(String),
}

impl EngineError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Llm(e) => e.kind(),
            Self::Tool { .. } => ErrorKind::ToolExecution,
            Self::Canceled(_) => ErrorKind::Canceled,
        }
    }

    /// Terminal stream event describing this error
    pub fn to_event(&self) -> StreamEvent {
        StreamEvent::error(self.kind(), self.to_string())
    }
}

impl From<LlmError> for EngineError {
    fn from(error: LlmError) -> Self {
        match error {
            LlmError::Canceled(reason) => Self::Canceled(reason),
            LlmError::Stream {
                kind: ErrorKind::Canceled,
                message,
            } => Self::Canceled(message),
            other => Self::Llm(other),
        }
    }
}

impl HttpError for EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Llm(e) => e.status_code(),
            other => other.kind().status_code(),
        }
    }

    fn error_type(&self) -> &str {
        self.kind().error_type()
    }

    fn client_message(&self) -> String {
        match self {
            Self::Llm(e) => e.client_message(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_lifted_out_of_llm_errors() {
        let error = EngineError::from(LlmError::Canceled("deadline exceeded".into()));
        assert!(matches!(error, EngineError::Canceled(ref reason) if reason == "deadline exceeded"));

        let error = EngineError::from(LlmError::Stream {
            kind: ErrorKind::Canceled,
            message: "request canceled".into(),
        });
        assert_eq!(error.kind(), ErrorKind::Canceled);
    }

    #[test]
    fn llm_errors_keep_their_status() {
        let error = EngineError::from(LlmError::from_status("claude", StatusCode::TOO_MANY_REQUESTS, "slow down".into()));
        assert_eq!(error.kind(), ErrorKind::ProviderRejected);
        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn aborted_tool_reports_tool_execution() {
        let error = EngineError::Tool {
            name: "get_weather".into(),
            source: ToolError::failed("station offline"),
        };
        assert_eq!(error.kind(), ErrorKind::ToolExecution);
        assert_eq!(error.to_string(), "tool 'get_weather' failed: station offline");
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
