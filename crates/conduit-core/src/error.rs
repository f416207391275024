use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Error taxonomy shared by adapters, the run engine and voice sessions
///
/// Every crate-level error type maps onto exactly one of these kinds, and
/// streaming errors carry the kind on their terminal `Error` event.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or unsupported request shape, unknown provider or model
    InvalidRequest,
    /// Adapter could not parse the upstream payload
    ProviderDecode,
    /// Network failure or upstream unavailable
    ProviderTransport,
    /// Upstream declined for policy, safety or quota reasons
    ProviderRejected,
    /// A registered tool handler failed
    ToolExecution,
    /// Deadline elapsed or the caller cancelled
    Canceled,
    /// Tool-call or turn budget reached
    ///
    /// A normal terminal state of a run, never surfaced as a failure.
    LimitExceeded,
}

impl ErrorKind {
    /// HTTP status the serving layer should answer with
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::ProviderDecode | Self::ProviderTransport => StatusCode::BAD_GATEWAY,
            Self::ProviderRejected => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ToolExecution => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Canceled => StatusCode::REQUEST_TIMEOUT,
            Self::LimitExceeded => StatusCode::OK,
        }
    }

    /// Machine-readable error type string (e.g. `invalid_request_error`)
    pub const fn error_type(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request_error",
            Self::ProviderDecode => "provider_decode_error",
            Self::ProviderTransport => "provider_transport_error",
            Self::ProviderRejected => "provider_rejected_error",
            Self::ToolExecution => "tool_execution_error",
            Self::Canceled => "canceled_error",
            Self::LimitExceeded => "limit_exceeded",
        }
    }
}

/// Trait for domain errors that can be converted to HTTP responses
///
/// Implemented by each feature crate's error type. The serving layer
/// converts these into actual HTTP responses, keeping domain errors
/// decoupled from any web framework.
pub trait HttpError: std::error::Error {
    /// HTTP status code for this error
    fn status_code(&self) -> StatusCode;

    /// Machine-readable error type (e.g. `invalid_request_error`)
    fn error_type(&self) -> &str;

    /// Message safe to expose to API consumers
    fn client_message(&self) -> String;
}
