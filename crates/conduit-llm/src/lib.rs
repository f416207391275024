//! Provider-agnostic LLM access for Conduit
//!
//! Defines the canonical message model, adapters translating it to and from
//! each provider's wire format (Anthropic, `OpenAI` Responses, Gemini and
//! `OpenAI`-compatible chat completions), the stream normalizer that gives
//! every adapter the same event ordering, and the configured provider set.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod convert;
pub mod error;
mod http_client;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod stream;
pub mod types;

pub use error::LlmError;
pub use provider::{Capabilities, Provider};
pub use registry::{ModelId, ProviderSet};
pub use stream::{StreamAccumulator, StreamNormalizer};
pub use types::*;
