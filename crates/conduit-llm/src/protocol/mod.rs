//! Serde mirrors of each provider's JSON wire format
//!
//! Nothing outside `convert` and `provider` touches these; the rest of the
//! crate works on the canonical types.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod openai_chat;
