use std::pin::Pin;

use conduit_core::ErrorKind;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::response::{StopReason, Usage};

/// Ordered, finite sequence of canonical stream events
///
/// Failures are delivered in-band as a terminal [`StreamEvent::Error`].
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Canonical streaming event
///
/// Every `ContentBlockStart { index }` is followed by exactly one
/// `ContentBlockStop { index }`, deltas for an index only occur between the
/// two, and indices count up from 0 in emission order. A sequence ends with
/// either `MessageStop` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        id: String,
        model: String,
    },
    ContentBlockStart {
        index: usize,
        block: BlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    MessageStop,
    /// A tool handler finished (synthesized by the run engine)
    ToolCall {
        id: String,
        name: String,
        input: Map<String, Value>,
        is_error: bool,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl StreamEvent {
    /// Whether nothing may follow this event
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageStop | Self::Error { .. })
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }
}

/// Opening shape of a content block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockStart {
    Text,
    Thinking,
    ToolUse {
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

/// Incremental content for an open block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    Text { text: String },
    /// Fragment of the tool input's JSON encoding
    ToolInput { partial_json: String },
    Thinking { thinking: String },
    /// Signature closing a thinking block
    Signature { signature: String },
    /// Base64 audio produced by the model
    Audio { data: String },
}
