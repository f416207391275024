use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Caller-authored turn, including tool results
    User,
    /// Model-authored turn
    Assistant,
}

/// One turn of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author of the turn
    pub role: Role,
    /// Ordered content blocks
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// A user turn holding a single text block
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// An assistant turn holding the given blocks
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// A user turn carrying tool results back to the model
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: results,
        }
    }

    /// Concatenated text of all text blocks
    pub fn text(&self) -> String {
        collect_text(&self.content)
    }

    /// Tool-use blocks in this turn, in order
    pub fn tool_uses(&self) -> impl Iterator<Item = ToolUseRef<'_>> {
        tool_uses(&self.content)
    }
}

/// A single unit of message content
///
/// Serializes with a `type` tag in the shape of the Anthropic Messages API,
/// which is the canonical wire shape of this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// Image, inline or by reference
    Image {
        /// Where the bytes come from
        source: MediaSource,
    },
    /// Audio clip
    Audio {
        /// Where the bytes come from
        source: MediaSource,
    },
    /// Video clip
    Video {
        /// Where the bytes come from
        source: MediaSource,
    },
    /// Document such as a PDF
    Document {
        /// Where the bytes come from
        source: MediaSource,
    },
    /// Model request to invoke a tool
    ToolUse {
        /// Identifier, unique within the producing response
        id: String,
        /// Tool name
        name: String,
        /// Tool arguments
        input: Map<String, Value>,
        /// Opaque continuation signature some providers attach to tool calls
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// Outcome of a tool invocation
    ToolResult {
        /// Id of the `ToolUse` this answers
        tool_use_id: String,
        /// Result content, typically text
        content: Vec<ContentBlock>,
        /// Whether the content describes a failure
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// Model reasoning carried across turns
    Thinking {
        /// Reasoning text
        thinking: String,
        /// Provider signature that must accompany the reasoning when replayed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

impl ContentBlock {
    /// A text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// A tool result holding a single text block
    pub fn tool_result(tool_use_id: impl Into<String>, text: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: vec![Self::text(text)],
            is_error,
        }
    }

    /// Text of a text block
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Borrowed view of a tool-use block
    pub fn as_tool_use(&self) -> Option<ToolUseRef<'_>> {
        match self {
            Self::ToolUse {
                id,
                name,
                input,
                signature,
            } => Some(ToolUseRef {
                id,
                name,
                input,
                signature: signature.as_deref(),
            }),
            _ => None,
        }
    }

    /// Variant name used in error messages
    pub const fn variant_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Audio { .. } => "audio",
            Self::Video { .. } => "video",
            Self::Document { .. } => "document",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::Thinking { .. } => "thinking",
        }
    }
}

/// Borrowed fields of a [`ContentBlock::ToolUse`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolUseRef<'a> {
    /// Tool-use id
    pub id: &'a str,
    /// Tool name
    pub name: &'a str,
    /// Tool arguments
    pub input: &'a Map<String, Value>,
    /// Continuation signature
    pub signature: Option<&'a str>,
}

/// Source of binary media
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaSource {
    /// Inline base64-encoded bytes
    Base64 {
        /// MIME type (e.g. "image/png")
        media_type: String,
        /// Base64 payload
        data: String,
    },
    /// Reference the provider fetches itself (`https://`, `gs://`)
    Url {
        /// Location of the media
        url: String,
        /// MIME type, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

impl MediaSource {
    /// Inline source from raw bytes
    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::Base64 {
            media_type: media_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Reference source
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url {
            url: url.into(),
            media_type: None,
        }
    }

    /// MIME type, when known
    pub fn media_type(&self) -> Option<&str> {
        match self {
            Self::Base64 { media_type, .. } => Some(media_type),
            Self::Url { media_type, .. } => media_type.as_deref(),
        }
    }
}

pub(crate) fn collect_text(blocks: &[ContentBlock]) -> String {
    blocks.iter().filter_map(ContentBlock::as_text).collect()
}

pub(crate) fn tool_uses(blocks: &[ContentBlock]) -> impl Iterator<Item = ToolUseRef<'_>> {
    blocks.iter().filter_map(ContentBlock::as_tool_use)
}

/// Find the tool name a `tool_use_id` refers to
///
/// Walks `messages` backward from `before` (exclusive) to the nearest tool
/// use with that id. Returns `None` when no such tool use exists.
pub fn resolve_tool_name<'a>(messages: &'a [Message], before: usize, tool_use_id: &str) -> Option<&'a str> {
    messages[..before.min(messages.len())]
        .iter()
        .rev()
        .flat_map(|message| message.content.iter().rev())
        .filter_map(ContentBlock::as_tool_use)
        .find(|tool_use| tool_use.id == tool_use_id)
        .map(|tool_use| tool_use.name)
}
