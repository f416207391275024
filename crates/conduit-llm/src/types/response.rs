use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use super::message::{ContentBlock, ToolUseRef, collect_text, tool_uses};

/// Canonical complete response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Provider response identifier
    pub id: String,
    /// Model that produced the response
    pub model: String,
    /// Ordered content blocks
    pub content: Vec<ContentBlock>,
    /// Why generation stopped
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    /// Token accounting reported by the provider
    #[serde(default)]
    pub usage: Usage,
}

impl MessageResponse {
    /// Concatenated text of all text blocks
    pub fn text(&self) -> String {
        collect_text(&self.content)
    }

    /// Tool-use blocks, in order
    pub fn tool_uses(&self) -> impl Iterator<Item = ToolUseRef<'_>> {
        tool_uses(&self.content)
    }

    /// Whether any tool-use block is present
    pub fn has_tool_use(&self) -> bool {
        self.tool_uses().next().is_some()
    }
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    /// Output was withheld for safety or policy reasons
    Refusal,
}

/// Token accounting
///
/// Providers report usage independently, so totals are not comparable
/// across providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    pub input_tokens: u32,
    /// Generated tokens
    pub output_tokens: u32,
}

impl Usage {
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}
