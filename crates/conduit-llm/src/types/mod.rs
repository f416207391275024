//! Canonical, provider-agnostic model
//!
//! Every adapter translates to and from these types; nothing here knows
//! about any particular provider.

pub mod message;
pub mod request;
pub mod response;
pub mod stream;
pub mod tool;

pub use message::{ContentBlock, MediaSource, Message, Role, ToolUseRef, resolve_tool_name};
pub use request::{MessageRequest, OutputFormat, SystemPrompt};
pub use response::{MessageResponse, StopReason, Usage};
pub use stream::{BlockStart, Delta, EventStream, StreamEvent};
pub use tool::{
    CodeExecutionConfig, ComputerUseConfig, FileSearchConfig, FunctionTool, ImageGenerationConfig, TextEditorConfig,
    Tool, ToolChoice, ToolKind, WebSearchConfig,
};
