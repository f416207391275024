use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool the model may invoke
///
/// `Function` is supported by every adapter; the native variants are
/// omitted by adapters whose provider has no equivalent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Tool {
    /// Caller-implemented function
    Function(FunctionTool),
    /// Provider-hosted web search
    WebSearch(WebSearchConfig),
    /// Provider-hosted code sandbox
    CodeExecution(CodeExecutionConfig),
    /// Provider-hosted retrieval over uploaded files
    FileSearch(FileSearchConfig),
    /// Provider-driven computer control
    ComputerUse(ComputerUseConfig),
    /// Provider-defined file editing tool
    TextEditor(TextEditorConfig),
    /// Provider-hosted image generation
    ImageGeneration(ImageGenerationConfig),
}

impl Tool {
    /// A function tool
    pub fn function(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self::Function(FunctionTool {
            name: name.into(),
            description: description.into(),
            input_schema,
        })
    }

    /// Discriminant used by capability sets
    pub const fn kind(&self) -> ToolKind {
        match self {
            Self::Function(_) => ToolKind::Function,
            Self::WebSearch(_) => ToolKind::WebSearch,
            Self::CodeExecution(_) => ToolKind::CodeExecution,
            Self::FileSearch(_) => ToolKind::FileSearch,
            Self::ComputerUse(_) => ToolKind::ComputerUse,
            Self::TextEditor(_) => ToolKind::TextEditor,
            Self::ImageGeneration(_) => ToolKind::ImageGeneration,
        }
    }
}

/// Discriminant of [`Tool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ToolKind {
    Function,
    WebSearch,
    CodeExecution,
    FileSearch,
    ComputerUse,
    TextEditor,
    ImageGeneration,
}

/// Caller-implemented function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTool {
    /// Function name
    pub name: String,
    /// What the function does, shown to the model
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the input object
    pub input_schema: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSearchConfig {
    /// Upper bound on searches per response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_uses: Option<u32>,
    /// Only search these domains
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_domains: Vec<String>,
    /// Never search these domains
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_domains: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeExecutionConfig {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSearchConfig {
    /// Vector stores to search
    #[serde(default)]
    pub vector_store_ids: Vec<String>,
    /// Upper bound on returned chunks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputerUseConfig {
    /// Display width in pixels (1024 when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_width: Option<u32>,
    /// Display height in pixels (768 when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_height: Option<u32>,
    /// Environment being controlled, e.g. "browser" (the default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl ComputerUseConfig {
    pub const DEFAULT_WIDTH: u32 = 1024;
    pub const DEFAULT_HEIGHT: u32 = 768;

    pub fn width(&self) -> u32 {
        self.display_width.unwrap_or(Self::DEFAULT_WIDTH)
    }

    pub fn height(&self) -> u32 {
        self.display_height.unwrap_or(Self::DEFAULT_HEIGHT)
    }

    pub fn environment(&self) -> &str {
        self.environment.as_deref().unwrap_or("browser")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEditorConfig {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageGenerationConfig {}

/// How the model should pick tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides
    Auto,
    /// Never call a tool
    None,
    /// Must call some tool
    Any,
    /// Must call exactly this tool
    Tool {
        /// Tool name
        name: String,
    },
}
