//! Tool handlers and the per-run registry that maps names to them

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{ErrorKind, RequestContext};
use conduit_llm::ContentBlock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure reported by a tool handler
#[derive(Debug, Error)]
pub enum ToolError {
    /// Input did not match what the handler expects
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The handler ran and failed
    #[error("{0}")]
    Failed(String),

    /// The handler observed cancellation and gave up
    #[error("tool call canceled")]
    Canceled,
}

impl ToolError {
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Canceled => ErrorKind::Canceled,
            Self::InvalidInput(_) | Self::Failed(_) => ErrorKind::ToolExecution,
        }
    }
}

/// Executes one named tool on behalf of the run loop
///
/// Handlers run as independent tasks and must honour `context` for
/// cancellation and deadlines.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: Map<String, Value>, context: &RequestContext)
    -> Result<Vec<ContentBlock>, ToolError>;
}

/// Values a typed handler can return as tool result content
pub trait ToolOutput {
    fn into_content(self) -> Vec<ContentBlock>;
}

impl ToolOutput for Vec<ContentBlock> {
    fn into_content(self) -> Vec<ContentBlock> {
        self
    }
}

impl ToolOutput for ContentBlock {
    fn into_content(self) -> Vec<ContentBlock> {
        vec![self]
    }
}

impl ToolOutput for String {
    fn into_content(self) -> Vec<ContentBlock> {
        vec![ContentBlock::text(self)]
    }
}

impl ToolOutput for &'static str {
    fn into_content(self) -> Vec<ContentBlock> {
        vec![ContentBlock::text(self)]
    }
}

/// Structured output is sent to the model as compact JSON text
impl ToolOutput for Value {
    fn into_content(self) -> Vec<ContentBlock> {
        match self {
            Self::String(text) => vec![ContentBlock::text(text)],
            other => vec![ContentBlock::text(other.to_string())],
        }
    }
}

/// Adapts an async closure over a typed input to [`ToolHandler`]
struct FnHandler<F, I> {
    handler: F,
    _input: PhantomData<fn() -> I>,
}

#[async_trait]
impl<F, Fut, I, O> ToolHandler for FnHandler<F, I>
where
    F: Fn(I, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: ToolOutput + Send + 'static,
{
    async fn call(
        &self,
        input: Map<String, Value>,
        context: &RequestContext,
    ) -> Result<Vec<ContentBlock>, ToolError> {
        let input: I =
            serde_json::from_value(Value::Object(input)).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
        let output = (self.handler)(input, context.clone()).await?;
        Ok(output.into_content())
    }
}

/// Tool handlers by name
///
/// Owned by one set of run options; nothing is registered globally. Cloning
/// shares the handlers.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, handler: impl ToolHandler + 'static) -> &mut Self {
        self.register_arc(name, Arc::new(handler))
    }

    pub fn register_arc(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> &mut Self {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::debug!(tool = %name, "replaced tool handler");
        }
        self
    }

    /// Register an async function taking its own input type
    ///
    /// The input map is deserialized into `I`; a mismatch is reported to the
    /// model as an invalid-input tool error.
    pub fn register_fn<F, Fut, I, O>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(I, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: ToolOutput + Send + 'static,
    {
        self.register(
            name,
            FnHandler {
                handler,
                _input: PhantomData,
            },
        )
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}
