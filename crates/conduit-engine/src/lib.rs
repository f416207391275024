//! Agentic run engine for Conduit
//!
//! Wraps a [`ProviderSet`](conduit_llm::ProviderSet) with single-call entry
//! points and a tool loop that executes registered handlers concurrently,
//! feeds their results back to the model and stops on natural completion,
//! budgets, a caller predicate or cancellation.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod engine;
mod error;
mod options;
mod stream;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
mod tools;

pub use engine::{Engine, RunResult, TOOL_LIMIT_MESSAGE};
pub use error::EngineError;
pub use options::{RunOptions, RunState, StopCause, StopPredicate, ToolErrorAction, ToolErrorHook};
pub use stream::RunStream;
pub use tools::{ToolError, ToolHandler, ToolOutput, ToolRegistry};
