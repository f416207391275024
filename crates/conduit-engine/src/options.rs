use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use conduit_config::RunDefaults;
use conduit_llm::{Message, MessageResponse, Usage};
use serde::Serialize;

use crate::tools::{ToolError, ToolRegistry};

/// Caller-supplied predicate consulted after every completed turn
pub type StopPredicate = Arc<dyn Fn(&RunState<'_>) -> bool + Send + Sync>;

/// Caller-supplied hook deciding what a tool failure does to the run
pub type ToolErrorHook = Arc<dyn Fn(&str, &ToolError) -> ToolErrorAction + Send + Sync>;

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StopCause {
    /// The model answered without requesting tools
    Completed,
    /// The model requested only tools with no registered handler
    UnhandledTools,
    /// Tool-call budget reached
    MaxToolCalls,
    /// Turn budget reached
    MaxTurns,
    /// The stop predicate returned true
    Predicate,
}

impl StopCause {
    /// Whether the run was cut short by a budget rather than finishing
    pub const fn is_limit(self) -> bool {
        matches!(self, Self::MaxToolCalls | Self::MaxTurns)
    }
}

/// What a failed tool call does to the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ToolErrorAction {
    /// Report the failure to the model as an error tool result
    #[default]
    Recover,
    /// End the run with a `tool_execution` error
    Abort,
}

/// Progress of a run, as seen by a stop predicate
#[derive(Debug, Clone, Copy)]
pub struct RunState<'a> {
    /// Completed model requests
    pub turns: usize,
    /// Tool handlers invoked so far
    pub tool_calls: usize,
    /// Usage summed over every turn
    pub usage: Usage,
    /// History including the latest turn
    pub messages: &'a [Message],
    pub last_response: &'a MessageResponse,
}

/// Limits, tools and hooks for one agentic run
#[derive(Clone)]
pub struct RunOptions {
    pub max_tool_calls: usize,
    pub max_turns: usize,
    /// Deadline for the whole run, on top of any the caller's context carries
    pub timeout: Option<Duration>,
    pub stop_when: Option<StopPredicate>,
    pub tools: ToolRegistry,
    pub on_tool_error: Option<ToolErrorHook>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&RunDefaults::default())
    }
}

impl From<&RunDefaults> for RunOptions {
    fn from(defaults: &RunDefaults) -> Self {
        Self {
            max_tool_calls: defaults.max_tool_calls,
            max_turns: defaults.max_turns,
            timeout: defaults.timeout,
            stop_when: None,
            tools: ToolRegistry::new(),
            on_tool_error: None,
        }
    }
}

impl RunOptions {
    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub const fn max_tool_calls(mut self, max_tool_calls: usize) -> Self {
        self.max_tool_calls = max_tool_calls;
        self
    }

    #[must_use]
    pub const fn max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn stop_when(mut self, predicate: impl Fn(&RunState<'_>) -> bool + Send + Sync + 'static) -> Self {
        self.stop_when = Some(Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn on_tool_error(mut self, hook: impl Fn(&str, &ToolError) -> ToolErrorAction + Send + Sync + 'static) -> Self {
        self.on_tool_error = Some(Arc::new(hook));
        self
    }

    pub(crate) fn tool_error_action(&self, name: &str, error: &ToolError) -> ToolErrorAction {
        self.on_tool_error
            .as_ref()
            .map_or(ToolErrorAction::Recover, |hook| hook(name, error))
    }

    pub(crate) fn should_stop(&self, state: &RunState<'_>) -> bool {
        self.stop_when.as_ref().is_some_and(|predicate| predicate(state))
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("max_tool_calls", &self.max_tool_calls)
            .field("max_turns", &self.max_turns)
            .field("timeout", &self.timeout)
            .field("stop_when", &self.stop_when.is_some())
            .field("tools", &self.tools)
            .field("on_tool_error", &self.on_tool_error.is_some())
            .finish()
    }
}
