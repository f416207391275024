use std::time::Duration;

use serde::Deserialize;

/// Defaults applied to agentic runs that do not override them
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunDefaults {
    /// Maximum tool invocations across one run
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
    /// Maximum model requests across one run
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Overall deadline for one run (e.g. "5m")
    #[serde(default, deserialize_with = "crate::duration::deserialize_option")]
    pub timeout: Option<Duration>,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            max_tool_calls: default_max_tool_calls(),
            max_turns: default_max_turns(),
            timeout: None,
        }
    }
}

const fn default_max_tool_calls() -> usize {
    16
}

const fn default_max_turns() -> usize {
    10
}
