//! The agentic run loop
//!
//! A run alternates between requesting a response and executing the tool
//! calls it asks for, until the model stops asking, a budget is spent, the
//! caller's predicate fires or the run is cancelled. The blocking and
//! streaming entry points share one driver; streaming additionally forwards
//! every provider event and a `ToolCall` event per finished handler.

use std::sync::Arc;

use conduit_config::{Config, RunDefaults};
use conduit_core::RequestContext;
use conduit_llm::{
    ContentBlock, EventStream, LlmError, Message, MessageRequest, MessageResponse, Provider, ProviderSet,
    StreamAccumulator, StreamEvent, Usage,
};
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::options::{RunOptions, RunState, StopCause, ToolErrorAction};
use crate::stream::RunStream;
use crate::tools::ToolError;

/// Error text given to tool calls beyond the run's budget
pub const TOOL_LIMIT_MESSAGE: &str = "tool call limit reached";

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Response of the last model request
    pub response: MessageResponse,
    /// Input history followed by every appended assistant and tool-result message
    pub messages: Vec<Message>,
    pub turns: usize,
    pub tool_calls: usize,
    /// Usage summed over every turn
    pub usage: Usage,
    pub stop: StopCause,
}

impl RunResult {
    /// Text of the last response
    pub fn text(&self) -> String {
        self.response.text()
    }
}

/// Entry point for single calls and agentic runs over a set of providers
#[derive(Debug, Clone)]
pub struct Engine {
    providers: ProviderSet,
    defaults: RunDefaults,
}

impl Engine {
    pub fn new(providers: ProviderSet) -> Self {
        Self {
            providers,
            defaults: RunDefaults::default(),
        }
    }

    /// Build every configured provider and take run defaults from `config`
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let providers = ProviderSet::from_config(&config.llm)?;
        Ok(Self::new(providers).with_defaults(config.run.clone()))
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: RunDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub const fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Run options seeded from the configured defaults
    pub fn run_options(&self) -> RunOptions {
        RunOptions::from(&self.defaults)
    }

    /// Send one request to the provider named by its model string
    pub async fn create_message(
        &self,
        request: &MessageRequest,
        context: &RequestContext,
    ) -> Result<MessageResponse, LlmError> {
        let (provider, request) = self.prepare(request)?;
        provider.create_message(&request, context).await
    }

    /// Stream one request from the provider named by its model string
    pub async fn stream_message(
        &self,
        request: &MessageRequest,
        context: &RequestContext,
    ) -> Result<EventStream, LlmError> {
        let (provider, request) = self.prepare(request)?;
        provider.stream_message(&request, context).await
    }

    /// Run the tool loop to completion and return the final state
    pub async fn run(
        &self,
        request: MessageRequest,
        options: RunOptions,
        context: &RequestContext,
    ) -> Result<RunResult, EngineError> {
        let (provider, request) = self.prepare(&request)?;
        let context = run_context(context, &options);
        let mut driver = Driver::new(provider, request, options, context, None);
        driver.drive().await
    }

    /// Run the tool loop on its own task, streaming events as they occur
    ///
    /// Resolution failures surface as the stream's only event.
    pub fn run_stream(&self, request: MessageRequest, options: RunOptions, context: &RequestContext) -> RunStream {
        let context = run_context(context, &options);
        let (sender, receiver) = mpsc::channel(conduit_llm::stream::EVENT_CHANNEL_CAPACITY);
        let prepared = self.prepare(&request);
        let task_context = context.clone();

        let handle = tokio::spawn(async move {
            let (provider, request) = match prepared {
                Ok(prepared) => prepared,
                Err(e) => {
                    let error = EngineError::from(e);
                    let _ = sender.send(error.to_event()).await;
                    return Err(error);
                }
            };

            let mut driver = Driver::new(provider, request, options, task_context, Some(sender.clone()));
            let result = driver.drive().await;
            if let Err(e) = &result
                && !driver.error_forwarded
            {
                tracing::debug!(error = %e, "run ended with error");
                let _ = sender.send(e.to_event()).await;
            }
            result
        });

        RunStream::new(receiver, handle, context)
    }

    /// Resolve the adapter and rewrite the request for it
    fn prepare(&self, request: &MessageRequest) -> Result<(Arc<dyn Provider>, MessageRequest), LlmError> {
        let (provider, model) = self.providers.resolve(&request.model)?;
        let mut request = MessageRequest {
            model: model.to_owned(),
            ..request.clone()
        };

        if !provider.capabilities().tools && (!request.tools.is_empty() || request.tool_choice.is_some()) {
            tracing::debug!(provider = %provider.name(), "provider has no tool support, dropping tools");
            request.tools.clear();
            request.tool_choice = None;
        }

        Ok((provider, request))
    }
}

fn run_context(parent: &RequestContext, options: &RunOptions) -> RequestContext {
    let context = parent.child();
    match options.timeout {
        Some(timeout) => context.with_timeout(timeout),
        None => context,
    }
}

struct PendingCall {
    id: String,
    name: String,
    input: Map<String, Value>,
}

/// State of one run
struct Driver {
    provider: Arc<dyn Provider>,
    request: MessageRequest,
    options: RunOptions,
    context: RequestContext,
    events: Option<mpsc::Sender<StreamEvent>>,
    error_forwarded: bool,
    turns: usize,
    tool_calls: usize,
    usage: Usage,
}

impl Driver {
    fn new(
        provider: Arc<dyn Provider>,
        request: MessageRequest,
        options: RunOptions,
        context: RequestContext,
        events: Option<mpsc::Sender<StreamEvent>>,
    ) -> Self {
        Self {
            provider,
            request,
            options,
            context,
            events,
            error_forwarded: false,
            turns: 0,
            tool_calls: 0,
            usage: Usage::default(),
        }
    }

    fn canceled(&self) -> EngineError {
        EngineError::Canceled(self.context.cancellation_reason().unwrap_or("request canceled").to_owned())
    }

    async fn drive(&mut self) -> Result<RunResult, EngineError> {
        loop {
            if self.context.is_cancelled() {
                return Err(self.canceled());
            }

            let response = self.request_turn().await?;
            self.turns += 1;
            self.usage += response.usage;
            tracing::debug!(
                provider = %self.provider.name(),
                turn = self.turns,
                stop_reason = ?response.stop_reason,
                "turn completed"
            );

            let calls: Vec<PendingCall> = response
                .tool_uses()
                .map(|tool_use| PendingCall {
                    id: tool_use.id.to_owned(),
                    name: tool_use.name.to_owned(),
                    input: tool_use.input.clone(),
                })
                .collect();

            self.request.messages.push(Message::assistant(response.content.clone()));

            if calls.is_empty() {
                return Ok(self.finish(response, StopCause::Completed));
            }
            if !calls.iter().any(|call| self.options.tools.contains(&call.name)) {
                return Ok(self.finish(response, StopCause::UnhandledTools));
            }

            let truncated = self.execute(calls).await?;

            let stop = if truncated || self.tool_calls >= self.options.max_tool_calls {
                Some(StopCause::MaxToolCalls)
            } else if self.turns >= self.options.max_turns {
                Some(StopCause::MaxTurns)
            } else if self.options.should_stop(&RunState {
                turns: self.turns,
                tool_calls: self.tool_calls,
                usage: self.usage,
                messages: &self.request.messages,
                last_response: &response,
            }) {
                Some(StopCause::Predicate)
            } else {
                None
            };

            if let Some(stop) = stop {
                return Ok(self.finish(response, stop));
            }
        }
    }

    async fn request_turn(&mut self) -> Result<MessageResponse, EngineError> {
        if self.events.is_none() {
            return Ok(self.provider.create_message(&self.request, &self.context).await?);
        }

        let mut stream = self.provider.stream_message(&self.request, &self.context).await?;
        let mut accumulator = StreamAccumulator::new();
        while let Some(event) = stream.next().await {
            accumulator.push(&event);
            let terminal = event.is_terminal();
            self.emit(event).await?;
            if terminal {
                break;
            }
        }

        Ok(accumulator.finish()?)
    }

    /// Run every handled call concurrently and append the tool results
    ///
    /// Returns whether calls were refused for lack of budget.
    async fn execute(&mut self, calls: Vec<PendingCall>) -> Result<bool, EngineError> {
        let mut budget = self.options.max_tool_calls.saturating_sub(self.tool_calls);
        let mut truncated = false;
        let mut results: Vec<Option<ContentBlock>> = vec![None; calls.len()];
        let mut in_flight = FuturesUnordered::new();

        for (slot, call) in calls.iter().enumerate() {
            let Some(handler) = self.options.tools.get(&call.name) else {
                tracing::warn!(tool = %call.name, "no handler registered for tool");
                results[slot] = Some(ContentBlock::tool_result(
                    &call.id,
                    format!("no handler registered for tool '{}'", call.name),
                    true,
                ));
                continue;
            };
            if budget == 0 {
                truncated = true;
                results[slot] = Some(ContentBlock::tool_result(&call.id, TOOL_LIMIT_MESSAGE, true));
                continue;
            }
            budget -= 1;
            self.tool_calls += 1;

            let handler = Arc::clone(handler);
            let input = call.input.clone();
            let context = self.context.child();
            let task = tokio::spawn(async move { handler.call(input, &context).await });
            in_flight.push(task.map(move |joined| (slot, joined)));
        }

        // Dropping the join handles on cancellation detaches the tasks; they
        // finish on their own and their results are discarded.
        loop {
            let next = tokio::select! {
                biased;
                () = self.context.cancelled() => return Err(self.canceled()),
                next = in_flight.next() => next,
            };
            let Some((slot, joined)) = next else { break };

            let call = &calls[slot];
            let outcome = joined.unwrap_or_else(|e| Err(ToolError::failed(format!("tool task failed: {e}"))));
            let is_error = outcome.is_err();

            let result = match outcome {
                Ok(content) => ContentBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content,
                    is_error: false,
                },
                Err(e) => {
                    tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                    if self.options.tool_error_action(&call.name, &e) == ToolErrorAction::Abort {
                        return Err(EngineError::Tool {
                            name: call.name.clone(),
                            source: e,
                        });
                    }
                    ContentBlock::tool_result(&call.id, e.to_string(), true)
                }
            };
            results[slot] = Some(result);

            self.emit(StreamEvent::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
                is_error,
            })
            .await?;
        }

        self.request
            .messages
            .push(Message::tool_results(results.into_iter().flatten().collect()));

        Ok(truncated)
    }

    /// Forward an event to the streaming caller, if there is one
    async fn emit(&mut self, event: StreamEvent) -> Result<(), EngineError> {
        let Some(sender) = &self.events else {
            return Ok(());
        };

        let is_error = matches!(event, StreamEvent::Error { .. });
        let delivered = tokio::select! {
            biased;
            () = self.context.cancelled() => false,
            sent = sender.send(event) => sent.is_ok(),
        };
        if !delivered {
            if self.context.is_cancelled() {
                return Err(self.canceled());
            }
            return Err(EngineError::Canceled("run stream dropped".into()));
        }

        self.error_forwarded |= is_error;
        Ok(())
    }

    fn finish(&mut self, response: MessageResponse, stop: StopCause) -> RunResult {
        tracing::debug!(
            provider = %self.provider.name(),
            turns = self.turns,
            tool_calls = self.tool_calls,
            stop = %stop,
            "run stopped"
        );

        RunResult {
            response,
            messages: std::mem::take(&mut self.request.messages),
            turns: self.turns,
            tool_calls: self.tool_calls,
            usage: self.usage,
            stop,
        }
    }
}
