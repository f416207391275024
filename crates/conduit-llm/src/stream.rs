//! Stream normalization shared by every adapter
//!
//! Adapters translate their native incremental encoding through a
//! [`StreamConverter`], which drives a [`StreamNormalizer`] to keep the
//! canonical ordering contract. [`spawn_sse_pump`] runs the network read
//! loop as its own task and hands the caller a bounded event channel.

use std::collections::{BTreeMap, HashMap};

use conduit_core::{ErrorKind, RequestContext};
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::LlmError;
use crate::types::{BlockStart, ContentBlock, Delta, EventStream, MessageResponse, StopReason, StreamEvent, Usage};

/// Capacity of the channel between the read loop and the consumer
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenKind {
    Text,
    Thinking,
    ToolUse,
}

impl From<&BlockStart> for OpenKind {
    fn from(block: &BlockStart) -> Self {
        match block {
            BlockStart::Text => Self::Text,
            BlockStart::Thinking => Self::Thinking,
            BlockStart::ToolUse { .. } => Self::ToolUse,
        }
    }
}

/// Owns the index space of one streamed response
///
/// Operations buffer their events; call [`StreamNormalizer::take`] to drain
/// them. Once the stream is finished, further operations are ignored.
#[derive(Debug, Default)]
pub struct StreamNormalizer {
    next_index: usize,
    open: Vec<(usize, OpenKind)>,
    started: bool,
    finished: bool,
    pending: Vec<StreamEvent>,
}

impl StreamNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `MessageStart`; later calls are ignored
    pub fn start(&mut self, id: impl Into<String>, model: impl Into<String>) {
        if self.started || self.finished {
            return;
        }
        self.started = true;
        self.pending.push(StreamEvent::MessageStart {
            id: id.into(),
            model: model.into(),
        });
    }

    fn ensure_started(&mut self) {
        if !self.started {
            self.start(String::new(), String::new());
        }
    }

    /// Open a block and return its index
    pub fn start_block(&mut self, block: BlockStart) -> usize {
        let index = self.next_index;
        if self.finished {
            return index;
        }
        self.ensure_started();
        self.next_index += 1;
        self.open.push((index, OpenKind::from(&block)));
        self.pending.push(StreamEvent::ContentBlockStart { index, block });
        index
    }

    /// Append a delta to an open block
    ///
    /// Returns `false`, emitting nothing, when `index` is not open.
    pub fn delta(&mut self, index: usize, delta: Delta) -> bool {
        if self.finished || !self.is_open(index) {
            tracing::debug!(index, "dropping delta for a block that is not open");
            return false;
        }
        self.pending.push(StreamEvent::ContentBlockDelta { index, delta });
        true
    }

    /// Close an open block; unknown or already closed indices are ignored
    pub fn stop_block(&mut self, index: usize) {
        if self.finished {
            return;
        }
        if let Some(position) = self.open.iter().position(|(open, _)| *open == index) {
            self.open.remove(position);
            self.pending.push(StreamEvent::ContentBlockStop { index });
        }
    }

    /// Whether `index` is currently open
    pub fn is_open(&self, index: usize) -> bool {
        self.open.iter().any(|(open, _)| *open == index)
    }

    fn close_all(&mut self) {
        for (index, _) in std::mem::take(&mut self.open) {
            self.pending.push(StreamEvent::ContentBlockStop { index });
        }
    }

    /// Close every open block
    pub fn close_open(&mut self) {
        if !self.finished {
            self.close_all();
        }
    }

    fn append(&mut self, kind: OpenKind, delta: Delta) {
        if self.finished {
            return;
        }
        let index = match self.open.last() {
            Some(&(index, open)) if open == kind => index,
            _ => {
                self.close_all();
                self.start_block(match kind {
                    OpenKind::Thinking => BlockStart::Thinking,
                    _ => BlockStart::Text,
                })
            }
        };
        self.delta(index, delta);
    }

    /// Append text to the current text block, opening one if needed
    ///
    /// For encodings that emit content sequentially without explicit block
    /// boundaries. Any other open block is closed first.
    pub fn text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.append(OpenKind::Text, Delta::Text { text });
        }
    }

    /// Append reasoning to the current thinking block, opening one if needed
    pub fn thinking(&mut self, thinking: impl Into<String>) {
        let thinking = thinking.into();
        if !thinking.is_empty() {
            self.append(OpenKind::Thinking, Delta::Thinking { thinking });
        }
    }

    /// Emit a complete tool call as start, one full-input delta and stop
    pub fn atomic_tool_use(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        input: &Map<String, Value>,
        signature: Option<String>,
    ) {
        if self.finished {
            return;
        }
        self.close_all();
        let index = self.start_block(BlockStart::ToolUse {
            id: id.into(),
            name: name.into(),
            signature,
        });
        let partial_json = Value::Object(input.clone()).to_string();
        self.delta(index, Delta::ToolInput { partial_json });
        self.stop_block(index);
    }

    /// Close open blocks, then emit `MessageDelta` and `MessageStop`
    pub fn finish(&mut self, stop_reason: Option<StopReason>, usage: Option<Usage>) {
        if self.finished {
            return;
        }
        self.ensure_started();
        self.close_all();
        self.pending.push(StreamEvent::MessageDelta { stop_reason, usage });
        self.pending.push(StreamEvent::MessageStop);
        self.finished = true;
    }

    /// Close open blocks and end the stream with an error
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        if self.finished {
            return;
        }
        self.close_all();
        self.pending.push(StreamEvent::error(kind, message));
        self.finished = true;
    }

    /// Whether a terminal event has been emitted
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drain buffered events
    pub fn take(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.pending)
    }
}

/// Per-provider translation of one SSE payload into canonical events
pub trait StreamConverter: Send + 'static {
    /// Convert the `data` field of one SSE event
    ///
    /// # Errors
    ///
    /// Returns the parse error when the payload is not the expected JSON.
    fn convert(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error>;

    /// Events owed at end of input, e.g. closing a stream that ended without
    /// an explicit terminator
    fn finish(&mut self) -> Vec<StreamEvent>;

    /// Close whatever is open and end the stream with an error
    ///
    /// Returns nothing once a terminal event was already produced.
    fn fail(&mut self, kind: ErrorKind, message: String) -> Vec<StreamEvent>;
}

fn fail_with<C: StreamConverter>(converter: &mut C, error: &LlmError) -> Vec<StreamEvent> {
    converter.fail(error.kind(), error.to_string())
}

fn canceled(context: &RequestContext) -> LlmError {
    LlmError::Canceled(context.cancellation_reason().unwrap_or("request canceled").into())
}

/// Drive an SSE byte stream through `converter` on a dedicated task
///
/// The returned stream yields events in order through a bounded channel.
/// Cancellation or an elapsed deadline ends it with `Error { canceled }`;
/// a body read failure with `Error { provider_transport }`; an unparseable
/// payload with `Error { provider_decode }`. Nothing follows a terminal event.
pub fn spawn_sse_pump<S, B, E, C>(provider: String, body: S, mut converter: C, context: RequestContext) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    C: StreamConverter,
{
    let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut events = Box::pin(body.eventsource());
        // blocks the consumer has seen open, in start order
        let mut delivered_open: Vec<usize> = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                () = context.cancelled() => {
                    let error = canceled(&context);
                    tracing::debug!(provider = %provider, reason = %error, "stream cancelled");
                    for event in fail_with(&mut converter, &error) {
                        if sender.send(event).await.is_err() {
                            break;
                        }
                    }
                    return;
                }
                next = events.next() => next,
            };

            let batch = match next {
                Some(Ok(event)) => {
                    let data = event.data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    match converter.convert(data) {
                        Ok(batch) => batch,
                        Err(e) => {
                            tracing::warn!(provider = %provider, error = %e, "failed to decode stream event");
                            fail_with(&mut converter, &LlmError::decode(&provider, e))
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(provider = %provider, error = %e, "stream read failed");
                    fail_with(&mut converter, &LlmError::transport(&provider, e))
                }
                None => {
                    let mut batch = converter.finish();
                    if !batch.last().is_some_and(StreamEvent::is_terminal) {
                        let error = LlmError::transport(&provider, "stream ended before the message completed");
                        batch.extend(fail_with(&mut converter, &error));
                    }
                    batch
                }
            };

            for event in batch {
                let terminal = event.is_terminal();
                let opened = match &event {
                    StreamEvent::ContentBlockStart { index, .. } => Some(*index),
                    _ => None,
                };
                let closed = match &event {
                    StreamEvent::ContentBlockStop { index } => Some(*index),
                    _ => None,
                };
                let delivered = tokio::select! {
                    biased;
                    () = context.cancelled() => false,
                    sent = sender.send(event) => sent.is_ok(),
                };
                if !delivered {
                    if context.is_cancelled() {
                        // the rest of this batch is dropped, so close from what was delivered
                        let error = canceled(&context);
                        fail_with(&mut converter, &error);
                        for event in close_delivered(&mut delivered_open, error.into_event()) {
                            if sender.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    return;
                }
                if let Some(index) = opened {
                    delivered_open.push(index);
                }
                if let Some(index) = closed {
                    delivered_open.retain(|open| *open != index);
                }
                if terminal {
                    return;
                }
            }
        }
    });

    Box::pin(ReceiverStream::new(receiver))
}

/// Stops for every delivered block still open, then `terminal`
fn close_delivered(delivered_open: &mut Vec<usize>, terminal: StreamEvent) -> Vec<StreamEvent> {
    let mut tail: Vec<_> = delivered_open
        .drain(..)
        .map(|index| StreamEvent::ContentBlockStop { index })
        .collect();
    tail.push(terminal);
    tail
}

#[derive(Debug)]
enum PartialBlock {
    Text(String),
    Thinking { thinking: String, signature: Option<String> },
    ToolUse { id: String, name: String, signature: Option<String>, json: String },
}

/// Folds a canonical event sequence back into a [`MessageResponse`]
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    id: String,
    model: String,
    open: HashMap<usize, PartialBlock>,
    done: BTreeMap<usize, ContentBlock>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    error: Option<LlmError>,
    complete: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event
    pub fn push(&mut self, event: &StreamEvent) {
        if self.complete || self.error.is_some() {
            return;
        }

        match event {
            StreamEvent::MessageStart { id, model } => {
                self.id.clone_from(id);
                self.model.clone_from(model);
            }
            StreamEvent::ContentBlockStart { index, block } => {
                let partial = match block {
                    BlockStart::Text => PartialBlock::Text(String::new()),
                    BlockStart::Thinking => PartialBlock::Thinking {
                        thinking: String::new(),
                        signature: None,
                    },
                    BlockStart::ToolUse { id, name, signature } => PartialBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        signature: signature.clone(),
                        json: String::new(),
                    },
                };
                self.open.insert(*index, partial);
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                if let Some(partial) = self.open.get_mut(index) {
                    apply_delta(partial, delta);
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                if let Some(partial) = self.open.remove(index) {
                    match finalize(partial) {
                        Ok(block) => {
                            self.done.insert(*index, block);
                        }
                        Err(message) => self.error = Some(LlmError::decode("stream", message)),
                    }
                }
            }
            StreamEvent::MessageDelta { stop_reason, usage } => {
                if stop_reason.is_some() {
                    self.stop_reason = *stop_reason;
                }
                if let Some(usage) = usage {
                    self.usage = *usage;
                }
            }
            StreamEvent::MessageStop => self.complete = true,
            StreamEvent::ToolCall { .. } => {}
            StreamEvent::Error { kind, message } => {
                self.error = Some(LlmError::Stream {
                    kind: *kind,
                    message: message.clone(),
                });
            }
        }
    }

    /// Whether `MessageStop` has been folded
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// The accumulated response
    ///
    /// # Errors
    ///
    /// Returns the stream's terminal error, or a transport error if the
    /// sequence ended without `MessageStop`.
    pub fn finish(self) -> Result<MessageResponse, LlmError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if !self.complete {
            return Err(LlmError::transport("stream", "stream ended before message_stop"));
        }

        Ok(MessageResponse {
            id: self.id,
            model: self.model,
            content: self.done.into_values().collect(),
            stop_reason: self.stop_reason,
            usage: self.usage,
        })
    }
}

fn apply_delta(partial: &mut PartialBlock, delta: &Delta) {
    match (partial, delta) {
        (PartialBlock::Text(text), Delta::Text { text: more }) => text.push_str(more),
        (PartialBlock::Thinking { thinking, .. }, Delta::Thinking { thinking: more }) => thinking.push_str(more),
        (PartialBlock::Thinking { signature, .. }, Delta::Signature { signature: sig }) => {
            *signature = Some(sig.clone());
        }
        (PartialBlock::ToolUse { json, .. }, Delta::ToolInput { partial_json }) => json.push_str(partial_json),
        (_, delta) => tracing::debug!(?delta, "ignoring delta that does not match its block"),
    }
}

fn finalize(partial: PartialBlock) -> Result<ContentBlock, String> {
    Ok(match partial {
        PartialBlock::Text(text) => ContentBlock::Text { text },
        PartialBlock::Thinking { thinking, signature } => ContentBlock::Thinking { thinking, signature },
        PartialBlock::ToolUse {
            id,
            name,
            signature,
            json,
        } => {
            let input = if json.trim().is_empty() {
                Map::new()
            } else {
                match serde_json::from_str(&json) {
                    Ok(Value::Object(map)) => map,
                    Ok(other) => return Err(format!("tool input for '{name}' is not an object: {other}")),
                    Err(e) => return Err(format!("tool input for '{name}' is not valid JSON: {e}")),
                }
            };
            ContentBlock::ToolUse {
                id,
                name,
                input,
                signature,
            }
        }
    })
}

/// Check the canonical ordering contract over a complete event sequence
///
/// Returns a description of the first violation found.
#[cfg(any(test, feature = "test-util"))]
pub fn check_ordering(events: &[StreamEvent]) -> Result<(), String> {
    use std::collections::HashSet;

    let mut open = HashSet::new();
    let mut seen = HashSet::new();
    let mut next_index = 0;

    for (position, event) in events.iter().enumerate() {
        if position + 1 < events.len() && event.is_terminal() {
            return Err(format!("terminal event at position {position} is not last"));
        }
        match event {
            StreamEvent::ContentBlockStart { index, .. } => {
                if *index != next_index || !seen.insert(*index) {
                    return Err(format!("block {index} started out of order"));
                }
                next_index += 1;
                open.insert(*index);
            }
            StreamEvent::ContentBlockDelta { index, .. } if !open.contains(index) => {
                return Err(format!("delta for block {index} outside its start/stop"));
            }
            StreamEvent::ContentBlockStop { index } => {
                if !open.remove(index) {
                    return Err(format!("stop for block {index} that is not open"));
                }
            }
            StreamEvent::MessageDelta { .. } | StreamEvent::MessageStop if !open.is_empty() => {
                return Err(format!("message ended with open blocks {open:?}"));
            }
            _ => {}
        }
    }

    match events.last() {
        Some(StreamEvent::MessageStop) if open.is_empty() => Ok(()),
        Some(StreamEvent::Error { .. }) if open.is_empty() => Ok(()),
        Some(StreamEvent::MessageStop | StreamEvent::Error { .. }) => {
            Err(format!("stream ended with open blocks {open:?}"))
        }
        other => Err(format!("sequence ends with {other:?}")),
    }
}
