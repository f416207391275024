use std::pin::Pin;
use std::task::{Context, Poll};

use conduit_core::RequestContext;
use conduit_llm::StreamEvent;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::DropGuard;

use crate::engine::RunResult;
use crate::error::EngineError;

/// Live view of a streaming run
///
/// Yields every provider event of every turn (each turn is its own
/// `MessageStart` .. `MessageStop` span) interleaved with a `ToolCall` event
/// per finished handler, in the order handlers finish. The sequence ends
/// when the run stops; a failed or cancelled run ends with one `Error`
/// event. Dropping the stream cancels the run.
pub struct RunStream {
    events: ReceiverStream<StreamEvent>,
    handle: JoinHandle<Result<RunResult, EngineError>>,
    context: RequestContext,
    _cancel_on_drop: DropGuard,
}

impl RunStream {
    pub(crate) fn new(
        receiver: mpsc::Receiver<StreamEvent>,
        handle: JoinHandle<Result<RunResult, EngineError>>,
        context: RequestContext,
    ) -> Self {
        let guard = context.token().clone().drop_guard();
        Self {
            events: ReceiverStream::new(receiver),
            handle,
            context,
            _cancel_on_drop: guard,
        }
    }

    /// Stop the run; the stream ends with `Error { canceled }`
    pub fn cancel(&self) {
        self.context.cancel();
    }

    /// Drain the remaining events and return the run's outcome
    pub async fn finish(self) -> Result<RunResult, EngineError> {
        let Self {
            mut events,
            handle,
            _cancel_on_drop,
            ..
        } = self;

        while events.next().await.is_some() {}

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(EngineError::Canceled(format!("run task stopped: {e}"))),
        }
    }
}

impl Stream for RunStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}
