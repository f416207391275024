use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Runtime context for a single provider call, run or tool invocation
///
/// Carries the cooperative cancellation signal and optional deadline that
/// every adapter call and tool handler must honour. Cloning shares the same
/// cancellation token; use [`RequestContext::child`] for a scope that can be
/// cancelled without affecting its parent.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Identifier used to correlate log lines for one request
    pub request_id: String,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Create a context with a fresh cancellation token and no deadline
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Create a context driven by an existing cancellation token
    pub fn with_token(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            ..Self::new()
        }
    }

    /// Tighten the deadline to `timeout` from now
    ///
    /// An earlier existing deadline is kept.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Tighten the deadline to `deadline`
    ///
    /// An earlier existing deadline is kept.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |current| current.min(deadline)));
        self
    }

    /// Derive a child scope
    ///
    /// Cancelling the parent cancels the child; cancelling the child leaves
    /// the parent untouched. The deadline and request id are inherited.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
        }
    }

    /// Request cancellation of this scope and all children
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Underlying cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Deadline, if one is set
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the deadline has elapsed
    pub fn deadline_elapsed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Whether the scope was cancelled or its deadline elapsed
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled() || self.deadline_elapsed()
    }

    /// Resolve once the scope is cancelled or the deadline elapses
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.cancellation.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancellation.cancelled().await,
        }
    }

    /// Human-readable reason for cancellation, if cancelled
    pub fn cancellation_reason(&self) -> Option<&'static str> {
        if self.cancellation.is_cancelled() {
            Some("request canceled")
        } else if self.deadline_elapsed() {
            Some("deadline exceeded")
        } else {
            None
        }
    }
}
