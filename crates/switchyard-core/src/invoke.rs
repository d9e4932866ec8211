//! The capability-invocation boundary.
//!
//! Everything the scheduler and the workflow engine execute goes through
//! [`CapabilityInvoker::invoke`]. Implementations must be safe to call
//! concurrently up to the configured concurrency ceiling.

use crate::SwitchyardResult;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Sending half for incremental output produced while a capability runs.
///
/// Every value pushed here becomes a `chunk` event on the caller's stream
/// channel, in emission order.
#[derive(Debug, Clone)]
pub struct ChunkSink {
    tx: mpsc::UnboundedSender<Value>,
}

impl ChunkSink {
    /// Create a sink together with the receiver the caller drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit one chunk. Returns `false` once the receiving side is gone.
    pub fn emit(&self, chunk: Value) -> bool {
        self.tx.send(chunk).is_ok()
    }
}

/// Per-invocation context handed to the capability implementation.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Identifier of the job or workflow step being executed.
    pub invocation_id: String,
    /// Session the invocation belongs to, if any.
    pub session_id: Option<String>,
    /// Opaque permission / resource-limit data owned by the caller's
    /// authorization layer. Passed through untouched.
    pub grants: Map<String, Value>,
    /// Tripped when the owning job or workflow is canceled. Cooperative:
    /// implementations check it between units of work.
    pub cancellation: CancellationToken,
    /// Where streamed chunks go. `None` when nobody listens.
    pub chunks: Option<ChunkSink>,
}

impl ExecutionContext {
    /// Context for a bare invocation with a fresh cancellation token.
    pub fn new(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            ..Self::default()
        }
    }

    /// Attach a session identifier.
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Use the given cancellation token instead of a fresh one.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Route streamed chunks into `sink`.
    pub fn with_chunks(mut self, sink: ChunkSink) -> Self {
        self.chunks = Some(sink);
        self
    }

    /// Attach authorization data.
    pub fn with_grants(mut self, grants: Map<String, Value>) -> Self {
        self.grants = grants;
        self
    }

    /// Whether the owning job or workflow has been canceled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Emit a chunk if a sink is attached. No-op otherwise.
    pub fn emit_chunk(&self, chunk: Value) {
        if let Some(sink) = &self.chunks {
            sink.emit(chunk);
        }
    }
}

/// Consumed interface: run capability `capability` of agent `agent_id`.
#[async_trait]
pub trait CapabilityInvoker: Send + Sync {
    /// Check that `agent_id` exists and exposes `capability`.
    ///
    /// Returns [`SwitchyardError::NotFound`](crate::SwitchyardError::NotFound)
    /// naming whichever of the two is unknown.
    fn resolve(&self, agent_id: &str, capability: &str) -> SwitchyardResult<()>;

    /// Execute the capability. A failed execution is reported as
    /// [`SwitchyardError::ExecutionFailure`](crate::SwitchyardError::ExecutionFailure).
    async fn invoke(
        &self,
        agent_id: &str,
        capability: &str,
        input: Value,
        ctx: ExecutionContext,
    ) -> SwitchyardResult<Value>;
}
