use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use switchyard_core::{
    Agent, AgentDescriptor, CapabilityDescriptor, ExecutionContext, SwitchyardError,
    SwitchyardResult,
};
use tracing::debug;

/// Capabilities for exercising the runtime itself.
///
/// - `sleep`: `{"ms": n}`: waits, returning early with `cancelled: true`
///   when the owning job or workflow is canceled.
/// - `fail`: `{"message": "..."}`: always fails with an execution failure.
pub struct UtilAgent {
    descriptor: AgentDescriptor,
}

impl UtilAgent {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor {
                id: "util".to_string(),
                description: "Sleep and failure helpers".to_string(),
                capabilities: vec![
                    CapabilityDescriptor::new("sleep", "Wait for `ms` milliseconds"),
                    CapabilityDescriptor::new("fail", "Fail with the given message"),
                ],
            },
        }
    }
}

impl Default for UtilAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for UtilAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        capability: &str,
        input: Value,
        ctx: &ExecutionContext,
    ) -> SwitchyardResult<Value> {
        match capability {
            "sleep" => {
                let ms = input["ms"].as_u64().unwrap_or(0);
                let started = tokio::time::Instant::now();
                let cancelled = tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => false,
                    _ = ctx.cancellation.cancelled() => true,
                };
                let slept = started.elapsed().as_millis() as u64;
                debug!(invocation = %ctx.invocation_id, slept, cancelled, "sleep finished");
                Ok(json!({ "slept": slept, "cancelled": cancelled }))
            }
            "fail" => {
                let message = input["message"].as_str().unwrap_or("requested failure");
                Err(SwitchyardError::ExecutionFailure(message.to_string()))
            }
            other => Err(SwitchyardError::NotFound(format!(
                "util has no capability '{other}'"
            ))),
        }
    }
}
