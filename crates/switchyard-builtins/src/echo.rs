use crate::required_str;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use switchyard_core::{
    Agent, AgentDescriptor, CapabilityDescriptor, ExecutionContext, SwitchyardError,
    SwitchyardResult,
};
use tracing::debug;

/// Echoes a message back, streaming it one word at a time.
///
/// Input: `{"message": "...", "delayMs": 0}` (or a bare string). Every word
/// is emitted as a `{"delta": "<word>"}` chunk before the final
/// `{"reply": "...", "words": n}` result. A cancelled invocation stops
/// streaming and returns what it has so far.
pub struct EchoAgent {
    descriptor: AgentDescriptor,
}

impl EchoAgent {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor {
                id: "echo".to_string(),
                description: "Echoes messages back as a word-by-word stream".to_string(),
                capabilities: vec![CapabilityDescriptor::new(
                    "chat",
                    "Reply with the input message, streaming one chunk per word",
                )],
            },
        }
    }
}

impl Default for EchoAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        capability: &str,
        input: Value,
        ctx: &ExecutionContext,
    ) -> SwitchyardResult<Value> {
        if capability != "chat" {
            return Err(SwitchyardError::NotFound(format!(
                "echo has no capability '{capability}'"
            )));
        }

        let message = required_str(&input, "message")?;
        let delay = Duration::from_millis(input["delayMs"].as_u64().unwrap_or(0));

        let mut sent = Vec::new();
        for word in message.split_whitespace() {
            if ctx.is_cancelled() {
                debug!(invocation = %ctx.invocation_id, "echo cancelled mid-stream");
                break;
            }
            ctx.emit_chunk(json!({ "delta": word }));
            sent.push(word);
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancellation.cancelled() => {}
                }
            }
        }

        Ok(json!({
            "reply": sent.join(" "),
            "words": sent.len(),
            "sessionId": ctx.session_id,
        }))
    }
}
