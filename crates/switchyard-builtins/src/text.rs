use crate::required_str;
use async_trait::async_trait;
use serde_json::{json, Value};
use switchyard_core::{
    Agent, AgentDescriptor, CapabilityDescriptor, ExecutionContext, SwitchyardError,
    SwitchyardResult,
};

/// Deterministic text transforms. All capabilities take `{"text": "..."}`
/// (or a bare string).
pub struct TextAgent {
    descriptor: AgentDescriptor,
}

impl TextAgent {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor {
                id: "text".to_string(),
                description: "Simple text transforms".to_string(),
                capabilities: vec![
                    CapabilityDescriptor::new("upper", "Uppercase the text"),
                    CapabilityDescriptor::new("reverse", "Reverse the text by characters"),
                    CapabilityDescriptor::new(
                        "word_count",
                        "Count words and characters in the text",
                    ),
                ],
            },
        }
    }
}

impl Default for TextAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for TextAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        capability: &str,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> SwitchyardResult<Value> {
        let text = required_str(&input, "text")?;
        match capability {
            "upper" => Ok(json!({ "text": text.to_uppercase() })),
            "reverse" => Ok(json!({ "text": text.chars().rev().collect::<String>() })),
            "word_count" => Ok(json!({
                "words": text.split_whitespace().count(),
                "chars": text.chars().count(),
            })),
            other => Err(SwitchyardError::NotFound(format!(
                "text has no capability '{other}'"
            ))),
        }
    }
}
