use crate::invoke::{CapabilityInvoker, ExecutionContext};
use crate::{SwitchyardError, SwitchyardResult};
use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info};

/// One named operation an agent can perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Metadata describing an agent and the capabilities it advertises.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub capabilities: Vec<CapabilityDescriptor>,
}

impl AgentDescriptor {
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.name == name)
    }
}

/// Trait that all agents implement.
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    async fn invoke(
        &self,
        capability: &str,
        input: Value,
        ctx: &ExecutionContext,
    ) -> SwitchyardResult<Value>;
}

/// Central registry for all available agents.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        let id = agent.descriptor().id.clone();
        info!(
            agent = %id,
            capabilities = agent.descriptor().capabilities.len(),
            "Registered agent"
        );
        self.agents.insert(id, agent);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Agent>> {
        self.agents.get(id)
    }

    /// Descriptors sorted by agent id.
    pub fn list_descriptors(&self) -> Vec<&AgentDescriptor> {
        let mut descriptors: Vec<&AgentDescriptor> =
            self.agents.values().map(|a| a.descriptor()).collect();
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        descriptors
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    fn lookup(&self, agent_id: &str, capability: &str) -> SwitchyardResult<&Arc<dyn Agent>> {
        let agent = self
            .agents
            .get(agent_id)
            .ok_or_else(|| SwitchyardError::NotFound(format!("Unknown agent: {agent_id}")))?;
        if !agent.descriptor().has_capability(capability) {
            return Err(SwitchyardError::NotFound(format!(
                "Agent '{agent_id}' has no capability '{capability}'"
            )));
        }
        Ok(agent)
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityInvoker for AgentRegistry {
    fn resolve(&self, agent_id: &str, capability: &str) -> SwitchyardResult<()> {
        self.lookup(agent_id, capability).map(|_| ())
    }

    async fn invoke(
        &self,
        agent_id: &str,
        capability: &str,
        input: Value,
        ctx: ExecutionContext,
    ) -> SwitchyardResult<Value> {
        let agent = self.lookup(agent_id, capability)?;

        // A panicking agent must not take the caller's task down with it.
        let outcome = AssertUnwindSafe(agent.invoke(capability, input, &ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(SwitchyardError::Timeout(msg))) => Err(SwitchyardError::Timeout(msg)),
            Ok(Err(SwitchyardError::ExecutionFailure(msg))) => {
                Err(SwitchyardError::ExecutionFailure(msg))
            }
            Ok(Err(other)) => Err(SwitchyardError::ExecutionFailure(other.to_string())),
            Err(_) => {
                error!(
                    agent = %agent_id,
                    capability = %capability,
                    invocation = %ctx.invocation_id,
                    "Agent panicked during invocation"
                );
                Err(SwitchyardError::ExecutionFailure(format!(
                    "agent '{agent_id}' panicked while running '{capability}'"
                )))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Doubler {
        descriptor: AgentDescriptor,
    }

    impl Doubler {
        fn new() -> Self {
            Self {
                descriptor: AgentDescriptor {
                    id: "math".into(),
                    description: "arithmetic".into(),
                    capabilities: vec![
                        CapabilityDescriptor::new("double", "x * 2"),
                        CapabilityDescriptor::new("explode", "panics"),
                        CapabilityDescriptor::new("reject", "always fails"),
                    ],
                },
            }
        }
    }

    #[async_trait]
    impl Agent for Doubler {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.descriptor
        }

        async fn invoke(
            &self,
            capability: &str,
            input: Value,
            _ctx: &ExecutionContext,
        ) -> SwitchyardResult<Value> {
            match capability {
                "double" => Ok(json!(input["x"].as_i64().unwrap_or(0) * 2)),
                "reject" => Err(SwitchyardError::ValidationFailure("bad x".into())),
                _ => panic!("boom"),
            }
        }
    }

    fn registry() -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(Doubler::new()));
        registry
    }

    #[test]
    fn test_resolve_known_and_unknown() {
        let registry = registry();
        assert!(registry.resolve("math", "double").is_ok());
        assert!(matches!(
            registry.resolve("nope", "double"),
            Err(SwitchyardError::NotFound(_))
        ));
        let err = registry.resolve("math", "triple").unwrap_err();
        assert!(err.to_string().contains("triple"));
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let registry = registry();
        let out = registry
            .invoke("math", "double", json!({"x": 21}), ExecutionContext::new("t"))
            .await
            .unwrap();
        assert_eq!(out, json!(42));
    }

    #[tokio::test]
    async fn test_agent_error_becomes_execution_failure() {
        let registry = registry();
        let err = registry
            .invoke("math", "reject", json!({}), ExecutionContext::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchyardError::ExecutionFailure(_)));
        assert!(err.to_string().contains("bad x"));
    }

    #[tokio::test]
    async fn test_panic_becomes_execution_failure() {
        let registry = registry();
        let err = registry
            .invoke("math", "explode", json!({}), ExecutionContext::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchyardError::ExecutionFailure(_)));
    }

    #[test]
    fn test_list_descriptors_sorted() {
        let registry = registry();
        let ids: Vec<&str> = registry.list_descriptors().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["math"]);
        assert_eq!(registry.agent_count(), 1);
    }
}
