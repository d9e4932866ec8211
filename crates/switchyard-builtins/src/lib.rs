//! Built-in agents and workflow templates for Switchyard.
//!
//! These give a fresh server something to run: a streaming echo agent, a
//! handful of text transforms, and utility capabilities for exercising
//! timeouts, cancellation and failure paths.
//!
//! # Main entry points
//!
//! - [`register_builtins`] — Add every built-in agent to an [`AgentRegistry`].
//! - [`builtin_registry`] — A fresh registry holding only the built-ins.
//! - [`builtin_templates`] — Workflow templates that use the built-in agents.

/// Streaming chat echo.
pub mod echo;
/// Workflow templates built on the built-in agents.
pub mod templates;
/// Text transforms.
pub mod text;
/// Sleep and failure helpers.
pub mod util;

pub use echo::EchoAgent;
pub use templates::builtin_templates;
pub use text::TextAgent;
pub use util::UtilAgent;

use std::sync::Arc;
use switchyard_core::{AgentRegistry, SwitchyardError, SwitchyardResult};

/// Register all built-in agents into the given registry.
pub fn register_builtins(registry: &mut AgentRegistry) {
    registry.register(Arc::new(EchoAgent::new()));
    registry.register(Arc::new(TextAgent::new()));
    registry.register(Arc::new(UtilAgent::new()));
}

/// A registry pre-loaded with the built-in agents.
pub fn builtin_registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    register_builtins(&mut registry);
    registry
}

/// Pull a required string field out of a capability input. A bare string
/// input is accepted as the value itself.
pub(crate) fn required_str<'a>(
    input: &'a serde_json::Value,
    field: &str,
) -> SwitchyardResult<&'a str> {
    if let Some(s) = input.as_str() {
        return Ok(s);
    }
    input[field].as_str().ok_or_else(|| {
        SwitchyardError::ValidationFailure(format!("input field '{field}' must be a string"))
    })
}
