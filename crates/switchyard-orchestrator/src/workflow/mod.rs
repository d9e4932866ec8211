//! Dependency-aware multi-step workflows.

/// Workflow execution.
pub mod engine;
/// Definition validation (names, dependencies, cycles, predicates).
pub mod graph;
/// Workflow and step records.
pub mod model;
/// `runIf` / `skipIf` expression language.
pub mod predicate;
/// `{{placeholder}}` expansion.
pub mod template;
/// Named workflow templates.
pub mod templates;

pub use engine::WorkflowEngine;
pub use graph::validate_definition;
pub use model::{
    RetryPolicy, Step, StepConditions, StepDefinition, StepStatus, Workflow, WorkflowDefinition,
    WorkflowStatus, WorkflowSummary,
};
pub use templates::TemplateRegistry;
