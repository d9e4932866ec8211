//! Job admission and workflow execution for Switchyard.
//!
//! Both components execute work through a
//! [`CapabilityInvoker`](switchyard_core::CapabilityInvoker) and publish
//! progress on a [`StreamingHub`](switchyard_stream::StreamingHub) channel
//! keyed by the job or workflow id.
//!
//! # Main types
//!
//! - [`AdmissionScheduler`] — Idempotent, backpressured job scheduler with a TTL reaper.
//! - [`WorkflowEngine`] — Runs dependency graphs of steps with predicates and retries.
//! - [`JobRecord`] — A job and its lifecycle state.
//! - [`Workflow`] — A materialized workflow and its steps.

/// Scheduler and workflow configuration.
pub mod config;
/// Idempotency key table.
pub mod idempotency;
/// Admission scheduler.
pub mod scheduler;
/// Job types shared with the gateway.
pub mod types;
/// Workflow engine, templates and expression language.
pub mod workflow;

pub use config::{SchedulerConfig, WorkflowConfig};
pub use idempotency::IdempotencyTable;
pub use scheduler::AdmissionScheduler;
pub use types::{
    CancelOutcome, HandoffRequest, JobRecord, JobStatus, ReapReport, SchedulerStats,
    SubmitReceipt, SubmitRequest,
};
pub use workflow::{
    validate_definition, RetryPolicy, Step, StepConditions, StepDefinition, StepStatus,
    TemplateRegistry, Workflow, WorkflowDefinition, WorkflowEngine, WorkflowStatus,
    WorkflowSummary,
};
