//! Core types shared by every Switchyard crate.
//!
//! # Main types
//!
//! - [`SwitchyardError`] — Unified error enum (the orchestration taxonomy plus ambient errors).
//! - [`SwitchyardResult`] — Convenience alias for `Result<T, SwitchyardError>`.
//! - [`CapabilityInvoker`] — The boundary through which all work is executed.
//! - [`ExecutionContext`] — Per-invocation context (session, grants, cancellation, chunk sink).
//! - [`AgentRegistry`] — Registry of [`Agent`]s; implements [`CapabilityInvoker`].

/// Error taxonomy.
pub mod error;
/// Capability-invocation interface and execution context.
pub mod invoke;
/// Agent trait and registry.
pub mod registry;

pub use error::{SwitchyardError, SwitchyardResult};
pub use invoke::{CapabilityInvoker, ChunkSink, ExecutionContext};
pub use registry::{Agent, AgentDescriptor, AgentRegistry, CapabilityDescriptor};
pub use tokio_util::sync::CancellationToken;
