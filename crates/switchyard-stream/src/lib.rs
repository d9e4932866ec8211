//! Publish/subscribe streaming hub for job and workflow progress.
//!
//! # Main types
//!
//! - [`StreamingHub`] — Channel table, sequencing, heartbeat-driven dead-peer reaping.
//! - [`StreamEvent`] — The sequenced wire event (`start`, `chunk`, `final`, `error`).
//! - [`Subscription`] — Receiving side handed to a transport after [`StreamingHub::attach`].

/// Wire event types.
pub mod event;
/// Channel table and heartbeat.
pub mod hub;

pub use event::{payload, EventKind, StreamEvent};
pub use hub::{
    validate_token, AttachError, HeartbeatReport, HubConfig, HubFrame, StreamingHub, Subscription,
};
