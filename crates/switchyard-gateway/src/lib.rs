//! HTTP and WebSocket surfaces for Switchyard.
//!
//! # Main types
//!
//! - [`GatewayServer`] — Builds the axum router (REST API plus stream endpoint).
//! - [`AppState`] — Hub, scheduler and workflow engine shared by all handlers.
//! - [`AuthConfig`] — API keys guarding the REST routes.
//! - [`ApiError`] — Error-to-HTTP mapping.

/// REST handlers.
pub mod api;
/// Error-to-response mapping.
pub mod error;
/// API-key middleware.
pub mod middleware;
/// Router construction and shared state.
pub mod server;
/// WebSocket stream endpoint.
pub mod stream;

pub use error::{ApiError, ApiResult};
pub use middleware::AuthConfig;
pub use server::{AppState, GatewayServer};
