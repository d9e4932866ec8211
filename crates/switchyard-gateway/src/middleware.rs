use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use switchyard_stream::validate_token;
use tracing::warn;

/// API-key configuration for the REST surface.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Accepted keys. Empty = no auth required.
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    pub fn new(api_keys: Vec<String>) -> Self {
        Self { api_keys }
    }

    /// Returns true if at least one key is configured.
    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    fn accepts(&self, presented: &str) -> bool {
        self.api_keys.iter().any(|k| validate_token(k, presented))
    }
}

#[derive(serde::Deserialize, Default)]
pub struct AuthQuery {
    pub api_key: Option<String>,
}

/// `Authorization: Bearer <token>`, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
}

/// Validates the API key from `Authorization: Bearer <key>`, falling back
/// to `?api_key=<key>`. Passes everything through when no keys are set.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthConfig>>,
    headers: HeaderMap,
    query: Query<AuthQuery>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.is_enabled() {
        return next.run(request).await;
    }

    let key = bearer_token(&headers).or_else(|| query.api_key.clone());
    let reason = match key {
        Some(k) if auth.accepts(&k) => return next.run(request).await,
        Some(_) => "invalid API key",
        None => "API key required",
    };

    warn!(path = %request.uri().path(), reason, "Rejected request");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthorized", "message": reason })),
    )
        .into_response()
}
