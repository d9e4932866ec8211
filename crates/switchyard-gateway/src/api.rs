use crate::error::ApiResult;
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use switchyard_core::AgentDescriptor;
use switchyard_orchestrator::{
    CancelOutcome, HandoffRequest, JobRecord, SubmitReceipt, SubmitRequest, Workflow,
    WorkflowDefinition, WorkflowStatus, WorkflowSummary,
};
use tracing::{info, warn};
use uuid::Uuid;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "switchyard",
        "jobs": state.scheduler.stats(),
        "workflows": state.engine.list_workflows().len(),
        "channels": state.hub.channel_count(),
    }))
}

pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Vec<AgentDescriptor>> {
    Json(state.agents.clone())
}

// --- jobs ---

/// `POST /jobs`. An `Idempotency-Key` header is used when the body carries
/// no key. 202 for a new job, 200 when the key resolved to an existing one.
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut request): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitReceipt>)> {
    if request.idempotency_key.is_none() {
        request.idempotency_key = headers
            .get("idempotency-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }
    let receipt = state.scheduler.submit(request)?;
    let status = if receipt.deduplicated {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(receipt)))
}

pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobRecord>> {
    Json(state.scheduler.list_jobs())
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobRecord>> {
    Ok(Json(state.scheduler.get_status(id)?))
}

pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CancelOutcome>> {
    Ok(Json(state.scheduler.cancel(id)?))
}

pub async fn handoff_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<HandoffRequest>,
) -> ApiResult<(StatusCode, Json<SubmitReceipt>)> {
    let receipt = state.scheduler.handoff(id, request)?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

// --- workflows ---

pub async fn create_workflow(
    State(state): State<Arc<AppState>>,
    Json(definition): Json<WorkflowDefinition>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    let workflow = state.engine.create_custom(definition)?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn create_from_template(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(params): Json<Map<String, Value>>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    let workflow = state.engine.create_from_template(&name, params)?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn list_templates(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.engine.list_templates())
}

pub async fn list_workflows(State(state): State<Arc<AppState>>) -> Json<Vec<WorkflowSummary>> {
    Json(state.engine.list_workflows())
}

pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.engine.get_workflow(id)?))
}

pub async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.remove_workflow(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /workflows/{id}/execute`: runs in the background; progress is on
/// the workflow's stream channel.
pub async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    // The pending -> running transition happens here so that concurrent
    // callers race on the engine lock and only one gets 202.
    let cancel = state.engine.start(id)?;

    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        match engine.run(id, cancel).await {
            Ok(done) => {
                info!(workflow_id = %id, status = %done.status, "Background workflow finished")
            }
            Err(e) => warn!(workflow_id = %id, error = %e, "Background workflow did not run"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "workflowId": id,
            "status": WorkflowStatus::Running,
            "streamUrl": state.stream_url(&id.to_string()),
        })),
    ))
}

pub async fn cancel_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let cancelled = state.engine.cancel_workflow(id)?;
    let status = state.engine.get_workflow(id)?.status;
    Ok(Json(json!({ "cancelled": cancelled, "status": status })))
}
