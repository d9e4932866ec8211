use crate::api;
use crate::middleware::{auth_middleware, AuthConfig};
use crate::stream::stream_handler;
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use switchyard_core::{AgentDescriptor, AgentRegistry};
use switchyard_orchestrator::{AdmissionScheduler, SchedulerConfig, WorkflowConfig, WorkflowEngine};
use switchyard_stream::{HubConfig, StreamingHub};
use tokio::task::JoinHandle;
use tracing::info;

/// Shared application state: one hub, one scheduler, one workflow engine,
/// all executing through the same agent registry.
pub struct AppState {
    pub hub: Arc<StreamingHub>,
    pub scheduler: Arc<AdmissionScheduler>,
    pub engine: Arc<WorkflowEngine>,
    /// Descriptors captured at startup for `GET /agents`.
    pub agents: Vec<AgentDescriptor>,
    stream_prefix: String,
}

impl AppState {
    /// Wire the components together around `registry`.
    pub fn new(
        registry: AgentRegistry,
        scheduler: SchedulerConfig,
        workflow: WorkflowConfig,
        stream: HubConfig,
    ) -> Arc<Self> {
        let agents = registry.list_descriptors().into_iter().cloned().collect();
        let stream_prefix = scheduler.stream_path_prefix.trim_end_matches('/').to_string();
        let invoker = Arc::new(registry);
        let hub = StreamingHub::new(stream);
        let scheduler = AdmissionScheduler::new(scheduler, invoker.clone(), Arc::clone(&hub));
        let engine = WorkflowEngine::new(workflow, invoker, Arc::clone(&hub));

        Arc::new(Self {
            hub,
            scheduler,
            engine,
            agents,
            stream_prefix,
        })
    }

    /// Client-facing path of a stream channel.
    pub fn stream_url(&self, channel_id: &str) -> String {
        format!("{}/{channel_id}", self.stream_prefix)
    }

    /// Start the heartbeat and the job and workflow TTL reaper loops.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        info!(
            heartbeat_secs = self.hub.config().heartbeat_interval_secs,
            reap_secs = self.scheduler.config().reap_interval_secs,
            "Starting background tasks"
        );
        let scheduler = self.scheduler.config();
        vec![
            self.hub.spawn_heartbeat(),
            self.scheduler.spawn_reaper(),
            self.engine.spawn_reaper(scheduler.reap_interval(), scheduler.job_ttl()),
        ]
    }
}

/// The main gateway server.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router without API-key auth.
    pub fn build(state: Arc<AppState>) -> Router {
        Self::build_with_auth(state, AuthConfig::default())
    }

    /// Build the router. When `auth` carries keys, every REST route except
    /// `/health` requires one; the stream endpoint has its own token.
    pub fn build_with_auth(state: Arc<AppState>, auth: AuthConfig) -> Router {
        let mut api = Router::new()
            .route("/jobs", post(api::submit_job).get(api::list_jobs))
            .route("/jobs/{id}", get(api::get_job))
            .route("/jobs/{id}/cancel", post(api::cancel_job))
            .route("/jobs/{id}/handoff", post(api::handoff_job))
            .route("/workflows", post(api::create_workflow).get(api::list_workflows))
            .route("/workflows/templates", get(api::list_templates))
            .route("/workflows/templates/{name}", post(api::create_from_template))
            .route(
                "/workflows/{id}",
                get(api::get_workflow).delete(api::delete_workflow),
            )
            .route("/workflows/{id}/execute", post(api::execute_workflow))
            .route("/workflows/{id}/cancel", post(api::cancel_workflow))
            .route("/agents", get(api::list_agents));

        if auth.is_enabled() {
            info!(keys = auth.api_keys.len(), "API key auth enabled");
            api = api.route_layer(axum_mw::from_fn_with_state(Arc::new(auth), auth_middleware));
        }

        let stream_route = format!("{}/{{channel_id}}", state.stream_prefix);
        Router::new()
            .route("/health", get(api::health))
            .route(&stream_route, get(stream_handler))
            .merge(api)
            .with_state(state)
    }
}
