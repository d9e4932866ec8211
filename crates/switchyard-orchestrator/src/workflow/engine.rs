use super::graph::validate_definition;
use super::model::{
    Step, StepStatus, Workflow, WorkflowDefinition, WorkflowStatus, WorkflowSummary,
};
use super::predicate;
use super::template;
use super::templates::TemplateRegistry;
use crate::config::WorkflowConfig;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{
    CancellationToken, CapabilityInvoker, ExecutionContext, SwitchyardError, SwitchyardResult,
};
use switchyard_stream::{payload, EventKind, StreamingHub};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct WorkflowEntry {
    workflow: Workflow,
    cancel: CancellationToken,
}

/// A step leaving the planner, with its input already expanded.
struct StepLaunch {
    step_id: Uuid,
    name: String,
    agent_id: String,
    capability_name: String,
    input: Value,
    timeout: Option<Duration>,
}

struct CyclePlan {
    launches: Vec<StepLaunch>,
    next_retry: Option<Instant>,
}

/// Dependency-aware workflow engine.
///
/// Workflow state lives behind one mutex and is only touched in short
/// planning/recording turns; step invocations run on a `JoinSet` outside the
/// lock. `execute` sleeps until a step finishes, a backoff timer fires or the
/// workflow is cancelled.
pub struct WorkflowEngine {
    config: WorkflowConfig,
    invoker: Arc<dyn CapabilityInvoker>,
    hub: Arc<StreamingHub>,
    workflows: Mutex<HashMap<Uuid, WorkflowEntry>>,
    templates: RwLock<TemplateRegistry>,
}

impl WorkflowEngine {
    pub fn new(
        config: WorkflowConfig,
        invoker: Arc<dyn CapabilityInvoker>,
        hub: Arc<StreamingHub>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            invoker,
            hub,
            workflows: Mutex::new(HashMap::new()),
            templates: RwLock::new(TemplateRegistry::new()),
        })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    // --- templates ---

    pub fn register_template(&self, definition: WorkflowDefinition) -> SwitchyardResult<()> {
        self.templates.write().register(definition)
    }

    pub fn load_templates(&self, dir: &Path) -> SwitchyardResult<usize> {
        self.templates.write().load_dir(dir)
    }

    pub fn list_templates(&self) -> Vec<String> {
        self.templates.read().names()
    }

    pub fn template(&self, name: &str) -> Option<WorkflowDefinition> {
        self.templates.read().get(name).cloned()
    }

    // --- creation ---

    /// Materialize an ad-hoc definition.
    pub fn create_custom(&self, definition: WorkflowDefinition) -> SwitchyardResult<Workflow> {
        let context = definition.context.clone();
        self.materialize(&definition, context)
    }

    /// Materialize a named template. `params` override the template's
    /// default context key by key.
    pub fn create_from_template(
        &self,
        name: &str,
        params: Map<String, Value>,
    ) -> SwitchyardResult<Workflow> {
        let definition = self.template(name).ok_or_else(|| {
            SwitchyardError::NotFound(format!("Unknown workflow template: {name}"))
        })?;
        let mut context = definition.context.clone();
        context.extend(params);
        self.materialize(&definition, context)
    }

    fn materialize(
        &self,
        definition: &WorkflowDefinition,
        context: Map<String, Value>,
    ) -> SwitchyardResult<Workflow> {
        validate_definition(definition)?;
        let workflow = Workflow::from_definition(definition, context);
        info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            steps = workflow.steps.len(),
            "Workflow created"
        );
        self.workflows.lock().insert(
            workflow.id,
            WorkflowEntry {
                workflow: workflow.clone(),
                cancel: CancellationToken::new(),
            },
        );
        Ok(workflow)
    }

    // --- queries ---

    pub fn get_workflow(&self, id: Uuid) -> SwitchyardResult<Workflow> {
        self.workflows
            .lock()
            .get(&id)
            .map(|e| e.workflow.clone())
            .ok_or_else(|| not_found(id))
    }

    /// Summaries of every known workflow, oldest first.
    pub fn list_workflows(&self) -> Vec<WorkflowSummary> {
        let workflows = self.workflows.lock();
        let mut rows: Vec<WorkflowSummary> = workflows
            .values()
            .map(|e| WorkflowSummary::from(&e.workflow))
            .collect();
        rows.sort_by_key(|r| r.created_at);
        rows
    }

    /// Forget a workflow that is not running.
    pub fn remove_workflow(&self, id: Uuid) -> SwitchyardResult<Workflow> {
        let mut workflows = self.workflows.lock();
        let status = workflows
            .get(&id)
            .map(|e| e.workflow.status)
            .ok_or_else(|| not_found(id))?;
        if status == WorkflowStatus::Running {
            return Err(SwitchyardError::ValidationFailure(format!(
                "workflow {id} is running"
            )));
        }
        workflows
            .remove(&id)
            .map(|e| e.workflow)
            .ok_or_else(|| not_found(id))
    }

    /// Drop finished workflows whose `completed_at` is older than `ttl`.
    pub fn reap_workflows_at(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> usize {
        let mut workflows = self.workflows.lock();
        let before = workflows.len();
        workflows.retain(|_, e| {
            let wf = &e.workflow;
            match wf.completed_at {
                Some(done) if wf.status.is_terminal() => now - done < ttl,
                _ => true,
            }
        });
        let removed = before - workflows.len();
        if removed > 0 {
            debug!(removed, "Reaped finished workflows");
        }
        removed
    }

    /// Spawn a periodic sweep of finished workflows older than `ttl`.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        period: Duration,
        ttl: chrono::Duration,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.reap_workflows_at(Utc::now(), ttl);
            }
        })
    }

    // --- control ---

    /// Cancel a pending or running workflow. Steps already executing are
    /// not interrupted; their cancellation token is tripped. Returns
    /// `false` when the workflow had already finished.
    pub fn cancel_workflow(&self, id: Uuid) -> SwitchyardResult<bool> {
        let mut workflows = self.workflows.lock();
        let entry = workflows.get_mut(&id).ok_or_else(|| not_found(id))?;
        if entry.workflow.status.is_terminal() {
            return Ok(false);
        }
        entry.workflow.status = WorkflowStatus::Cancelled;
        entry.workflow.completed_at = Some(Utc::now());
        entry.cancel.cancel();

        info!(workflow_id = %id, "Workflow cancelled");
        self.hub.broadcast(
            &id.to_string(),
            EventKind::Error,
            payload(json!({ "error": "cancelled", "kind": "cancelled" })),
        );
        Ok(true)
    }

    /// Run a pending workflow to completion and return its final record.
    pub async fn execute(&self, id: Uuid) -> SwitchyardResult<Workflow> {
        let cancel = self.start(id)?;
        self.run(id, cancel).await
    }

    /// Drive a workflow that `start` has moved to running.
    pub async fn run(&self, id: Uuid, cancel: CancellationToken) -> SwitchyardResult<Workflow> {
        let mut in_flight: JoinSet<(Uuid, SwitchyardResult<Value>)> = JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let plan = self.plan_cycle(id, in_flight.len())?;
            for launch in plan.launches {
                self.spawn_step(&mut in_flight, id, launch, cancel.child_token());
            }

            if in_flight.is_empty() && plan.next_retry.is_none() {
                // Nothing running and nothing armed: either everything is
                // terminal or the remaining steps can never become ready.
                break;
            }

            tokio::select! {
                joined = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.settle(id, joined, false);
                }
                () = sleep_until(plan.next_retry) => {}
                () = cancel.cancelled() => break,
            }
        }

        // Cancelled: let in-flight steps finish so their outcome is recorded.
        while let Some(joined) = in_flight.join_next().await {
            self.settle(id, Some(joined), true);
        }

        self.finish(id)
    }

    /// Move a pending workflow to running and announce it. Exactly one
    /// caller wins; every other caller gets a validation failure.
    pub fn start(&self, id: Uuid) -> SwitchyardResult<CancellationToken> {
        let mut workflows = self.workflows.lock();
        let entry = workflows.get_mut(&id).ok_or_else(|| not_found(id))?;
        let wf = &mut entry.workflow;
        if wf.status != WorkflowStatus::Pending {
            return Err(SwitchyardError::ValidationFailure(format!(
                "workflow {id} is {}; only pending workflows can execute",
                wf.status
            )));
        }
        wf.status = WorkflowStatus::Running;
        wf.started_at = Some(Utc::now());

        info!(workflow_id = %id, name = %wf.name, "Workflow started");
        self.hub.broadcast(
            &id.to_string(),
            EventKind::Start,
            payload(json!({ "name": wf.name, "steps": wf.steps.len() })),
        );
        Ok(entry.cancel.clone())
    }

    /// One planning turn: apply predicate gates to ready steps and pick
    /// which to launch within the step concurrency ceiling.
    fn plan_cycle(&self, id: Uuid, in_flight: usize) -> SwitchyardResult<CyclePlan> {
        let mut workflows = self.workflows.lock();
        let entry = workflows.get_mut(&id).ok_or_else(|| not_found(id))?;
        let wf = &mut entry.workflow;
        let channel = id.to_string();
        let now = Instant::now();
        let snapshot = wf.context.clone();
        let mut capacity = self.config.max_step_concurrency.saturating_sub(in_flight);
        let mut launches = Vec::new();

        let ready: Vec<usize> = (0..wf.steps.len())
            .filter(|&i| wf.steps[i].is_ready(&wf.steps, now))
            .collect();

        for i in ready {
            let step = &mut wf.steps[i];

            if let Some(expr) = step.conditions.skip_if.as_deref() {
                match predicate::evaluate(expr, &snapshot) {
                    Ok(true) => {
                        step.status = StepStatus::Skipped;
                        step.completed_at = Some(Utc::now());
                        info!(workflow_id = %id, step = %step.name, "Step skipped by skipIf");
                        self.step_event(
                            &channel,
                            "step_skipped",
                            step,
                            json!({ "reason": "skipIf" }),
                        );
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(
                            workflow_id = %id,
                            step = %step.name,
                            error = %e,
                            "skipIf failed; holding step"
                        );
                        continue;
                    }
                }
            }

            if let Some(expr) = step.conditions.run_if.as_deref() {
                match predicate::evaluate(expr, &snapshot) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(
                            workflow_id = %id,
                            step = %step.name,
                            "runIf false; holding step"
                        );
                        continue;
                    }
                    Err(e) => {
                        warn!(
                            workflow_id = %id,
                            step = %step.name,
                            error = %e,
                            "runIf failed; holding step"
                        );
                        continue;
                    }
                }
            }

            if capacity == 0 {
                continue;
            }
            capacity -= 1;

            step.status = StepStatus::Running;
            step.attempts += 1;
            step.retry_at = None;
            step.started_at = Some(Utc::now());
            let input = template::expand(&step.input, &snapshot);
            let timeout = step
                .timeout_ms
                .or(self.config.default_step_timeout_ms)
                .map(Duration::from_millis);

            debug!(
                workflow_id = %id,
                step = %step.name,
                attempt = step.attempts,
                "Step started"
            );
            self.step_event(&channel, "step_started", step, Value::Null);
            launches.push(StepLaunch {
                step_id: step.id,
                name: step.name.clone(),
                agent_id: step.agent_id.clone(),
                capability_name: step.capability_name.clone(),
                input,
                timeout,
            });
        }

        let next_retry = wf
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .filter_map(|s| s.retry_at)
            .min();

        Ok(CyclePlan {
            launches,
            next_retry,
        })
    }

    fn spawn_step(
        &self,
        set: &mut JoinSet<(Uuid, SwitchyardResult<Value>)>,
        workflow_id: Uuid,
        launch: StepLaunch,
        token: CancellationToken,
    ) {
        let invoker = Arc::clone(&self.invoker);
        set.spawn(async move {
            let ctx = ExecutionContext::new(format!("{workflow_id}/{}", launch.name))
                .with_cancellation(token);
            let call = AssertUnwindSafe(invoker.invoke(
                &launch.agent_id,
                &launch.capability_name,
                launch.input,
                ctx,
            ))
            .catch_unwind();

            let outcome = match launch.timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(done) => done,
                    Err(_) => Ok(Err(SwitchyardError::Timeout(format!(
                        "step '{}' exceeded {}ms",
                        launch.name,
                        limit.as_millis()
                    )))),
                },
                None => call.await,
            };
            let outcome = outcome.unwrap_or_else(|_| {
                Err(SwitchyardError::ExecutionFailure(format!(
                    "step '{}' panicked",
                    launch.name
                )))
            });
            (launch.step_id, outcome)
        });
    }

    fn settle(
        &self,
        id: Uuid,
        joined: Option<Result<(Uuid, SwitchyardResult<Value>), tokio::task::JoinError>>,
        cancelled: bool,
    ) {
        match joined {
            Some(Ok((step_id, outcome))) => {
                self.record_outcome(id, step_id, outcome, cancelled)
            }
            Some(Err(e)) => warn!(workflow_id = %id, error = %e, "Step task aborted"),
            None => {}
        }
    }

    /// Apply a step outcome: merge the result into the context, schedule a
    /// retry with linear backoff, or fail the step.
    fn record_outcome(
        &self,
        id: Uuid,
        step_id: Uuid,
        outcome: SwitchyardResult<Value>,
        cancelled: bool,
    ) {
        let mut workflows = self.workflows.lock();
        let Some(entry) = workflows.get_mut(&id) else {
            return;
        };
        let wf = &mut entry.workflow;
        let channel = id.to_string();
        let Some(step) = wf.steps.iter_mut().find(|s| s.id == step_id) else {
            return;
        };

        match outcome {
            Ok(value) => {
                step.status = StepStatus::Completed;
                step.error = None;
                step.completed_at = Some(Utc::now());
                step.result = Some(value.clone());
                let key = format!("{}{}", step.name, self.config.result_key_suffix);
                info!(workflow_id = %id, step = %step.name, "Step completed");
                self.step_event(&channel, "step_completed", step, Value::Null);
                wf.context.insert(key, value);
            }
            Err(e) if !cancelled && step.attempts < step.retries.max_attempts => {
                let delay = step.retries.backoff(step.attempts);
                step.status = StepStatus::Pending;
                step.error = Some(e.to_string());
                step.retry_at = Some(Instant::now() + delay);
                info!(
                    workflow_id = %id,
                    step = %step.name,
                    attempt = step.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Step failed; retrying"
                );
                self.step_event(
                    &channel,
                    "step_retrying",
                    step,
                    json!({ "error": e.to_string(), "delayMs": delay.as_millis() as u64 }),
                );
            }
            Err(e) => {
                step.status = StepStatus::Failed;
                step.error = Some(e.to_string());
                step.completed_at = Some(Utc::now());
                warn!(
                    workflow_id = %id,
                    step = %step.name,
                    attempts = step.attempts,
                    error = %e,
                    "Step failed"
                );
                self.step_event(
                    &channel,
                    "step_failed",
                    step,
                    json!({ "error": e.to_string(), "kind": e.kind() }),
                );
            }
        }
    }

    /// Resolve leftover steps and settle the workflow status.
    fn finish(&self, id: Uuid) -> SwitchyardResult<Workflow> {
        let mut workflows = self.workflows.lock();
        let entry = workflows.get_mut(&id).ok_or_else(|| not_found(id))?;
        let wf = &mut entry.workflow;
        let channel = id.to_string();
        let cancelled = wf.status == WorkflowStatus::Cancelled;

        for step in &mut wf.steps {
            let reason = match step.status {
                StepStatus::Pending if cancelled => "workflow cancelled",
                StepStatus::Pending => {
                    "unreachable: a dependency did not complete or a condition held"
                }
                StepStatus::Running => {
                    step.status = StepStatus::Failed;
                    step.error = Some("step task lost".to_string());
                    step.completed_at = Some(Utc::now());
                    continue;
                }
                _ => continue,
            };
            step.status = StepStatus::Skipped;
            step.retry_at = None;
            step.error = Some(reason.to_string());
            step.completed_at = Some(Utc::now());
            debug!(workflow_id = %id, step = %step.name, reason, "Step skipped");
            self.step_event(&channel, "step_skipped", step, json!({ "reason": reason }));
        }

        let failed: Vec<String> = wf
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .map(|s| s.name.clone())
            .collect();

        if !cancelled {
            wf.status = if failed.is_empty() {
                WorkflowStatus::Completed
            } else {
                WorkflowStatus::Failed
            };
            wf.completed_at = Some(Utc::now());

            if failed.is_empty() {
                info!(workflow_id = %id, "Workflow completed");
                self.hub.broadcast(
                    &channel,
                    EventKind::Final,
                    payload(json!({ "status": wf.status, "context": wf.context })),
                );
            } else {
                warn!(workflow_id = %id, failed = ?failed, "Workflow failed");
                self.hub.broadcast(
                    &channel,
                    EventKind::Error,
                    payload(json!({
                        "error": "step failed",
                        "kind": "execution_failure",
                        "failedSteps": failed,
                    })),
                );
            }
        }

        Ok(wf.clone())
    }

    fn step_event(&self, channel: &str, event: &str, step: &Step, extra: Value) {
        let mut data = payload(json!({
            "event": event,
            "step": step.name,
            "stepId": step.id,
            "status": step.status,
            "attempt": step.attempts,
        }));
        if let Value::Object(more) = extra {
            data.extend(more);
        }
        self.hub.broadcast(channel, EventKind::Chunk, data);
    }
}

fn not_found(id: Uuid) -> SwitchyardError {
    SwitchyardError::NotFound(format!("Unknown workflow: {id}"))
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
