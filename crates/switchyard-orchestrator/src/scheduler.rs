use crate::config::SchedulerConfig;
use crate::idempotency::IdempotencyTable;
use crate::types::{
    CancelOutcome, HandoffRequest, JobRecord, JobStatus, ReapReport, SchedulerStats,
    SubmitReceipt, SubmitRequest,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{
    CancellationToken, CapabilityInvoker, ChunkSink, ExecutionContext, SwitchyardError,
    SwitchyardResult,
};
use switchyard_stream::{payload, EventKind, StreamingHub};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long a finished job waits for its chunk forwarder to drain.
const CHUNK_DRAIN_GRACE: Duration = Duration::from_secs(1);

struct SchedulerState {
    jobs: HashMap<Uuid, JobRecord>,
    idempotency: IdempotencyTable,
    queue: VecDeque<Uuid>,
    running: usize,
    peak_running: usize,
    tokens: HashMap<Uuid, CancellationToken>,
}

/// Everything a spawned job needs once it leaves the queue.
struct Launch {
    job_id: Uuid,
    agent_id: String,
    capability_name: String,
    input: Value,
    session_id: Option<String>,
    token: CancellationToken,
}

/// Admission-controlled, idempotent job scheduler.
///
/// All table mutation happens inside short critical sections on one mutex;
/// capability execution runs on spawned tasks outside it. Progress is
/// published on the hub channel named after the job id.
pub struct AdmissionScheduler {
    config: SchedulerConfig,
    invoker: Arc<dyn CapabilityInvoker>,
    hub: Arc<StreamingHub>,
    state: Mutex<SchedulerState>,
}

impl AdmissionScheduler {
    pub fn new(
        config: SchedulerConfig,
        invoker: Arc<dyn CapabilityInvoker>,
        hub: Arc<StreamingHub>,
    ) -> Arc<Self> {
        let idempotency = IdempotencyTable::new(config.idempotency_ttl());
        Arc::new(Self {
            config,
            invoker,
            hub,
            state: Mutex::new(SchedulerState {
                jobs: HashMap::new(),
                idempotency,
                queue: VecDeque::new(),
                running: 0,
                peak_running: 0,
                tokens: HashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Admit a job.
    ///
    /// Must be called from within a Tokio runtime: admitted jobs are started
    /// on spawned tasks immediately when capacity allows.
    pub fn submit(self: &Arc<Self>, request: SubmitRequest) -> SwitchyardResult<SubmitReceipt> {
        self.admit(request, None)
    }

    /// Submit a follow-up job on behalf of `parent_id`, inheriting its session.
    pub fn handoff(
        self: &Arc<Self>,
        parent_id: Uuid,
        handoff: HandoffRequest,
    ) -> SwitchyardResult<SubmitReceipt> {
        let session_id = {
            let state = self.state.lock();
            let parent = state
                .jobs
                .get(&parent_id)
                .ok_or_else(|| SwitchyardError::NotFound(format!("Unknown job: {parent_id}")))?;
            parent.session_id.clone()
        };

        info!(
            parent = %parent_id,
            to_agent = %handoff.to_agent_id,
            capability = %handoff.capability_name,
            "Handoff"
        );

        let request = SubmitRequest {
            agent_id: handoff.to_agent_id,
            capability_name: handoff.capability_name,
            input: handoff.payload,
            idempotency_key: None,
            session_id,
        };
        self.admit(request, Some(parent_id))
    }

    fn admit(
        self: &Arc<Self>,
        request: SubmitRequest,
        parent: Option<Uuid>,
    ) -> SwitchyardResult<SubmitReceipt> {
        self.invoker.resolve(&request.agent_id, &request.capability_name)?;

        let now = Utc::now();
        let job_id = {
            let mut state = self.state.lock();

            if let Some(key) = request.idempotency_key.as_deref() {
                if let Some(existing) = state.idempotency.lookup(key, now) {
                    if let Some(job) = state.jobs.get(&existing) {
                        debug!(key = %key, job_id = %existing, "Idempotent submission replayed");
                        return Ok(self.receipt(job, true));
                    }
                    state.idempotency.remove(key);
                }
            }

            if state.queue.len() >= self.config.max_queue_size
                && state.running >= self.config.max_concurrency
            {
                let mut rejected = JobRecord::new(&request);
                rejected.parent_job_id = parent;
                rejected.transition(JobStatus::Error);
                rejected.error = Some("queue full".to_string());
                let id = rejected.id;
                state.jobs.insert(id, rejected);
                warn!(
                    job_id = %id,
                    queued = state.queue.len(),
                    running = state.running,
                    "Submission rejected: queue full"
                );
                return Err(SwitchyardError::QueueFull(format!(
                    "job {id} rejected: {} queued, {} running",
                    state.queue.len(),
                    state.running
                )));
            }

            let mut job = JobRecord::new(&request);
            job.parent_job_id = parent;
            let id = job.id;
            if let Some(key) = request.idempotency_key.as_deref() {
                state.idempotency.insert(key, id, now);
            }
            state.tokens.insert(id, CancellationToken::new());
            state.jobs.insert(id, job);
            state.queue.push_back(id);
            info!(
                job_id = %id,
                agent = %request.agent_id,
                capability = %request.capability_name,
                "Job queued"
            );
            id
        };

        self.dispatch();

        let state = self.state.lock();
        match state.jobs.get(&job_id) {
            Some(job) => Ok(self.receipt(job, false)),
            // Reaped between dispatch and here; only possible with a zero TTL.
            None => Err(SwitchyardError::NotFound(format!("Unknown job: {job_id}"))),
        }
    }

    /// Start queued jobs while capacity allows, in FIFO order.
    fn dispatch(self: &Arc<Self>) {
        let mut launches = Vec::new();
        {
            let mut state = self.state.lock();
            while state.running < self.config.max_concurrency {
                let Some(id) = state.queue.pop_front() else {
                    break;
                };
                let Some(job) = state.jobs.get_mut(&id) else {
                    continue;
                };
                if job.status != JobStatus::Queued {
                    debug!(job_id = %id, status = %job.status, "Skipping job at dispatch");
                    continue;
                }
                job.transition(JobStatus::Running);
                let launch = Launch {
                    job_id: id,
                    agent_id: job.agent_id.clone(),
                    capability_name: job.capability_name.clone(),
                    input: job.input.clone(),
                    session_id: job.session_id.clone(),
                    token: state.tokens.get(&id).cloned().unwrap_or_default(),
                };
                state.running += 1;
                state.peak_running = state.peak_running.max(state.running);

                self.hub.broadcast(
                    &id.to_string(),
                    EventKind::Start,
                    payload(json!({
                        "agentId": launch.agent_id,
                        "capabilityName": launch.capability_name,
                    })),
                );
                launches.push(launch);
            }
        }

        for launch in launches {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.run(launch).await;
            });
        }
    }

    async fn run(self: Arc<Self>, launch: Launch) {
        let channel = launch.job_id.to_string();
        info!(job_id = %channel, agent = %launch.agent_id, "Job started");

        let (sink, mut chunks) = ChunkSink::channel();
        let forwarder = {
            let hub = Arc::clone(&self.hub);
            let channel = channel.clone();
            let token = launch.token.clone();
            tokio::spawn(async move {
                while let Some(chunk) = chunks.recv().await {
                    if token.is_cancelled() {
                        continue;
                    }
                    hub.broadcast(&channel, EventKind::Chunk, payload(chunk));
                }
            })
        };

        let ctx = ExecutionContext::new(channel.clone())
            .with_session(launch.session_id.clone())
            .with_cancellation(launch.token.clone())
            .with_chunks(sink);

        let call = self.invoker.invoke(
            &launch.agent_id,
            &launch.capability_name,
            launch.input,
            ctx,
        );
        let outcome = match self.config.job_timeout() {
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Err(SwitchyardError::Timeout(format!(
                    "job exceeded {}ms",
                    limit.as_millis()
                )))
            }),
            None => call.await,
        };

        if tokio::time::timeout(CHUNK_DRAIN_GRACE, forwarder).await.is_err() {
            warn!(job_id = %channel, "Chunk sink still held after completion");
        }

        self.complete(launch.job_id, outcome);
        self.dispatch();
    }

    fn complete(&self, job_id: Uuid, outcome: SwitchyardResult<Value>) {
        let mut state = self.state.lock();
        state.running = state.running.saturating_sub(1);
        state.tokens.remove(&job_id);

        let Some(job) = state.jobs.get_mut(&job_id) else {
            return;
        };
        let channel = job_id.to_string();

        if job.status == JobStatus::Canceled {
            // Canceled while running: keep the outcome for inspection, the
            // status stays terminal.
            match outcome {
                Ok(value) => job.result = Some(value),
                Err(e) => job.error = Some(e.to_string()),
            }
            info!(job_id = %job_id, "Canceled job finished executing");
            return;
        }

        match outcome {
            Ok(value) => {
                job.transition(JobStatus::Done);
                job.result = Some(value.clone());
                info!(job_id = %job_id, "Job done");
                self.hub
                    .broadcast(&channel, EventKind::Final, payload(json!({ "result": value })));
            }
            Err(e) => {
                job.transition(JobStatus::Error);
                job.error = Some(e.to_string());
                warn!(job_id = %job_id, error = %e, "Job failed");
                self.hub.broadcast(
                    &channel,
                    EventKind::Error,
                    payload(json!({ "error": e.to_string(), "kind": e.kind() })),
                );
            }
        }
    }

    /// Cancel a job. Advisory for running jobs: the cancellation token is
    /// tripped but execution is not interrupted.
    pub fn cancel(&self, job_id: Uuid) -> SwitchyardResult<CancelOutcome> {
        let mut state = self.state.lock();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| SwitchyardError::NotFound(format!("Unknown job: {job_id}")))?;

        if job.status.is_terminal() {
            return Ok(CancelOutcome {
                canceled: false,
                status: job.status,
            });
        }

        let was_queued = job.status == JobStatus::Queued;
        job.transition(JobStatus::Canceled);
        job.error = Some("canceled".to_string());

        if was_queued {
            state.queue.retain(|id| *id != job_id);
            state.tokens.remove(&job_id);
        } else if let Some(token) = state.tokens.get(&job_id) {
            token.cancel();
        }

        info!(job_id = %job_id, was_queued, "Job canceled");
        self.hub.broadcast(
            &job_id.to_string(),
            EventKind::Error,
            payload(json!({ "error": "canceled", "kind": "canceled" })),
        );

        Ok(CancelOutcome {
            canceled: true,
            status: JobStatus::Canceled,
        })
    }

    pub fn get_status(&self, job_id: Uuid) -> SwitchyardResult<JobRecord> {
        self.state
            .lock()
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| SwitchyardError::NotFound(format!("Unknown job: {job_id}")))
    }

    /// All known jobs, oldest first.
    pub fn list_jobs(&self) -> Vec<JobRecord> {
        let state = self.state.lock();
        let mut jobs: Vec<JobRecord> = state.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.state.lock();
        SchedulerStats {
            queued: state.queue.len(),
            running: state.running,
            total_jobs: state.jobs.len(),
            peak_running: state.peak_running,
            idempotency_keys: state.idempotency.len(),
        }
    }

    /// One reaper pass against the wall clock.
    pub fn reap(&self) -> ReapReport {
        self.reap_at(Utc::now())
    }

    /// One reaper pass as of `now`: drops expired or orphaned idempotency
    /// entries and terminal jobs idle for longer than the job TTL.
    pub fn reap_at(&self, now: DateTime<Utc>) -> ReapReport {
        let ttl = self.config.job_ttl();
        let mut state = self.state.lock();
        let SchedulerState {
            jobs, idempotency, ..
        } = &mut *state;

        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at + ttl <= now));
        let jobs_removed = before - jobs.len();
        let keys_removed = idempotency.sweep(now, |id| jobs.contains_key(id));

        if jobs_removed > 0 || keys_removed > 0 {
            info!(jobs_removed, keys_removed, "TTL sweep");
        }
        ReapReport {
            jobs_removed,
            keys_removed,
        }
    }

    /// Spawn the periodic TTL reaper.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let period = self.config.reap_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.reap();
            }
        })
    }

    fn receipt(&self, job: &JobRecord, deduplicated: bool) -> SubmitReceipt {
        SubmitReceipt {
            job_id: job.id,
            status: job.status,
            stream_url: format!(
                "{}/{}",
                self.config.stream_path_prefix.trim_end_matches('/'),
                job.id
            ),
            deduplicated,
        }
    }
}
