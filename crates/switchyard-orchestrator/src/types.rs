use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle of a job. Moves forward only:
/// `queued → running → {done, error, canceled}` (or straight from `queued`
/// to `canceled`/`error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Canceled)
    }

    /// Whether `self → next` is a legal forward transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Running) => true,
            (JobStatus::Queued, JobStatus::Error | JobStatus::Canceled) => true,
            (JobStatus::Running, s) => s.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Error => write!(f, "error"),
            JobStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// A unit of work owned by the admission scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,
    pub agent_id: String,
    pub capability_name: String,
    pub status: JobStatus,
    pub input: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Set on jobs created through a handoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(request: &SubmitRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_id: request.agent_id.clone(),
            capability_name: request.capability_name.clone(),
            status: JobStatus::Queued,
            input: request.input.clone(),
            created_at: now,
            updated_at: now,
            session_id: request.session_id.clone(),
            idempotency_key: request.idempotency_key.clone(),
            parent_job_id: None,
            result: None,
            error: None,
        }
    }

    /// Apply a forward transition. Returns `false` (and changes nothing)
    /// for an illegal one.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }
}

/// Submission surface payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub agent_id: String,
    pub capability_name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl SubmitRequest {
    pub fn new(
        agent_id: impl Into<String>,
        capability_name: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            capability_name: capability_name.into(),
            input,
            idempotency_key: None,
            session_id: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Returned by `submit` and `handoff`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub stream_url: String,
    /// `true` when an idempotency key resolved to an existing job.
    #[serde(default)]
    pub deduplicated: bool,
}

/// Payload of a handoff from a parent job to another agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRequest {
    pub to_agent_id: String,
    pub capability_name: String,
    #[serde(default)]
    pub payload: Value,
}

/// Result of `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub canceled: bool,
    pub status: JobStatus,
}

/// Point-in-time counters of the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: usize,
    pub total_jobs: usize,
    pub peak_running: usize,
    pub idempotency_keys: usize,
}

/// What one reaper pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub jobs_removed: usize,
    pub keys_removed: usize,
}
