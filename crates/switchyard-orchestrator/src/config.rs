use serde::Deserialize;
use std::time::Duration;

/// Knobs for the admission scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Hard ceiling on concurrently running jobs.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Queue length at which, with the pool also full, submissions are rejected.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Retention of terminal jobs after their last update.
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,
    /// Lifetime of an idempotency key.
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,
    /// Period of the TTL reaper.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    /// Optional deadline applied to every job invocation.
    #[serde(default)]
    pub job_timeout_ms: Option<u64>,
    /// Prefix used to build the `streamUrl` returned on submission.
    #[serde(default = "default_stream_path_prefix")]
    pub stream_path_prefix: String,
}

fn default_max_concurrency() -> usize {
    4
}
fn default_max_queue_size() -> usize {
    100
}
fn default_job_ttl_secs() -> u64 {
    3600
}
fn default_idempotency_ttl_secs() -> u64 {
    600
}
fn default_reap_interval_secs() -> u64 {
    60
}
fn default_stream_path_prefix() -> String {
    "/stream".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_queue_size: default_max_queue_size(),
            job_ttl_secs: default_job_ttl_secs(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            job_timeout_ms: None,
            stream_path_prefix: default_stream_path_prefix(),
        }
    }
}

impl SchedulerConfig {
    pub fn job_ttl(&self) -> chrono::Duration {
        secs_to_chrono(self.job_ttl_secs)
    }

    pub fn idempotency_ttl(&self) -> chrono::Duration {
        secs_to_chrono(self.idempotency_ttl_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_ms.map(Duration::from_millis)
    }
}

/// Knobs for the workflow engine.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// Maximum steps of one workflow executing at the same time.
    #[serde(default = "default_max_step_concurrency")]
    pub max_step_concurrency: usize,
    /// Deadline for steps that do not set `timeoutMs`.
    #[serde(default)]
    pub default_step_timeout_ms: Option<u64>,
    /// Suffix appended to a step name to form its context key.
    #[serde(default = "default_result_key_suffix")]
    pub result_key_suffix: String,
}

fn default_max_step_concurrency() -> usize {
    4
}
fn default_result_key_suffix() -> String {
    "_result".to_string()
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_step_concurrency: default_max_step_concurrency(),
            default_step_timeout_ms: None,
            result_key_suffix: default_result_key_suffix(),
        }
    }
}

fn secs_to_chrono(secs: u64) -> chrono::Duration {
    chrono::Duration::from_std(Duration::from_secs(secs))
        .unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}
