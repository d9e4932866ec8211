use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Workflow lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Step lifecycle. `Completed`, `Failed` and `Skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Per-step retry policy. Backoff is linear: `backoff_base_ms * attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_base_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: 0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base_ms,
        }
    }

    /// Wait before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        std::time::Duration::from_millis(self.backoff_base_ms.saturating_mul(u64::from(attempt)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_if: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<String>,
}

/// A step as written in a definition. Dependencies are step names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub name: String,
    pub agent_id: String,
    pub capability_name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub conditions: StepConditions,
    #[serde(default)]
    pub retries: RetryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl StepDefinition {
    pub fn new(
        name: impl Into<String>,
        agent_id: impl Into<String>,
        capability_name: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            name: name.into(),
            agent_id: agent_id.into(),
            capability_name: capability_name.into(),
            input,
            dependencies: Vec::new(),
            conditions: StepConditions::default(),
            retries: RetryPolicy::default(),
            timeout_ms: None,
        }
    }

    pub fn depends_on(mut self, names: &[&str]) -> Self {
        self.dependencies = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    pub fn run_if(mut self, expr: impl Into<String>) -> Self {
        self.conditions.run_if = Some(expr.into());
        self
    }

    pub fn skip_if(mut self, expr: impl Into<String>) -> Self {
        self.conditions.skip_if = Some(expr.into());
        self
    }

    pub fn with_retries(mut self, policy: RetryPolicy) -> Self {
        self.retries = policy;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}

/// A named template or ad-hoc workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Default context; creation-time parameters override these keys.
    #[serde(default)]
    pub context: Map<String, Value>,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            context: Map::new(),
            steps,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }
}

/// A materialized step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: Uuid,
    pub name: String,
    pub agent_id: String,
    pub capability_name: String,
    /// Input template, expanded against the context at launch.
    pub input: Value,
    pub dependencies: Vec<Uuid>,
    pub status: StepStatus,
    pub attempts: u32,
    pub retries: RetryPolicy,
    pub conditions: StepConditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Armed backoff timer; the step is not ready before this instant.
    #[serde(skip)]
    pub retry_at: Option<tokio::time::Instant>,
}

impl Step {
    /// Whether this step is pending, not waiting on a backoff timer, and
    /// every dependency is `Completed`.
    pub fn is_ready(&self, steps: &[Step], now: tokio::time::Instant) -> bool {
        self.status == StepStatus::Pending
            && self.retry_at.map_or(true, |at| at <= now)
            && self.dependencies.iter().all(|dep| {
                steps
                    .iter()
                    .any(|s| s.id == *dep && s.status == StepStatus::Completed)
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<Step>,
    pub status: WorkflowStatus,
    pub context: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// Materialize a validated definition with fresh step ids.
    ///
    /// Dependency names must already be known to exist (see
    /// [`validate_definition`](super::graph::validate_definition)); an
    /// unknown name is silently dropped here.
    pub fn from_definition(definition: &WorkflowDefinition, context: Map<String, Value>) -> Self {
        let ids: Vec<(String, Uuid)> = definition
            .steps
            .iter()
            .map(|s| (s.name.clone(), Uuid::new_v4()))
            .collect();
        let id_of = |name: &str| ids.iter().find(|(n, _)| n == name).map(|(_, id)| *id);

        let steps = definition
            .steps
            .iter()
            .zip(&ids)
            .map(|(def, (_, id))| Step {
                id: *id,
                name: def.name.clone(),
                agent_id: def.agent_id.clone(),
                capability_name: def.capability_name.clone(),
                input: def.input.clone(),
                dependencies: def.dependencies.iter().filter_map(|d| id_of(d)).collect(),
                status: StepStatus::Pending,
                attempts: 0,
                retries: RetryPolicy::new(def.retries.max_attempts, def.retries.backoff_base_ms),
                conditions: def.conditions.clone(),
                timeout_ms: def.timeout_ms,
                result: None,
                error: None,
                started_at: None,
                completed_at: None,
                retry_at: None,
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            steps,
            status: WorkflowStatus::Pending,
            context,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn step(&self, id: Uuid) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: Uuid) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn step_by_name(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

/// Summary row for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    pub steps: usize,
    pub completed_steps: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(wf: &Workflow) -> Self {
        Self {
            id: wf.id,
            name: wf.name.clone(),
            status: wf.status,
            steps: wf.steps.len(),
            completed_steps: wf.count(StepStatus::Completed),
            created_at: wf.created_at,
        }
    }
}
