use thiserror::Error;

/// A convenience `Result` alias using [`SwitchyardError`].
pub type SwitchyardResult<T> = Result<T, SwitchyardError>;

/// Top-level error type shared by every Switchyard crate.
///
/// The first five variants form the orchestration taxonomy: admission-time
/// failures (`NotFound`, `QueueFull`) are returned to the caller synchronously,
/// execution-time failures (`Timeout`, `ExecutionFailure`) are recorded on the
/// job or step and published as `error` events.
#[derive(Error, Debug)]
pub enum SwitchyardError {
    /// Unknown agent, capability, job, workflow or template.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Admission rejected because both the run queue and the concurrency
    /// pool are exhausted.
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// A job or step exceeded its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The capability-invocation interface returned a failure or panicked.
    #[error("Execution failure: {0}")]
    ExecutionFailure(String),

    /// Malformed predicate, template or workflow definition.
    #[error("Validation failure: {0}")]
    ValidationFailure(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the HTTP / WebSocket gateway layer.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SwitchyardError {
    /// Short machine-readable name of the variant, used in wire payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            SwitchyardError::NotFound(_) => "not_found",
            SwitchyardError::QueueFull(_) => "queue_full",
            SwitchyardError::Timeout(_) => "timeout",
            SwitchyardError::ExecutionFailure(_) => "execution_failure",
            SwitchyardError::ValidationFailure(_) => "validation_failure",
            SwitchyardError::Config(_) => "config",
            SwitchyardError::Gateway(_) => "gateway",
            SwitchyardError::Json(_) => "json",
            SwitchyardError::Io(_) => "io",
        }
    }
}
