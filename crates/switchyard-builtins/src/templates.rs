use serde_json::{json, Map, Value};
use switchyard_orchestrator::{RetryPolicy, StepDefinition, WorkflowDefinition};

/// Templates registered with every workflow engine the server builds.
///
/// - `text-pipeline`: uppercase and count `text` in parallel, then echo a
///   summary built from both results.
/// - `guarded-echo`: sleep `warmupMs` (retried once on failure), then echo
///   `message` unless `skip` is truthy.
pub fn builtin_templates() -> Vec<WorkflowDefinition> {
    vec![text_pipeline(), guarded_echo()]
}

fn context(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn text_pipeline() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "text-pipeline",
        vec![
            StepDefinition::new("upper", "text", "upper", json!({ "text": "{{text}}" })),
            StepDefinition::new("count", "text", "word_count", json!({ "text": "{{text}}" })),
            StepDefinition::new(
                "summary",
                "echo",
                "chat",
                json!({
                    "message": "{{upper_result.text}} has {{count_result.words}} words"
                }),
            )
            .depends_on(&["upper", "count"])
            .run_if("count_result.words > 0"),
        ],
    )
    .with_description("Transform and count a text, then summarize")
    .with_context(context(&[("text", json!("hello switchyard"))]))
}

fn guarded_echo() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "guarded-echo",
        vec![
            StepDefinition::new("warmup", "util", "sleep", json!({ "ms": "{{warmupMs}}" }))
                .with_retries(RetryPolicy::new(2, 100)),
            StepDefinition::new("reply", "echo", "chat", json!({ "message": "{{message}}" }))
                .depends_on(&["warmup"])
                .skip_if("skip"),
        ],
    )
    .with_description("Echo a message after a warmup, unless told to skip")
    .with_context(context(&[
        ("message", json!("ready")),
        ("warmupMs", json!(10)),
        ("skip", json!(false)),
    ]))
}
