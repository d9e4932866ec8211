#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::*;
use switchyard_orchestrator::*;
use switchyard_stream::{EventKind, HubConfig, HubFrame, StreamingHub};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Recording invoker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    /// tag -> (start, end) of every invocation.
    spans: Mutex<HashMap<String, Vec<(Instant, Instant)>>>,
    calls: Mutex<HashMap<String, u32>>,
    current: AtomicUsize,
    max_seen: AtomicUsize,
}

impl Recorder {
    fn spans(&self, tag: &str) -> Vec<(Instant, Instant)> {
        self.spans.lock().get(tag).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl CapabilityInvoker for Recorder {
    fn resolve(&self, _agent_id: &str, _capability: &str) -> SwitchyardResult<()> {
        Ok(())
    }

    async fn invoke(
        &self,
        _agent_id: &str,
        capability: &str,
        input: Value,
        ctx: ExecutionContext,
    ) -> SwitchyardResult<Value> {
        let tag = input["tag"].as_str().unwrap_or("untagged").to_string();
        let call = {
            let mut calls = self.calls.lock();
            let n = calls.entry(tag.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        let start = Instant::now();

        let out = match capability {
            "work" => {
                let ms = input["sleepMs"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({ "tag": tag, "call": call, "input": input }))
            }
            "flaky" => {
                let failures = input["failures"].as_u64().unwrap_or(0) as u32;
                if call <= failures {
                    Err(SwitchyardError::ExecutionFailure(format!("attempt {call} failed")))
                } else {
                    Ok(json!({ "call": call }))
                }
            }
            "wait" => {
                ctx.cancellation.cancelled().await;
                Ok(json!({ "interrupted": true }))
            }
            other => Err(SwitchyardError::ExecutionFailure(format!("no such behaviour {other}"))),
        };

        self.current.fetch_sub(1, Ordering::SeqCst);
        self.spans
            .lock()
            .entry(tag)
            .or_default()
            .push((start, Instant::now()));
        out
    }
}

fn setup(config: WorkflowConfig) -> (Arc<WorkflowEngine>, Arc<Recorder>, Arc<StreamingHub>) {
    let recorder = Arc::new(Recorder::default());
    let hub = StreamingHub::new(HubConfig::default());
    let engine = WorkflowEngine::new(config, recorder.clone(), Arc::clone(&hub));
    (engine, recorder, hub)
}

fn work(name: &str, sleep_ms: u64) -> StepDefinition {
    StepDefinition::new(name, "lab", "work", json!({ "tag": name, "sleepMs": sleep_ms }))
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_fan_out_waits_for_shared_dependency() {
    let (engine, rec, _hub) = setup(WorkflowConfig::default());
    let wf = engine
        .create_custom(WorkflowDefinition::new(
            "fan-out",
            vec![
                work("a", 100),
                work("b", 50).depends_on(&["a"]),
                work("c", 50).depends_on(&["a"]),
            ],
        ))
        .unwrap();

    let done = engine.execute(wf.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);

    let (_, a_end) = rec.spans("a")[0];
    let (b_start, b_end) = rec.spans("b")[0];
    let (c_start, c_end) = rec.spans("c")[0];
    assert!(b_start >= a_end);
    assert!(c_start >= a_end);
    // b and c overlap.
    assert!(b_start < c_end && c_start < b_end);
}

#[tokio::test(start_paused = true)]
async fn test_flaky_step_recovers_on_second_attempt() {
    let (engine, rec, _hub) = setup(WorkflowConfig::default());
    let step = StepDefinition::new("s", "lab", "flaky", json!({ "tag": "s", "failures": 1 }))
        .skip_if("false")
        .with_retries(RetryPolicy::new(2, 10));
    let wf = engine
        .create_custom(WorkflowDefinition::new("flaky", vec![step]))
        .unwrap();

    let done = engine.execute(wf.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);
    let s = done.step_by_name("s").unwrap();
    assert_eq!(s.status, StepStatus::Completed);
    assert_eq!(s.attempts, 2);
    assert_eq!(rec.spans("s").len(), 2);
    assert_eq!(done.context["s_result"]["call"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_retries_back_off_linearly() {
    let (engine, rec, _hub) = setup(WorkflowConfig::default());
    let step = StepDefinition::new("s", "lab", "flaky", json!({ "tag": "s", "failures": 2 }))
        .with_retries(RetryPolicy::new(3, 100));
    let wf = engine
        .create_custom(WorkflowDefinition::new("backoff", vec![step]))
        .unwrap();

    let done = engine.execute(wf.id).await.unwrap();
    assert_eq!(done.step_by_name("s").unwrap().status, StepStatus::Completed);

    let spans = rec.spans("s");
    assert_eq!(spans.len(), 3);
    let first_wait = spans[1].0 - spans[0].1;
    let second_wait = spans[2].0 - spans[1].1;
    assert!(first_wait >= Duration::from_millis(100) && first_wait < Duration::from_millis(150));
    assert!(second_wait >= Duration::from_millis(200) && second_wait < Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_the_workflow_but_not_independent_branches() {
    let (engine, _rec, _hub) = setup(WorkflowConfig::default());
    let wf = engine
        .create_custom(WorkflowDefinition::new(
            "partial",
            vec![
                StepDefinition::new("bad", "lab", "flaky", json!({ "tag": "bad", "failures": 5 }))
                    .with_retries(RetryPolicy::new(2, 10)),
                work("after_bad", 0).depends_on(&["bad"]),
                work("independent", 30),
            ],
        ))
        .unwrap();

    let done = engine.execute(wf.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Failed);
    let bad = done.step_by_name("bad").unwrap();
    assert_eq!(bad.status, StepStatus::Failed);
    assert_eq!(bad.attempts, 2);
    assert!(bad.error.as_deref().unwrap().contains("attempt 2 failed"));
    assert_eq!(done.step_by_name("after_bad").unwrap().status, StepStatus::Skipped);
    assert_eq!(done.step_by_name("independent").unwrap().status, StepStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_step_concurrency_is_bounded() {
    let (engine, rec, _hub) = setup(WorkflowConfig {
        max_step_concurrency: 2,
        ..WorkflowConfig::default()
    });
    let steps = (0..6).map(|i| work(&format!("s{i}"), 20)).collect();
    let wf = engine
        .create_custom(WorkflowDefinition::new("wide", steps))
        .unwrap();

    let done = engine.execute(wf.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(rec.max_seen.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_skip_if_true_skips_step_and_strands_dependents() {
    let (engine, rec, _hub) = setup(WorkflowConfig::default());
    let mut context = Map::new();
    context.insert("mode".into(), json!("dry"));
    let wf = engine
        .create_custom(
            WorkflowDefinition::new(
                "skips",
                vec![
                    work("deploy", 0).skip_if("mode == 'dry'"),
                    work("notify", 0).depends_on(&["deploy"]),
                    work("report", 0),
                ],
            )
            .with_context(context),
        )
        .unwrap();

    let done = engine.execute(wf.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(done.step_by_name("deploy").unwrap().status, StepStatus::Skipped);
    assert_eq!(done.step_by_name("notify").unwrap().status, StepStatus::Skipped);
    assert_eq!(done.step_by_name("report").unwrap().status, StepStatus::Completed);
    assert!(rec.spans("deploy").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_if_sees_results_of_earlier_steps() {
    let (engine, rec, _hub) = setup(WorkflowConfig::default());
    let wf = engine
        .create_custom(WorkflowDefinition::new(
            "conditional",
            vec![
                work("lookup", 0),
                work("follow", 0)
                    .depends_on(&["lookup"])
                    .run_if("lookup_result.call == 1 && lookup_result.tag == 'lookup'"),
            ],
        ))
        .unwrap();

    let done = engine.execute(wf.id).await.unwrap();
    assert_eq!(done.step_by_name("follow").unwrap().status, StepStatus::Completed);
    assert_eq!(rec.spans("follow").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_predicate_error_fails_closed_without_failing_workflow() {
    let (engine, rec, _hub) = setup(WorkflowConfig::default());
    let mut context = Map::new();
    context.insert("count".into(), json!(3));
    let wf = engine
        .create_custom(
            WorkflowDefinition::new(
                "bad-predicate",
                vec![work("odd", 0).run_if("count > 'three'"), work("fine", 0)],
            )
            .with_context(context),
        )
        .unwrap();

    let done = engine.execute(wf.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(done.step_by_name("odd").unwrap().status, StepStatus::Skipped);
    assert!(rec.spans("odd").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_counts_as_failure() {
    let (engine, _rec, _hub) = setup(WorkflowConfig::default());
    let wf = engine
        .create_custom(WorkflowDefinition::new(
            "slow",
            vec![work("slow", 10_000).with_timeout_ms(50)],
        ))
        .unwrap();

    let done = engine.execute(wf.id).await.unwrap();
    let step = done.step_by_name("slow").unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert!(step.error.as_deref().unwrap().starts_with("Timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_template_expansion_reaches_capability() {
    let (engine, _rec, _hub) = setup(WorkflowConfig::default());
    let mut context = Map::new();
    context.insert("base".into(), json!("http://h"));
    let wf = engine
        .create_custom(
            WorkflowDefinition::new(
                "expand",
                vec![StepDefinition::new(
                    "fetch",
                    "lab",
                    "work",
                    json!({ "tag": "fetch", "url": "{{base}}/x", "keep": "{{missing}}" }),
                )],
            )
            .with_context(context),
        )
        .unwrap();

    let done = engine.execute(wf.id).await.unwrap();
    let seen = &done.context["fetch_result"]["input"];
    assert_eq!(seen["url"], "http://h/x");
    assert_eq!(seen["keep"], "{{missing}}");
    // the stored template is left untouched
    assert_eq!(done.step_by_name("fetch").unwrap().input["url"], "{{base}}/x");
}

#[tokio::test]
async fn test_cancel_running_workflow_lets_inflight_step_finish() {
    let (engine, _rec, _hub) = setup(WorkflowConfig::default());
    let wf = engine
        .create_custom(WorkflowDefinition::new(
            "cancel-me",
            vec![
                StepDefinition::new("hang", "lab", "wait", json!({ "tag": "hang" })),
                work("next", 0).depends_on(&["hang"]),
            ],
        ))
        .unwrap();

    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.execute(wf.id).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current = engine.get_workflow(wf.id).unwrap();
            if current.step_by_name("hang").unwrap().status == StepStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();

    assert!(engine.cancel_workflow(wf.id).unwrap());
    let done = runner.await.unwrap().unwrap();

    assert_eq!(done.status, WorkflowStatus::Cancelled);
    let hang = done.step_by_name("hang").unwrap();
    assert_eq!(hang.status, StepStatus::Completed);
    assert_eq!(hang.result, Some(json!({ "interrupted": true })));
    let next = done.step_by_name("next").unwrap();
    assert_eq!(next.status, StepStatus::Skipped);
    assert_eq!(next.error.as_deref(), Some("workflow cancelled"));
}

#[tokio::test(start_paused = true)]
async fn test_workflow_progress_is_streamed_in_sequence() {
    let (engine, _rec, hub) = setup(WorkflowConfig::default());
    let wf = engine
        .create_custom(WorkflowDefinition::new("streamed", vec![work("only", 10)]))
        .unwrap();
    let mut sub = hub.attach(&wf.id.to_string(), None).unwrap();

    engine.execute(wf.id).await.unwrap();

    let mut events = Vec::new();
    while let Ok(frame) = sub.frames.try_recv() {
        if let HubFrame::Event(e) = frame {
            events.push(e);
        }
    }
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Start, EventKind::Chunk, EventKind::Chunk, EventKind::Final]
    );
    assert_eq!(events[1].payload["event"], "step_started");
    assert_eq!(events[2].payload["event"], "step_completed");
    assert_eq!(events[3].payload["status"], "completed");
    for pair in events.windows(2) {
        assert_eq!(pair[1].seq, pair[0].seq + 1);
    }
}

#[tokio::test]
async fn test_invalid_definitions_are_rejected_up_front() {
    let (engine, _rec, _hub) = setup(WorkflowConfig::default());
    let cyclic = WorkflowDefinition::new(
        "cyclic",
        vec![work("a", 0).depends_on(&["b"]), work("b", 0).depends_on(&["a"])],
    );
    assert!(matches!(
        engine.create_custom(cyclic),
        Err(SwitchyardError::ValidationFailure(_))
    ));
    assert!(engine.list_workflows().is_empty());
}
