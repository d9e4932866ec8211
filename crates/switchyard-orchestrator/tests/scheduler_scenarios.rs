#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::*;
use switchyard_orchestrator::*;
use switchyard_stream::{EventKind, HubConfig, HubFrame, StreamingHub};
use tokio::sync::Semaphore;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Test agent: one agent, several behaviours selected by capability name.
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LabState {
    current: AtomicUsize,
    max_seen: AtomicUsize,
    order: Mutex<Vec<String>>,
}

struct Lab {
    descriptor: AgentDescriptor,
    state: Arc<LabState>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl Agent for Lab {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        capability: &str,
        input: Value,
        ctx: &ExecutionContext,
    ) -> SwitchyardResult<Value> {
        let now = self.state.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_seen.fetch_max(now, Ordering::SeqCst);
        if let Some(tag) = input["tag"].as_str() {
            self.state.order.lock().push(tag.to_string());
        }

        let out = match capability {
            "chat" => {
                for i in 0..input["chunks"].as_u64().unwrap_or(0) {
                    ctx.emit_chunk(json!({ "delta": i }));
                }
                let ms = input["sleepMs"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(input)
            }
            "hold" => {
                self.gate.acquire().await.unwrap().forget();
                Ok(json!({ "released": true }))
            }
            "spin" => {
                while !ctx.is_cancelled() {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                Ok(json!({ "stopped": true }))
            }
            _ => Err(SwitchyardError::ExecutionFailure("lab failure".into())),
        };

        self.state.current.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

struct Harness {
    scheduler: Arc<AdmissionScheduler>,
    hub: Arc<StreamingHub>,
    state: Arc<LabState>,
    gate: Arc<Semaphore>,
}

fn harness(config: SchedulerConfig) -> Harness {
    let state = Arc::new(LabState::default());
    let gate = Arc::new(Semaphore::new(0));
    let lab = Lab {
        descriptor: AgentDescriptor {
            id: "echo".into(),
            description: "test agent".into(),
            capabilities: ["chat", "hold", "spin", "fail"]
                .iter()
                .map(|c| CapabilityDescriptor::new(*c, ""))
                .collect(),
        },
        state: Arc::clone(&state),
        gate: Arc::clone(&gate),
    };
    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(lab));

    let hub = StreamingHub::new(HubConfig::default());
    let scheduler = AdmissionScheduler::new(config, Arc::new(registry), Arc::clone(&hub));
    Harness {
        scheduler,
        hub,
        state,
        gate,
    }
}

fn limits(max_concurrency: usize, max_queue_size: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_concurrency,
        max_queue_size,
        ..SchedulerConfig::default()
    }
}

async fn settled(scheduler: &AdmissionScheduler, id: Uuid) -> JobRecord {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = scheduler.get_status(id).unwrap();
            if job.status.is_terminal() && scheduler.stats().running == 0 {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("job did not settle")
}

#[tokio::test]
async fn test_idempotency_key_resolves_to_one_job() {
    let h = harness(SchedulerConfig::default());
    let request =
        SubmitRequest::new("echo", "chat", json!({ "text": "hi" })).with_idempotency_key("abc");

    let first = h.scheduler.submit(request.clone()).unwrap();
    let second = h.scheduler.submit(request.clone()).unwrap();
    settled(&h.scheduler, first.job_id).await;
    let third = h.scheduler.submit(request).unwrap();

    assert_eq!(first.job_id, second.job_id);
    assert_eq!(first.job_id, third.job_id);
    assert!(third.deduplicated);
    assert_eq!(third.status, JobStatus::Done);
    assert_eq!(h.scheduler.list_jobs().len(), 1);
}

#[tokio::test]
async fn test_running_jobs_never_exceed_ceiling() {
    let h = harness(limits(3, 100));
    let ids: Vec<Uuid> = (0..12)
        .map(|i| {
            h.scheduler
                .submit(SubmitRequest::new("echo", "chat", json!({ "sleepMs": 10 + i })))
                .unwrap()
                .job_id
        })
        .collect();

    for id in ids {
        assert_eq!(settled(&h.scheduler, id).await.status, JobStatus::Done);
    }
    assert!(h.state.max_seen.load(Ordering::SeqCst) <= 3);
    assert_eq!(h.scheduler.stats().peak_running, 3);
}

#[tokio::test]
async fn test_backpressure_rejects_without_runnable_record() {
    let h = harness(limits(1, 1));
    let one = h.scheduler.submit(SubmitRequest::new("echo", "hold", json!({}))).unwrap();
    let two = h.scheduler.submit(SubmitRequest::new("echo", "chat", json!({}))).unwrap();
    let three = h.scheduler.submit(SubmitRequest::new("echo", "chat", json!({})));

    assert_eq!(one.status, JobStatus::Running);
    assert_eq!(two.status, JobStatus::Queued);
    let err = three.unwrap_err();
    assert!(matches!(err, SwitchyardError::QueueFull(_)));
    assert_eq!(err.kind(), "queue_full");

    let stats = h.scheduler.stats();
    assert_eq!((stats.running, stats.queued), (1, 1));

    h.gate.add_permits(1);
    assert_eq!(settled(&h.scheduler, two.job_id).await.status, JobStatus::Done);
    let rejected: Vec<JobRecord> = h
        .scheduler
        .list_jobs()
        .into_iter()
        .filter(|j| j.error.as_deref() == Some("queue full"))
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].status, JobStatus::Error);
}

#[tokio::test]
async fn test_queued_jobs_start_in_fifo_order() {
    let h = harness(limits(1, 10));
    let blocker = h.scheduler.submit(SubmitRequest::new("echo", "hold", json!({}))).unwrap();
    let mut last = blocker.job_id;
    for tag in ["a", "b", "c", "d"] {
        last = h
            .scheduler
            .submit(SubmitRequest::new("echo", "chat", json!({ "tag": tag })))
            .unwrap()
            .job_id;
    }
    h.gate.add_permits(1);
    settled(&h.scheduler, last).await;
    assert_eq!(*h.state.order.lock(), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_subscriber_sees_ordered_lifecycle_events() {
    let h = harness(limits(1, 10));
    h.scheduler.submit(SubmitRequest::new("echo", "hold", json!({}))).unwrap();
    let job = h
        .scheduler
        .submit(SubmitRequest::new("echo", "chat", json!({ "chunks": 2 })))
        .unwrap();
    let mut sub = h.hub.attach(&job.job_id.to_string(), None).unwrap();

    h.gate.add_permits(1);

    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = sub.frames.recv().await {
            if let HubFrame::Event(e) = frame {
                let last = e.kind == EventKind::Final;
                events.push(e);
                if last {
                    break;
                }
            }
        }
    })
    .await
    .unwrap();

    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Start, EventKind::Chunk, EventKind::Chunk, EventKind::Final]
    );
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4]);
    assert!(events.iter().all(|e| e.job_id == job.job_id.to_string()));
    assert_eq!(events[3].payload["result"]["chunks"], 2);
}

#[tokio::test]
async fn test_failing_capability_publishes_error_event() {
    let h = harness(limits(1, 10));
    h.scheduler.submit(SubmitRequest::new("echo", "hold", json!({}))).unwrap();
    let job = h.scheduler.submit(SubmitRequest::new("echo", "fail", json!({}))).unwrap();
    let mut sub = h.hub.attach(&job.job_id.to_string(), None).unwrap();
    h.gate.add_permits(1);

    let record = settled(&h.scheduler, job.job_id).await;
    assert_eq!(record.status, JobStatus::Error);
    assert!(record.error.unwrap().contains("lab failure"));

    let mut last = None;
    while let Ok(frame) = sub.frames.try_recv() {
        if let HubFrame::Event(e) = frame {
            last = Some(e);
        }
    }
    let last = last.unwrap();
    assert_eq!(last.kind, EventKind::Error);
    assert_eq!(last.payload["kind"], "execution_failure");
}

#[tokio::test]
async fn test_cancel_running_job_is_cooperative() {
    let h = harness(limits(2, 10));
    let job = h.scheduler.submit(SubmitRequest::new("echo", "spin", json!({}))).unwrap();
    assert_eq!(job.status, JobStatus::Running);

    let outcome = h.scheduler.cancel(job.job_id).unwrap();
    assert!(outcome.canceled);
    assert_eq!(outcome.status, JobStatus::Canceled);

    let record = settled(&h.scheduler, job.job_id).await;
    assert_eq!(record.status, JobStatus::Canceled);
    assert_eq!(record.result, Some(json!({ "stopped": true })));
    assert!(!h.scheduler.cancel(job.job_id).unwrap().canceled);
}

#[tokio::test]
async fn test_job_deadline_ends_in_timeout() {
    let h = harness(SchedulerConfig {
        job_timeout_ms: Some(30),
        ..SchedulerConfig::default()
    });
    let job = h
        .scheduler
        .submit(SubmitRequest::new("echo", "chat", json!({ "sleepMs": 5_000 })))
        .unwrap();
    let record = settled(&h.scheduler, job.job_id).await;
    assert_eq!(record.status, JobStatus::Error);
    assert!(record.error.unwrap().starts_with("Timeout"));
}

#[tokio::test]
async fn test_handoff_chain_keeps_session() {
    let h = harness(SchedulerConfig::default());
    let parent = h
        .scheduler
        .submit(SubmitRequest::new("echo", "chat", json!({})).with_session("s-42"))
        .unwrap();
    let child = h
        .scheduler
        .handoff(
            parent.job_id,
            HandoffRequest {
                to_agent_id: "echo".into(),
                capability_name: "chat".into(),
                payload: json!({ "step": 2 }),
            },
        )
        .unwrap();

    let record = settled(&h.scheduler, child.job_id).await;
    assert_eq!(record.status, JobStatus::Done);
    assert_eq!(record.session_id.as_deref(), Some("s-42"));
    assert_eq!(record.parent_job_id, Some(parent.job_id));

    let err = h
        .scheduler
        .handoff(
            parent.job_id,
            HandoffRequest {
                to_agent_id: "nobody".into(),
                capability_name: "chat".into(),
                payload: Value::Null,
            },
        )
        .unwrap_err();
    assert!(matches!(err, SwitchyardError::NotFound(_)));
}

#[tokio::test]
async fn test_reaper_forgets_finished_jobs_after_ttl() {
    let h = harness(SchedulerConfig {
        job_ttl_secs: 0,
        idempotency_ttl_secs: 0,
        ..SchedulerConfig::default()
    });
    let job = h
        .scheduler
        .submit(SubmitRequest::new("echo", "chat", json!({})).with_idempotency_key("k"))
        .unwrap();
    settled(&h.scheduler, job.job_id).await;

    let report = h.scheduler.reap();
    assert_eq!(report.jobs_removed, 1);
    assert_eq!(report.keys_removed, 1);
    assert!(matches!(
        h.scheduler.get_status(job.job_id),
        Err(SwitchyardError::NotFound(_))
    ));
}
