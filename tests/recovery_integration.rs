//! Integration tests for crash recovery and circuit-breaker behavior.

use docstream::config::Settings;
use docstream::events::{EventSink, JobEvent};
use docstream::extract::{ExtractError, ExtractOutput, Extractor};
use docstream::job::{Job, JobId, JobStatus, PayloadRef, Plan};
use docstream::queue::Tier;
use docstream::service::Orchestrator;
use docstream::store::{JobRecord, JobStore, MemoryJobStore};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test Helpers
// =============================================================================

struct TestExtractor {
    delay: Duration,
    fail_counts: Mutex<HashMap<String, u32>>,
    calls: AtomicUsize,
}

impl TestExtractor {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            fail_counts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn fail_first(&self, path: &str, times: u32) {
        self.fail_counts
            .lock()
            .unwrap()
            .insert(path.to_string(), times);
    }

    fn total_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Extractor for TestExtractor {
    fn extract<'a>(
        &'a self,
        payload: &'a PayloadRef,
    ) -> BoxFuture<'a, Result<ExtractOutput, ExtractError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;

            let path = payload.path.to_string_lossy().to_string();
            let should_fail = {
                let mut counts = self.fail_counts.lock().unwrap();
                match counts.get_mut(&path) {
                    Some(remaining) if *remaining > 0 => {
                        *remaining -= 1;
                        true
                    }
                    _ => false,
                }
            };

            if should_fail {
                Err(ExtractError::Engine("scripted failure".to_string()))
            } else {
                Ok(ExtractOutput {
                    result_path: payload.path.with_extension("out"),
                    bytes: payload.size_bytes,
                })
            }
        })
    }
}

#[derive(Default)]
struct CollectingSink {
    events: Mutex<Vec<JobEvent>>,
}

impl CollectingSink {
    fn collected(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: JobEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.health.clock_resolution = Duration::from_millis(10);
    settings.health.heartbeat_interval = Duration::from_millis(20);
    settings.retry.base_delay = Duration::from_millis(20);
    settings.retry.max_delay = Duration::from_millis(200);
    settings
}

/// Polls until the store shows the record in `status`, or panics.
async fn wait_for_status(store: &MemoryJobStore, id: &JobId, status: JobStatus) {
    for _ in 0..200 {
        if store.record(id).map(|r| r.status) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!(
        "record {} never reached {:?}; last seen {:?}",
        id,
        status,
        store.record(id).map(|r| r.status)
    );
}

const MB: u64 = 1024 * 1024;

// =============================================================================
// Crash Recovery
// =============================================================================

#[tokio::test]
async fn test_job_left_processing_is_resubmitted_and_completes_once() {
    let extractor = Arc::new(TestExtractor::new(Duration::from_millis(10)));
    let store = Arc::new(MemoryJobStore::new());
    let sink = Arc::new(CollectingSink::default());

    // A job the previous process died while executing.
    let mut interrupted = Job::new(
        PayloadRef::new("/in/interrupted.docx", MB),
        "owner-9",
        Plan::Standard,
        Tier::Normal,
    );
    interrupted.id = JobId::new("doc-interrupted");
    let mut record = JobRecord::from_job(&interrupted);
    record.status = JobStatus::Processing;
    store.insert(record);

    let orchestrator = Orchestrator::new(
        fast_settings(),
        Arc::clone(&extractor) as Arc<dyn Extractor>,
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::clone(&sink) as Arc<dyn EventSink>,
    )
    .unwrap();
    let shutdown = CancellationToken::new();
    let runner = tokio::spawn(orchestrator.run(shutdown.clone()));

    let id = JobId::new("doc-interrupted");
    wait_for_status(&store, &id, JobStatus::Completed).await;

    // Exactly one terminal write: re-processing happened once.
    assert_eq!(store.terminal_writes(&id), 1);
    assert_eq!(extractor.total_calls(), 1);

    // The restart was announced.
    assert!(sink
        .collected()
        .iter()
        .any(|e| matches!(e, JobEvent::SystemRecovery { .. })));

    shutdown.cancel();
    let _ = runner.await;
}

#[tokio::test]
async fn test_queued_record_recovers_with_retry_count_preserved() {
    let extractor = Arc::new(TestExtractor::new(Duration::from_millis(10)));
    let store = Arc::new(MemoryJobStore::new());
    let sink = Arc::new(CollectingSink::default());

    let mut job = Job::new(
        PayloadRef::new("/in/was-retrying.docx", MB),
        "owner-3",
        Plan::Premium,
        Tier::Premium,
    );
    job.id = JobId::new("doc-was-retrying");
    job.retry_count = 2;
    let mut record = JobRecord::from_job(&job);
    record.status = JobStatus::Queued;
    store.insert(record);

    let orchestrator = Orchestrator::new(
        fast_settings(),
        Arc::clone(&extractor) as Arc<dyn Extractor>,
        Arc::clone(&store) as Arc<dyn JobStore>,
        sink,
    )
    .unwrap();
    let shutdown = CancellationToken::new();
    let runner = tokio::spawn(orchestrator.run(shutdown.clone()));

    let id = JobId::new("doc-was-retrying");
    wait_for_status(&store, &id, JobStatus::Completed).await;

    // The consumed retry budget survived the restart.
    assert_eq!(store.record(&id).unwrap().retry_count, 2);

    shutdown.cancel();
    let _ = runner.await;
}

#[tokio::test]
async fn test_stale_records_outside_window_are_left_alone() {
    let extractor = Arc::new(TestExtractor::new(Duration::from_millis(10)));
    let store = Arc::new(MemoryJobStore::new());
    let sink = Arc::new(CollectingSink::default());

    let mut job = Job::new(
        PayloadRef::new("/in/ancient.docx", MB),
        "owner-5",
        Plan::Standard,
        Tier::Normal,
    );
    job.id = JobId::new("doc-ancient");
    let mut record = JobRecord::from_job(&job);
    record.status = JobStatus::Processing;
    record.updated_at = chrono::Utc::now() - chrono::Duration::hours(48);
    store.insert(record);

    let orchestrator = Orchestrator::new(
        fast_settings(),
        Arc::clone(&extractor) as Arc<dyn Extractor>,
        Arc::clone(&store) as Arc<dyn JobStore>,
        sink,
    )
    .unwrap();
    let shutdown = CancellationToken::new();
    let runner = tokio::spawn(orchestrator.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(300)).await;

    // Outside the recovery window: untouched, never re-executed.
    let id = JobId::new("doc-ancient");
    assert_eq!(store.record(&id).unwrap().status, JobStatus::Processing);
    assert_eq!(store.terminal_writes(&id), 0);
    assert_eq!(extractor.total_calls(), 0);

    shutdown.cancel();
    let _ = runner.await;
}

// =============================================================================
// Circuit Breaker
// =============================================================================

#[tokio::test]
async fn test_circuit_rejections_do_not_consume_retry_budget() {
    let extractor = Arc::new(TestExtractor::new(Duration::from_millis(5)));
    extractor.fail_first("/in/tripping.docx", 2);
    let store = Arc::new(MemoryJobStore::new());
    let sink = Arc::new(CollectingSink::default());

    let mut settings = fast_settings();
    settings.retry.max_retries = 5;
    settings.breaker.failure_threshold = 2;
    settings.breaker.circuit_timeout = Duration::from_millis(100);

    let orchestrator = Orchestrator::new(
        settings,
        Arc::clone(&extractor) as Arc<dyn Extractor>,
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::clone(&sink) as Arc<dyn EventSink>,
    )
    .unwrap();
    let service = orchestrator.service();
    let shutdown = CancellationToken::new();
    let runner = tokio::spawn(orchestrator.run(shutdown.clone()));

    let mut handle = service
        .submit_job(PayloadRef::new("/in/tripping.docx", MB), "owner-1", Plan::Standard)
        .unwrap();

    let status = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("job timed out");
    assert_eq!(status, JobStatus::Completed);

    // Two real failures tripped the breaker; while it was open the job was
    // re-queued without the engine ever being invoked, so only the final
    // probe call was added.
    assert_eq!(extractor.total_calls(), 3);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let record = store.record(handle.id()).unwrap();
    // Only the two real failures consumed retry budget.
    assert_eq!(record.retry_count, 2);

    // The open-circuit period surfaced to the owner as progress, never
    // failure.
    assert!(!sink
        .collected()
        .iter()
        .any(|e| matches!(e, JobEvent::JobFailed { .. })));

    shutdown.cancel();
    let _ = runner.await;
}
