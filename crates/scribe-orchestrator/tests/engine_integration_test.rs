//! End-to-end tests for the content engine.
//!
//! Covers:
//! - Concurrent batches honoring the concurrency ceiling
//! - Adaptive batches holding to their load-scaled ceiling
//! - Stop-on-error aborting sequential, concurrent and adaptive batches
//! - Provider panics failing a batch without losing the worker
//! - Fallback from a failing primary provider
//! - Strict priority order for single requests
//! - Cancel, pause and resume of running batches
//! - Event stream and statistics

use scribe_orchestrator::{
    BatchSpec, ContentEngine, EngineConfig, FixedLoad, JobSnapshot, JobStatus, MockProvider,
    Priority, ProcessingMode, ProgressEvent, RequestSpec, RequestStatus, RoutingStrategy,
    SystemLoad,
};
use scribe_abstraction::Provider;
use std::sync::Arc;
use std::time::Duration;

fn quiet_load() -> Arc<FixedLoad> {
    Arc::new(FixedLoad(SystemLoad { memory_percent: 20.0, cpu_percent: 20.0 }))
}

fn busy_load() -> Arc<FixedLoad> {
    Arc::new(FixedLoad(SystemLoad { memory_percent: 75.0, cpu_percent: 50.0 }))
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.rate_limit.requests_per_minute = 10_000;
    config.scheduler.poll_interval_ms = 10;
    config.batch.pause_poll_interval_ms = 10;
    config
}

async fn engine_with(config: EngineConfig, providers: Vec<Arc<dyn Provider>>) -> ContentEngine {
    let engine = ContentEngine::builder(config)
        .providers(providers)
        .load_probe(quiet_load())
        .build()
        .unwrap();
    assert!(engine.start().await);
    engine
}

fn requests(count: usize) -> Vec<RequestSpec> {
    (0..count).map(|i| RequestSpec::new("article", format!("topic {i}"))).collect()
}

async fn wait_job(engine: &ContentEngine, id: &str) -> JobSnapshot {
    for _ in 0..1000 {
        let snapshot = engine.batch_status(id).await.unwrap();
        if snapshot.status.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not reach a terminal state");
}

#[tokio::test]
async fn test_concurrent_batch_completes_within_ceiling() {
    let provider = Arc::new(MockProvider::new("alpha").with_latency(Duration::from_millis(30)));
    let engine = engine_with(config(), vec![provider.clone()]).await;

    let id = engine
        .submit_batch(
            BatchSpec::new("ten", requests(10))
                .with_mode(ProcessingMode::Concurrent)
                .with_max_concurrent(3),
        )
        .await
        .unwrap();
    let snapshot = wait_job(&engine, &id).await;

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.completed, 10);
    assert_eq!(snapshot.failed, 0);
    assert!((snapshot.progress_percent - 100.0).abs() < f64::EPSILON);
    assert_eq!(provider.calls(), 10);
    assert!(provider.max_in_flight() <= 3, "high-water mark {}", provider.max_in_flight());
    assert!(provider.max_in_flight() >= 2);

    engine.stop().await;
}

#[tokio::test]
async fn test_stop_on_error_keeps_partial_results() {
    let provider = Arc::new(MockProvider::new("alpha").failing_on("topic 1"));
    let engine = engine_with(config(), vec![provider.clone()]).await;

    let id = engine
        .submit_batch(BatchSpec::new("five", requests(5)).with_stop_on_error(true))
        .await
        .unwrap();
    let snapshot = wait_job(&engine, &id).await;

    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(provider.calls(), 2);

    let results = engine.batch_results(&id).await.unwrap();
    assert_eq!(results[0].status, RequestStatus::Completed);
    assert_eq!(results[1].status, RequestStatus::Failed);
    assert!(results[2..].iter().all(|r| r.status == RequestStatus::Pending));
    // One item error plus the job-level abort.
    assert_eq!(snapshot.errors.len(), 2);
    assert_eq!(snapshot.errors[0].index, Some(1));

    engine.stop().await;
}

#[tokio::test]
async fn test_failed_items_do_not_abort_batch() {
    let provider = Arc::new(MockProvider::new("alpha").failing_on("topic 3"));
    let engine = engine_with(config(), vec![provider]).await;

    let id = engine
        .submit_batch(BatchSpec::new("six", requests(6)).with_mode(ProcessingMode::Concurrent))
        .await
        .unwrap();
    let snapshot = wait_job(&engine, &id).await;

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.completed + snapshot.failed, snapshot.total);
    assert_eq!(snapshot.failed, 1);

    engine.stop().await;
}

#[tokio::test]
async fn test_fallback_result_and_performance() {
    let mut config = config();
    config.routing.default_strategy = RoutingStrategy::QualityFirst;
    config
        .routing
        .quality_preferences
        .insert("default".to_string(), vec!["primary".to_string(), "backup".to_string()]);
    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(MockProvider::new("primary").failing()),
        Arc::new(MockProvider::new("backup").with_response("backup copy")),
    ];
    let engine = engine_with(config, providers).await;

    let id = engine.submit_request(RequestSpec::new("article", "fallbacks")).await.unwrap();
    let mut finished = None;
    for _ in 0..500 {
        if let Some(request) = engine.request_result(&id).await.unwrap() {
            finished = Some(request);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let request = finished.expect("request finished");

    assert_eq!(request.status, RequestStatus::Completed);
    let output = request.output.unwrap();
    assert_eq!(output.provider, "backup");
    assert_eq!(output.content, "backup copy");
    assert_eq!(output.fallback_errors.len(), 1);

    let stats = engine.statistics().await;
    assert_eq!(stats.providers["primary"].failures, 1);
    assert_eq!(stats.providers["primary"].successes, 0);
    assert_eq!(stats.providers["backup"].successes, 1);
    assert_eq!(stats.providers["backup"].failures, 0);
    assert_eq!(stats.generation.completed, 1);

    engine.stop().await;
}

#[tokio::test]
async fn test_single_worker_serves_highest_priority_first() {
    let mut config = config();
    config.scheduler.workers = 1;
    let provider = Arc::new(MockProvider::new("alpha").with_latency(Duration::from_millis(100)));
    let engine = engine_with(config, vec![provider]).await;
    let mut events = engine.subscribe();

    let blocker = engine.submit_request(RequestSpec::new("article", "blocker")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let low = engine
        .submit_request(RequestSpec::new("article", "low").with_priority(Priority::Low))
        .await
        .unwrap();
    let urgent = engine
        .submit_request(RequestSpec::new("article", "urgent").with_priority(Priority::Urgent))
        .await
        .unwrap();
    let normal = engine
        .submit_request(RequestSpec::new("article", "normal").with_priority(Priority::Normal))
        .await
        .unwrap();

    let mut order = Vec::new();
    while order.len() < 4 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event before timeout")
            .unwrap();
        if let ProgressEvent::RequestFinished { request_id, status, .. } = event {
            assert_eq!(status, RequestStatus::Completed);
            order.push(request_id);
        }
    }
    assert_eq!(order, vec![blocker, urgent, normal, low]);

    engine.stop().await;
}

#[tokio::test]
async fn test_cancel_running_batch() {
    let provider = Arc::new(MockProvider::new("alpha").with_latency(Duration::from_millis(50)));
    let engine = engine_with(config(), vec![provider.clone()]).await;

    let id = engine.submit_batch(BatchSpec::new("slow", requests(6))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(engine.cancel_batch(&id).await);
    assert!(!engine.cancel_batch(&id).await);

    let snapshot = wait_job(&engine, &id).await;
    assert_eq!(snapshot.status, JobStatus::Cancelled);

    // Let the in-flight item unwind, then check nothing else ran.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let snapshot = engine.batch_status(&id).await.unwrap();
    assert!(snapshot.completed + snapshot.failed <= snapshot.total);
    assert!(snapshot.completed < 6);
    let calls = provider.calls();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(provider.calls(), calls);
    assert_eq!(engine.statistics().await.jobs.running, 0);

    engine.stop().await;
}

#[tokio::test]
async fn test_pause_and_resume_sequential_batch() {
    let provider = Arc::new(MockProvider::new("alpha").with_latency(Duration::from_millis(40)));
    let engine = engine_with(config(), vec![provider.clone()]).await;

    let id = engine.submit_batch(BatchSpec::new("pausable", requests(4))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(engine.pause_batch(&id).await);
    assert!(!engine.pause_batch(&id).await);
    assert_eq!(engine.batch_status(&id).await.unwrap().status, JobStatus::Paused);

    // The in-flight item finishes, then nothing more starts.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let calls = provider.calls();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(provider.calls(), calls);
    assert!(calls < 4);

    assert!(engine.resume_batch(&id).await);
    let snapshot = wait_job(&engine, &id).await;
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.completed, 4);

    engine.stop().await;
}

#[tokio::test]
async fn test_event_stream_reports_job_lifecycle() {
    let engine = engine_with(config(), vec![Arc::new(MockProvider::new("alpha"))]).await;
    let mut events = engine.subscribe();

    let id = engine.submit_batch(BatchSpec::new("events", requests(2))).await.unwrap();
    let mut statuses = Vec::new();
    let mut saw_submitted = false;
    let mut last_progress = 0.0;
    while !statuses.contains(&JobStatus::Completed) {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event before timeout")
            .unwrap();
        match event {
            ProgressEvent::JobSubmitted { job_id, total } if job_id == id => {
                assert_eq!(total, 2);
                saw_submitted = true;
            }
            ProgressEvent::JobStatusChanged { job_id, status } if job_id == id => statuses.push(status),
            ProgressEvent::Progress { job_id, percent, .. } if job_id == id => last_progress = percent,
            _ => {}
        }
    }
    assert!(saw_submitted);
    assert_eq!(statuses, vec![JobStatus::Running, JobStatus::Completed]);
    assert!((last_progress - 100.0).abs() < f64::EPSILON);

    let progress = engine.progress(&id).await.unwrap();
    assert!(progress.finished);
    assert_eq!(progress.remaining, 0);

    engine.stop().await;
}

#[tokio::test]
async fn test_queue_full_rejects_submission() {
    let mut config = config();
    config.scheduler.workers = 1;
    config.scheduler.queue_capacity = 2;
    let provider = Arc::new(MockProvider::new("alpha").with_latency(Duration::from_millis(200)));
    let engine = engine_with(config, vec![provider]).await;

    engine.submit_request(RequestSpec::new("article", "running")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    engine.submit_request(RequestSpec::new("article", "queued 1")).await.unwrap();
    engine.submit_request(RequestSpec::new("article", "queued 2")).await.unwrap();
    let err = engine.submit_request(RequestSpec::new("article", "overflow")).await.unwrap_err();
    assert!(err.is_capacity());

    engine.stop().await;
}

#[tokio::test]
async fn test_adaptive_batch_stays_within_effective_concurrency() {
    let provider = Arc::new(MockProvider::new("alpha").with_latency(Duration::from_millis(30)));
    let engine = ContentEngine::builder(config())
        .provider(provider.clone())
        .load_probe(busy_load())
        .build()
        .unwrap();
    assert!(engine.start().await);

    let id = engine
        .submit_batch(
            BatchSpec::new("adaptive", requests(12))
                .with_mode(ProcessingMode::Adaptive)
                .with_max_concurrent(6),
        )
        .await
        .unwrap();
    let snapshot = wait_job(&engine, &id).await;

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.completed, 12);
    // Memory above 70% halves the base concurrency.
    assert_eq!(snapshot.effective_concurrency, Some(3));
    assert!(provider.max_in_flight() <= 3, "high-water mark {}", provider.max_in_flight());
    assert!(provider.max_in_flight() >= 2);

    engine.stop().await;
}

async fn assert_stop_on_error_aborts(mode: ProcessingMode) {
    let provider = Arc::new(
        MockProvider::new("alpha").with_latency(Duration::from_millis(20)).failing_on("topic 1"),
    );
    let engine = engine_with(config(), vec![provider.clone()]).await;

    let id = engine
        .submit_batch(
            BatchSpec::new("stopping", requests(10))
                .with_mode(mode)
                .with_max_concurrent(2)
                .with_stop_on_error(true),
        )
        .await
        .unwrap();
    let snapshot = wait_job(&engine, &id).await;

    assert_eq!(snapshot.status, JobStatus::Failed, "{mode} job");
    assert!(snapshot.failed >= 1);
    assert!(snapshot.completed + snapshot.failed < snapshot.total);
    assert!(provider.calls() < 10, "{mode} job made {} calls", provider.calls());
    assert!(snapshot.errors.iter().any(|e| e.index.is_none()));

    // Items skipped by the abort are left cancelled, never failed.
    let results = engine.batch_results(&id).await.unwrap();
    let skipped = results.iter().filter(|r| r.status == RequestStatus::Cancelled).count();
    assert!(skipped > 0);
    assert_eq!(results.iter().filter(|r| r.status == RequestStatus::Failed).count(), snapshot.failed);

    engine.stop().await;
}

#[tokio::test]
async fn test_stop_on_error_aborts_concurrent_batch() {
    assert_stop_on_error_aborts(ProcessingMode::Concurrent).await;
}

#[tokio::test]
async fn test_stop_on_error_aborts_adaptive_batch() {
    assert_stop_on_error_aborts(ProcessingMode::Adaptive).await;
}

#[tokio::test]
async fn test_provider_panic_fails_batch_and_worker_recovers() {
    let provider = Arc::new(MockProvider::new("alpha").panicking_on("topic 2"));
    let engine = engine_with(config(), vec![provider.clone()]).await;

    let id = engine.submit_batch(BatchSpec::new("crashing", requests(5))).await.unwrap();
    let snapshot = wait_job(&engine, &id).await;
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.completed, 2);
    assert_eq!(snapshot.failed, 1);
    assert!(snapshot.errors.iter().any(|e| e.message.contains("panicked")));

    let id = engine.submit_batch(BatchSpec::new("after", requests(2))).await.unwrap();
    assert_eq!(wait_job(&engine, &id).await.status, JobStatus::Completed);

    let request_id = engine.submit_request(RequestSpec::new("article", "topic 2")).await.unwrap();
    let request = loop {
        if let Some(request) = engine.request_result(&request_id).await.unwrap() {
            break request;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(request.status, RequestStatus::Failed);

    engine.stop().await;
}
