/// Integration tests for the recovery coordinator
///
/// Drives whole recoveries through the public API under paused time

mod common;

use common::fast_policy;
use common::flaky::FlakyOperation;
use common::sinks::OfflineSink;
use course_resilience::error::RecoveryCallbacks;
use course_resilience::{AppError, ErrorKind, MemorySink, RecoveryCoordinator, ResilienceConfig};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_network_failures_recover_on_third_attempt() {
    let sink = Arc::new(MemorySink::default());
    let coordinator = RecoveryCoordinator::new(sink.clone());
    let flaky = FlakyOperation::new(2);
    let retries = Arc::new(Mutex::new(Vec::new()));
    let retries_clone = Arc::clone(&retries);

    let start = Instant::now();
    let result = coordinator
        .execute(
            "load-lessons",
            flaky.operation(),
            fast_policy().with_backoff_factor(2.0),
            RecoveryCallbacks::default().on_retry(move |attempt| retries_clone.lock().push(attempt)),
        )
        .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(*retries.lock(), vec![1, 2]);
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert!(coordinator.get_state("load-lessons").is_none());
    assert!(sink.reports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_between_attempts_stops_recovery() {
    let coordinator = RecoveryCoordinator::new(Arc::new(MemorySink::default()));
    let flaky = FlakyOperation::new(5);

    let task = {
        let coordinator = coordinator.clone();
        let operation = flaky.operation();
        tokio::spawn(async move {
            coordinator
                .execute("submit-quiz", operation, fast_policy(), RecoveryCallbacks::default())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(flaky.calls(), 1);
    coordinator.cancel("submit-quiz");

    let result = task.await.unwrap();
    assert!(matches!(result, Err(AppError::RecoveryCancelled { key }) if key == "submit-quiz"));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(flaky.calls(), 1);
    assert!(coordinator.active_keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_terminal_failure_then_manual_retry() {
    let sink = Arc::new(MemorySink::default());
    let coordinator = RecoveryCoordinator::new(sink.clone());
    let flaky = FlakyOperation::new(3);

    let result = coordinator
        .execute("catalog", flaky.operation(), fast_policy(), RecoveryCallbacks::default())
        .await;
    assert!(matches!(result, Err(AppError::Network(_))));
    assert_eq!(flaky.calls(), 3);

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    let classification = reports[0].classification.as_ref().unwrap();
    assert_eq!(classification.kind, ErrorKind::Network);
    assert_eq!(reports[0].context.operation, "recovery");
    assert_eq!(reports[0].context.metadata["attempts"], 3);

    let value = coordinator.retry("catalog").await.unwrap();
    assert_eq!(*value.downcast::<u32>().unwrap(), 4);
    assert_eq!(sink.reports().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_sink_never_masks_the_failure() {
    let sink = Arc::new(OfflineSink::default());
    let coordinator = RecoveryCoordinator::new(sink.clone());
    let flaky = FlakyOperation::with_error(u32::MAX, |_| AppError::http(404, "course archived"));

    let result = coordinator
        .execute("archive", flaky.operation(), fast_policy(), RecoveryCallbacks::default())
        .await;

    assert!(matches!(result, Err(AppError::Http { status: 404, .. })));
    assert_eq!(flaky.calls(), 1);
    assert_eq!(sink.attempted(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_independent_keys_recover_concurrently() {
    let coordinator = RecoveryCoordinator::new(Arc::new(MemorySink::default()));
    let lessons = FlakyOperation::new(1);
    let grades = FlakyOperation::new(2);

    let start = Instant::now();
    let (a, b) = tokio::join!(
        coordinator.execute("lessons", lessons.operation(), fast_policy(), RecoveryCallbacks::default()),
        coordinator.execute("grades", grades.operation(), fast_policy(), RecoveryCallbacks::default()),
    );

    assert_eq!(a.unwrap(), 2);
    assert_eq!(b.unwrap(), 3);
    // Delays overlap: 100ms + 200ms, not 100ms + 100ms + 200ms
    assert!(start.elapsed() < Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn test_policy_loaded_from_config_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[retry]\nmax_attempts = 5\ninitial_delay_ms = 10\nmax_delay_ms = 40").unwrap();
    file.flush().unwrap();

    let config = ResilienceConfig::load(Some(file.path())).unwrap();
    let coordinator =
        RecoveryCoordinator::with_policy(Arc::new(MemorySink::default()), config.retry.clone());
    let flaky = FlakyOperation::new(4);

    let start = Instant::now();
    let result = coordinator.execute_default("profile", flaky.operation()).await;

    assert_eq!(result.unwrap(), 5);
    // 10 + 20 + 40 + 40 (capped)
    assert!(start.elapsed() >= Duration::from_millis(110));
}
