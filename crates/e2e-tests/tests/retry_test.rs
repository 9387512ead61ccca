//! Retry-policy scenario.
//!
//! A runner that fails its first two attempts under a three-attempt
//! policy must produce a single successful execution with one start
//! event and one completion event.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::wait_until;
use tempo_scheduler::{ActionJob, FixedBackoff, JobError, JobExecution, Schedule, Scheduler};

/// Keep completed executions alive across retirement: the roster purge
/// drops its references, the handler's clones stay valid.
fn capture_completions(scheduler: &Scheduler) -> Arc<Mutex<Vec<Arc<JobExecution>>>> {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let captured_in = captured.clone();
    scheduler.on_job_completed(move |execution| {
        captured_in.lock().unwrap().push(execution.clone());
    });
    captured
}

#[tokio::test(flavor = "multi_thread")]
async fn test_third_attempt_succeeds_in_one_execution() {
    let scheduler = Scheduler::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let started_events = Arc::new(AtomicUsize::new(0));
    let completed = capture_completions(&scheduler);

    let started_in = started_events.clone();
    scheduler.on_job_started(move |_| {
        started_in.fetch_add(1, Ordering::SeqCst);
    });

    let attempts_in = attempts.clone();
    scheduler.add(Arc::new(
        ActionJob::new("d5", "Flaky", move |_, _, _| {
            let attempts = attempts_in.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(JobError::failed("transient"))
                } else {
                    Ok(())
                }
            }
        })
        .with_schedule(Schedule::once())
        .with_retry_policy(Arc::new(FixedBackoff::new(3))),
    ));

    scheduler.start_with(Duration::from_millis(20)).await;
    assert!(wait_until(Duration::from_secs(2), || completed.lock().unwrap().len() == 1).await);
    scheduler.stop().await;

    // All three attempts happen inside one JobExecution.
    let completed = completed.lock().unwrap();
    assert_eq!(completed.len(), 1);
    let execution = &completed[0];
    assert_eq!(execution.success(), Some(true));
    assert_eq!(execution.error(), None);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(started_events.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exhausted_retries_surface_the_terminal_failure() {
    let scheduler = Scheduler::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let completed = capture_completions(&scheduler);

    let attempts_in = attempts.clone();
    scheduler.add(Arc::new(
        ActionJob::new("d5x", "Hopeless", move |_, _, _| {
            let attempts = attempts_in.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(JobError::failed("still broken"))
            }
        })
        .with_schedule(Schedule::once())
        .with_retry_policy(Arc::new(FixedBackoff::new(3))),
    ));

    scheduler.start_with(Duration::from_millis(20)).await;
    assert!(wait_until(Duration::from_secs(2), || completed.lock().unwrap().len() == 1).await);
    scheduler.stop().await;

    let completed = completed.lock().unwrap();
    let execution = &completed[0];
    assert_eq!(execution.success(), Some(false));
    assert_eq!(execution.error(), Some(JobError::failed("still broken")));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
