//! Graceful stop scenario.
//!
//! With two cron definitions mid-run, `stop()` must return only after
//! both executions reach a terminal state, and no execution may start
//! afterwards.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::{tracked_job, wait_until, RunLog};
use tempo_scheduler::{Schedule, Scheduler};

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_joins_running_executions() {
    let scheduler = Scheduler::new();
    let log_a = RunLog::new();
    let log_b = RunLog::new();

    // Long sleeps that honor cancellation, so stop() resolves quickly.
    scheduler.add(Arc::new(
        tracked_job("a", "Job A", log_a.clone(), Duration::from_secs(5))
            .with_schedule(Schedule::cron("*/1 * * * * *")),
    ));
    scheduler.add(Arc::new(
        tracked_job("b", "Job B", log_b.clone(), Duration::from_secs(5))
            .with_schedule(Schedule::cron("*/1 * * * * *")),
    ));

    scheduler.start_with(Duration::from_millis(30)).await;
    assert!(
        wait_until(Duration::from_secs(3), || {
            log_a.start_count() >= 1 && log_b.start_count() >= 1
        })
        .await,
        "both definitions should be mid-run before stop"
    );

    scheduler.stop().await;
    assert!(!scheduler.is_running());

    // Stop returned, so every execution must carry a finish time.
    for id in ["a", "b"] {
        for execution in scheduler.executions(id) {
            assert!(
                execution.finish_time().is_some(),
                "stop must wait for execution {} of {id}",
                execution.id()
            );
        }
    }
    assert_eq!(log_a.finish_count(), log_a.start_count());
    assert_eq!(log_b.finish_count(), log_b.start_count());

    // No new executions after stop.
    let before_a = log_a.start_count();
    let before_b = log_b.start_count();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(log_a.start_count(), before_a);
    assert_eq!(log_b.start_count(), before_b);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_runs_finish_with_cancellation_error() {
    let scheduler = Scheduler::new();
    let log = RunLog::new();

    scheduler.add(Arc::new(
        tracked_job("c", "Job C", log.clone(), Duration::from_secs(5))
            .with_schedule(Schedule::cron("*/1 * * * * *")),
    ));

    scheduler.start_with(Duration::from_millis(30)).await;
    assert!(wait_until(Duration::from_secs(3), || log.start_count() >= 1).await);
    scheduler.stop().await;

    let executions = scheduler.executions("c");
    assert!(!executions.is_empty());
    for execution in executions {
        assert_eq!(execution.success(), Some(false));
        assert_eq!(execution.error(), Some(tempo_scheduler::JobError::Cancelled));
    }
}
