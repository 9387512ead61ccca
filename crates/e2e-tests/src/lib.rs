//! End-to-end test infrastructure for tempo-scheduler.
//!
//! Provides instrumented job definitions and a notifier probe shared by
//! the scenario tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use tempo_scheduler::{ActionJob, JobDefinition, JobExecution, Schedule, SchedulerNotifier};

/// Records the start and finish instants of every run of one job, plus
/// the highest number of concurrently running bodies observed.
#[derive(Default)]
pub struct RunLog {
    starts: Mutex<Vec<DateTime<Utc>>>,
    finishes: Mutex<Vec<DateTime<Utc>>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RunLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark a body as entered; returns after updating the concurrency
    /// high-water mark.
    pub fn enter(&self) {
        self.starts.lock().unwrap().push(Utc::now());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
    }

    /// Mark a body as exited.
    pub fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.finishes.lock().unwrap().push(Utc::now());
    }

    pub fn start_count(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    pub fn finish_count(&self) -> usize {
        self.finishes.lock().unwrap().len()
    }

    pub fn start_times(&self) -> Vec<DateTime<Utc>> {
        self.starts.lock().unwrap().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

/// Build a job whose body records itself in `log` and sleeps for
/// `work`, finishing early with a cancellation error when the token
/// fires first. Returned unwrapped so callers can chain a schedule or
/// retry policy before adding it.
pub fn tracked_job(id: &str, name: &str, log: Arc<RunLog>, work: Duration) -> ActionJob {
    ActionJob::new(id, name, move |_execution, _services, cancel| {
        let log = log.clone();
        async move {
            log.enter();
            let result = tokio::select! {
                _ = tokio::time::sleep(work) => Ok(()),
                _ = cancel.cancelled() => Err(tempo_scheduler::JobError::Cancelled),
            };
            log.exit();
            result
        }
    })
}

/// Counts notifier hook invocations.
#[derive(Default)]
pub struct NotifierProbe {
    pub added: AtomicUsize,
    pub removed: AtomicUsize,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub jobs_started: AtomicUsize,
    pub jobs_completed: AtomicUsize,
}

impl NotifierProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl SchedulerNotifier for NotifierProbe {
    fn definition_added(&self, _definition: &Arc<dyn JobDefinition>) {
        self.added.fetch_add(1, Ordering::SeqCst);
    }

    fn definition_removed(&self, _definition: &Arc<dyn JobDefinition>) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }

    fn scheduler_started(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn scheduler_stopped(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }

    fn job_started(&self, _execution: &Arc<JobExecution>) {
        self.jobs_started.fetch_add(1, Ordering::SeqCst);
    }

    fn job_completed(&self, _execution: &Arc<JobExecution>) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A one-shot schedule due `delay` from now.
pub fn due_in(delay: Duration) -> Schedule {
    Schedule::at(Utc::now() + chrono::Duration::from_std(delay).unwrap())
}

/// Poll `check` every few milliseconds until it holds or `deadline`
/// elapses; returns the final outcome.
pub async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
