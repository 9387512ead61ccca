//! The scheduler: registry owner and dispatch loop.
//!
//! Owns the definition registry, polls it on a fixed cadence, launches
//! each due definition as an independent execution task, arbitrates
//! overlap and forced starts, and retires exhausted one-shots.
//!
//! Locking discipline: the definition registry sits behind a single
//! mutex and is only read via snapshots; the execution roster and the
//! force-start set are internally synchronized and the dispatch tick is
//! the roster's sole writer. Locks are never held across await points.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::definition::JobDefinition;
use crate::error::JobError;
use crate::execution::JobExecution;
use crate::notifier::{guard_sink, JobEventHandler, SchedulerNotifier};
use crate::services::ServiceProvider;

/// Point-in-time view of one definition, for observability surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    /// Definition id.
    pub job_id: String,
    /// Definition name.
    pub name: String,
    /// Raw cron expression, when the definition has one.
    pub cron_expr: Option<String>,
    /// Next scheduled run, `None` when exhausted or schedule-less.
    pub next_run: Option<DateTime<Utc>>,
    /// Start of the most recent run.
    pub last_run: Option<DateTime<Utc>>,
    /// Whether an execution is currently running.
    pub is_running: bool,
    /// Executions started so far.
    pub run_count: usize,
    /// Executions that finished with an error.
    pub error_count: usize,
}

/// Builder for a [`Scheduler`].
#[derive(Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    clock: Option<Arc<dyn Clock>>,
    services: Option<Arc<dyn ServiceProvider>>,
    notifier: Option<Arc<dyn SchedulerNotifier>>,
}

impl SchedulerBuilder {
    /// Use the given configuration instead of the defaults.
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `clock` as the time source (tests inject a manual clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Provide user services; each execution gets its own scope.
    pub fn services(mut self, services: Arc<dyn ServiceProvider>) -> Self {
        self.services = Some(services);
        self
    }

    /// Attach a lifecycle event sink.
    pub fn notifier(mut self, notifier: Arc<dyn SchedulerNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Build the scheduler. It is not started; call `start()`.
    pub fn build(self) -> Scheduler {
        Scheduler {
            inner: Arc::new(Inner {
                config: self.config,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                services: self.services,
                notifier: self.notifier,
                definitions: Mutex::new(Vec::new()),
                executions: RwLock::new(Vec::new()),
                force_start: Mutex::new(HashSet::new()),
                started_handlers: RwLock::new(Vec::new()),
                completed_handlers: RwLock::new(Vec::new()),
                is_running: AtomicBool::new(false),
                runtime: Mutex::new(None),
            }),
        }
    }
}

/// In-process job scheduler.
///
/// Cheaply cloneable; every clone shares the same registry and dispatch
/// loop. All registry operations are infallible: unknown ids and
/// repeated `start`/`stop` calls are silent no-ops.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct DispatchRuntime {
    root: CancellationToken,
    tracker: TaskTracker,
    dispatch: JoinHandle<()>,
}

struct Inner {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    services: Option<Arc<dyn ServiceProvider>>,
    notifier: Option<Arc<dyn SchedulerNotifier>>,
    definitions: Mutex<Vec<Arc<dyn JobDefinition>>>,
    executions: RwLock<Vec<Arc<JobExecution>>>,
    force_start: Mutex<HashSet<String>>,
    started_handlers: RwLock<Vec<JobEventHandler>>,
    completed_handlers: RwLock<Vec<JobEventHandler>>,
    is_running: AtomicBool,
    runtime: Mutex<Option<DispatchRuntime>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// A scheduler with default configuration and the system clock.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a scheduler.
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    /// Append a definition to the registry.
    pub fn add(&self, definition: Arc<dyn JobDefinition>) {
        info!(
            job_id = %definition.id(),
            name = %definition.name(),
            "Registered job definition"
        );
        self.inner.definitions.lock().unwrap().push(definition.clone());
        if let Some(notifier) = &self.inner.notifier {
            guard_sink("definition_added", || notifier.definition_added(&definition));
        }
    }

    /// Append several definitions, preserving iteration order.
    pub fn add_many(&self, definitions: impl IntoIterator<Item = Arc<dyn JobDefinition>>) {
        for definition in definitions {
            self.add(definition);
        }
    }

    /// Remove a definition by id. No-op when the id is unknown. The
    /// definition's executions are purged from the roster.
    pub fn remove(&self, id: &str) {
        let removed: Vec<Arc<dyn JobDefinition>> = {
            let mut definitions = self.inner.definitions.lock().unwrap();
            let mut removed = Vec::new();
            definitions.retain(|definition| {
                if definition.id() == id {
                    removed.push(definition.clone());
                    false
                } else {
                    true
                }
            });
            removed
        };
        for definition in removed {
            self.inner.purge_executions(definition.id());
            info!(job_id = %definition.id(), "Removed job definition");
            if let Some(notifier) = &self.inner.notifier {
                guard_sink("definition_removed", || {
                    notifier.definition_removed(&definition)
                });
            }
        }
    }

    /// Remove several definitions by id.
    pub fn remove_many<S: AsRef<str>>(&self, ids: impl IntoIterator<Item = S>) {
        for id in ids {
            self.remove(id.as_ref());
        }
    }

    /// Snapshot of the whole registry, in insertion order.
    pub fn get_all(&self) -> Vec<Arc<dyn JobDefinition>> {
        self.inner.definitions.lock().unwrap().clone()
    }

    /// Look up a definition by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn JobDefinition>> {
        self.inner
            .definitions
            .lock()
            .unwrap()
            .iter()
            .find(|definition| definition.id() == id)
            .cloned()
    }

    /// Snapshot of the definitions matching `predicate`.
    pub fn get_matching(
        &self,
        predicate: impl Fn(&Arc<dyn JobDefinition>) -> bool,
    ) -> Vec<Arc<dyn JobDefinition>> {
        self.inner
            .definitions
            .lock()
            .unwrap()
            .iter()
            .filter(|definition| predicate(definition))
            .cloned()
            .collect()
    }

    /// Executions of a definition, newest start time first.
    pub fn executions(&self, definition_id: &str) -> Vec<Arc<JobExecution>> {
        self.executions_matching(definition_id, |_| true)
    }

    /// Executions of a definition matching `predicate`, newest first.
    pub fn executions_matching(
        &self,
        definition_id: &str,
        predicate: impl Fn(&Arc<JobExecution>) -> bool,
    ) -> Vec<Arc<JobExecution>> {
        let mut executions: Vec<Arc<JobExecution>> = self
            .inner
            .executions
            .read()
            .unwrap()
            .iter()
            .filter(|execution| execution.definition_id() == definition_id)
            .filter(|execution| predicate(execution))
            .cloned()
            .collect();
        executions.sort_by_key(|execution| std::cmp::Reverse(execution.start_time()));
        executions
    }

    /// Flag a definition for one immediate dispatch on the next tick,
    /// bypassing its schedule and overlap check. Unknown ids are
    /// silently ignored; flagging twice is the same as flagging once.
    pub fn force_start(&self, id: &str) {
        let known = self
            .inner
            .definitions
            .lock()
            .unwrap()
            .iter()
            .any(|definition| definition.id() == id);
        if !known {
            debug!(job_id = %id, "Force start for unknown definition; ignoring");
            return;
        }
        self.inner.force_start.lock().unwrap().insert(id.to_string());
    }

    /// Register a synchronous handler fired when an execution starts,
    /// before its user code runs.
    pub fn on_job_started(&self, handler: impl Fn(&Arc<JobExecution>) + Send + Sync + 'static) {
        self.inner
            .started_handlers
            .write()
            .unwrap()
            .push(Arc::new(handler));
    }

    /// Register a synchronous handler fired when an execution finishes.
    pub fn on_job_completed(&self, handler: impl Fn(&Arc<JobExecution>) + Send + Sync + 'static) {
        self.inner
            .completed_handlers
            .write()
            .unwrap()
            .push(Arc::new(handler));
    }

    /// Whether the dispatch loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.is_running.load(Ordering::SeqCst)
    }

    /// Start dispatching with the configured poll frequency.
    /// No-op when already running.
    pub async fn start(&self) {
        self.start_with(self.inner.config.poll_frequency()).await;
    }

    /// Start dispatching, polling every `poll_frequency`.
    /// No-op when already running.
    pub async fn start_with(&self, poll_frequency: Duration) {
        if self.inner.is_running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already running; start ignored");
            return;
        }

        let root = CancellationToken::new();
        let tracker = TaskTracker::new();
        let inner = self.inner.clone();
        let loop_root = root.clone();
        let loop_tracker = tracker.clone();
        let dispatch = tokio::spawn(async move {
            dispatch_loop(inner, loop_root, loop_tracker, poll_frequency).await;
        });

        *self.inner.runtime.lock().unwrap() = Some(DispatchRuntime {
            root,
            tracker,
            dispatch,
        });

        info!(poll_ms = poll_frequency.as_millis() as u64, "Scheduler started");
        if let Some(notifier) = &self.inner.notifier {
            guard_sink("scheduler_started", || notifier.scheduler_started());
        }
    }

    /// Cancel the root token, then wait for the dispatch loop and every
    /// running execution to finish. Executions that ignore cancellation
    /// delay this call for as long as they run. No-op when not running.
    pub async fn stop(&self) {
        if !self.inner.is_running.load(Ordering::SeqCst) {
            debug!("Scheduler not running; stop ignored");
            return;
        }
        let Some(runtime) = self.inner.runtime.lock().unwrap().take() else {
            return;
        };

        info!("Stopping scheduler");
        runtime.root.cancel();
        let _ = runtime.dispatch.await;
        runtime.tracker.close();
        runtime.tracker.wait().await;

        self.inner.is_running.store(false, Ordering::SeqCst);
        info!("Scheduler stopped");
        if let Some(notifier) = &self.inner.notifier {
            guard_sink("scheduler_stopped", || notifier.scheduler_stopped());
        }
    }

    /// Status snapshot for one definition.
    pub fn status(&self, id: &str) -> Option<JobStatus> {
        self.get(id).map(|definition| self.inner.status_of(&definition))
    }

    /// Status snapshots for the whole registry, in insertion order.
    pub fn statuses(&self) -> Vec<JobStatus> {
        self.get_all()
            .iter()
            .map(|definition| self.inner.status_of(definition))
            .collect()
    }
}

async fn dispatch_loop(
    inner: Arc<Inner>,
    root: CancellationToken,
    tracker: TaskTracker,
    poll_frequency: Duration,
) {
    debug!(poll_ms = poll_frequency.as_millis() as u64, "Dispatch loop running");
    loop {
        tokio::select! {
            _ = root.cancelled() => break,
            _ = tokio::time::sleep(poll_frequency) => {}
        }
        Inner::tick(&inner, &root, &tracker);
    }
    debug!("Dispatch loop exited");
}

impl Inner {
    fn tick(inner: &Arc<Inner>, root: &CancellationToken, tracker: &TaskTracker) {
        // Drain the force set once per tick; eligibility reads the
        // drained snapshot instead of mutating shared state mid-check.
        let forced: HashSet<String> = {
            let mut force_start = inner.force_start.lock().unwrap();
            std::mem::take(&mut *force_start)
        };

        // Snapshot the registry, then evaluate eligibility with the
        // definition mutex released: the roster and force set are
        // internally synchronized and this tick is the roster's only
        // writer.
        let definitions: Vec<Arc<dyn JobDefinition>> =
            inner.definitions.lock().unwrap().clone();

        let now = inner.clock.now();
        for definition in definitions {
            if inner.can_run(&definition, &forced, now) {
                Inner::launch(inner, definition, root, tracker);
            }
        }

        inner.retire_expired();
    }

    fn can_run(
        &self,
        definition: &Arc<dyn JobDefinition>,
        forced: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if forced.contains(definition.id()) {
            return true;
        }
        if !definition.executions_can_overlap() && self.has_running_execution(definition.id()) {
            debug!(
                job_id = %definition.id(),
                "Previous execution still running; dropping due instant"
            );
            return false;
        }
        match definition.schedule() {
            Some(schedule) => schedule.next_run_time().is_some_and(|next| now >= next),
            // No schedule at all: an implicit one-shot, due until its
            // single run exists.
            None => !self.has_any_execution(definition.id()),
        }
    }

    fn launch(
        inner: &Arc<Inner>,
        definition: Arc<dyn JobDefinition>,
        root: &CancellationToken,
        tracker: &TaskTracker,
    ) {
        let start = inner.clock.now();
        let cancel = root.child_token();
        // Cadence anchors to run start, not finish.
        if let Some(schedule) = definition.schedule() {
            schedule.set_last_run_time(Some(start));
        }

        let execution = Arc::new(JobExecution::new(definition.clone(), start, cancel));
        inner.executions.write().unwrap().push(execution.clone());
        info!(
            job_id = %definition.id(),
            execution_id = %execution.id(),
            "Launching job execution"
        );
        inner.emit_job_started(&execution);

        tracker.spawn(run_execution(inner.clone(), execution));
    }

    fn retire_expired(&self) {
        // Expiry reads the roster, so it is evaluated on a registry
        // snapshot with the definition mutex released; the lock is
        // retaken only to drop the expired entries. The snapshot is
        // bound first so the guard temporary is gone before the filter
        // runs.
        let snapshot: Vec<Arc<dyn JobDefinition>> = self.definitions.lock().unwrap().clone();
        let expired: Vec<Arc<dyn JobDefinition>> = snapshot
            .into_iter()
            .filter(|definition| self.is_expired(definition))
            .collect();
        if expired.is_empty() {
            return;
        }

        let retired: Vec<Arc<dyn JobDefinition>> = {
            let expired_ids: HashSet<&str> =
                expired.iter().map(|definition| definition.id()).collect();
            let mut definitions = self.definitions.lock().unwrap();
            let mut retired = Vec::new();
            definitions.retain(|definition| {
                if expired_ids.contains(definition.id()) {
                    retired.push(definition.clone());
                    false
                } else {
                    true
                }
            });
            retired
        };
        for definition in retired {
            self.purge_executions(definition.id());
            info!(job_id = %definition.id(), "Retired exhausted job definition");
            if let Some(notifier) = &self.notifier {
                guard_sink("definition_removed", || {
                    notifier.definition_removed(&definition)
                });
            }
        }
    }

    // Cron-driven definitions never expire; one-shots expire once their
    // single run is gone and nothing is still running.
    fn is_expired(&self, definition: &Arc<dyn JobDefinition>) -> bool {
        if self.has_running_execution(definition.id()) {
            return false;
        }
        match definition.schedule() {
            Some(schedule) if schedule.has_cron() => false,
            Some(schedule) => schedule.next_run_time().is_none(),
            None => self.has_any_execution(definition.id()),
        }
    }

    fn has_running_execution(&self, definition_id: &str) -> bool {
        self.executions
            .read()
            .unwrap()
            .iter()
            .any(|execution| execution.definition_id() == definition_id && execution.running())
    }

    fn has_any_execution(&self, definition_id: &str) -> bool {
        self.executions
            .read()
            .unwrap()
            .iter()
            .any(|execution| execution.definition_id() == definition_id)
    }

    fn purge_executions(&self, definition_id: &str) {
        self.executions
            .write()
            .unwrap()
            .retain(|execution| execution.definition_id() != definition_id);
    }

    fn status_of(&self, definition: &Arc<dyn JobDefinition>) -> JobStatus {
        let executions = self.executions.read().unwrap();
        let mut run_count = 0;
        let mut error_count = 0;
        let mut is_running = false;
        for execution in executions
            .iter()
            .filter(|execution| execution.definition_id() == definition.id())
        {
            run_count += 1;
            if execution.running() {
                is_running = true;
            } else if execution.error().is_some() {
                error_count += 1;
            }
        }
        JobStatus {
            job_id: definition.id().to_string(),
            name: definition.name().to_string(),
            cron_expr: definition
                .schedule()
                .and_then(|schedule| schedule.cron_expression().map(str::to_string)),
            next_run: definition.schedule().and_then(|schedule| schedule.next_run_time()),
            last_run: definition.schedule().and_then(|schedule| schedule.last_run_time()),
            is_running,
            run_count,
            error_count,
        }
    }

    fn emit_job_started(&self, execution: &Arc<JobExecution>) {
        let handlers: Vec<JobEventHandler> = self.started_handlers.read().unwrap().clone();
        for handler in handlers {
            guard_sink("on_job_started", || handler(execution));
        }
        if let Some(notifier) = &self.notifier {
            guard_sink("job_started", || notifier.job_started(execution));
        }
    }

    fn emit_job_completed(&self, execution: &Arc<JobExecution>) {
        let handlers: Vec<JobEventHandler> = self.completed_handlers.read().unwrap().clone();
        for handler in handlers {
            guard_sink("on_job_completed", || handler(execution));
        }
        if let Some(notifier) = &self.notifier {
            guard_sink("job_completed", || notifier.job_completed(execution));
        }
    }
}

/// The asynchronous execution body: acquire a service scope, run the
/// definition under its retry policy, record the terminal state, emit
/// the completion event. Nothing thrown by user code escapes this task.
async fn run_execution(inner: Arc<Inner>, execution: Arc<JobExecution>) {
    let definition = execution.definition().clone();
    let cancel = execution.cancellation_token().clone();

    let body = {
        let execution = execution.clone();
        let inner = inner.clone();
        async move {
            let scope = match inner.services.as_ref() {
                Some(provider) => match provider.create_scope() {
                    Ok(scope) => Some(scope),
                    Err(err) => return Err(JobError::Service(err.to_string())),
                },
                None => None,
            };
            let services = scope.as_ref().map(|scope| scope.services());
            definition.execute(execution, services, cancel).await
            // `scope` drops here, releasing per-run resources on every
            // exit path.
        }
    };

    let result = AssertUnwindSafe(body)
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(JobError::failed("job panicked")));

    let finish = inner.clock.now();
    match &result {
        Ok(()) => debug!(
            execution_id = %execution.id(),
            job_id = %execution.definition_id(),
            "Job execution finished"
        ),
        Err(err) => error!(
            execution_id = %execution.id(),
            job_id = %execution.definition_id(),
            error = %err,
            "Job execution failed"
        ),
    }
    execution.finish(finish, result.err());
    inner.emit_job_completed(&execution);
}
