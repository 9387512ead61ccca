//! Job definitions.
//!
//! A [`JobDefinition`] is the registered description of work: identity,
//! schedule, overlap flag, retry policy, and an `execute` capability.
//! Two variants ship with the crate — [`ActionJob`] wraps an async
//! closure, [`TaskJob`] builds a fresh [`JobRunner`] per attempt — and
//! any user type implementing the trait is interchangeable with them.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;
use crate::execution::JobExecution;
use crate::retry::{run_with_policy, AttemptFuture, RetryContext, RetryPolicy};
use crate::schedule::Schedule;
use crate::services::ServiceProvider;

/// The registry record the scheduler dispatches.
///
/// All attributes are read-only once the definition is added; the
/// overlap flag is build-time configuration, not runtime state.
/// `execute` runs the user workload under the definition's retry policy
/// (or exactly once when no policy is set) and surfaces the terminal
/// failure unchanged.
#[async_trait]
pub trait JobDefinition: Send + Sync {
    /// Stable identifier, unique across the registry by convention.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// When this definition should run; `None` means an implicit
    /// one-shot that runs on the first dispatch tick.
    fn schedule(&self) -> Option<&Schedule>;

    /// Whether two executions of this definition may run concurrently.
    fn executions_can_overlap(&self) -> bool {
        false
    }

    /// The retry policy wrapped around each execution, if any.
    fn retry_policy(&self) -> Option<Arc<dyn RetryPolicy>> {
        None
    }

    /// Run one execution's workload to completion.
    async fn execute(
        &self,
        execution: Arc<JobExecution>,
        services: Option<Arc<dyn ServiceProvider>>,
        cancel: CancellationToken,
    ) -> Result<(), JobError>;
}

/// The callable an [`ActionJob`] invokes per attempt.
pub type JobAction = Arc<
    dyn Fn(
            Arc<JobExecution>,
            Option<Arc<dyn ServiceProvider>>,
            CancellationToken,
        ) -> BoxFuture<'static, Result<(), JobError>>
        + Send
        + Sync,
>;

/// A definition backed by an async closure.
pub struct ActionJob {
    id: String,
    name: String,
    schedule: Option<Schedule>,
    overlap: bool,
    retry: Option<Arc<dyn RetryPolicy>>,
    action: JobAction,
}

impl ActionJob {
    /// Wrap `action` as a job definition. The closure is invoked with
    /// the execution, the scoped services, and the cancellation token,
    /// once per retry attempt.
    pub fn new<F, Fut>(id: impl Into<String>, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(Arc<JobExecution>, Option<Arc<dyn ServiceProvider>>, CancellationToken) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            schedule: None,
            overlap: false,
            retry: None,
            action: Arc::new(move |execution, services, cancel| {
                Box::pin(action(execution, services, cancel))
            }),
        }
    }

    /// Attach a schedule.
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Attach a retry policy.
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Allow concurrent executions of this definition.
    pub fn allow_overlap(mut self) -> Self {
        self.overlap = true;
        self
    }
}

#[async_trait]
impl JobDefinition for ActionJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    fn executions_can_overlap(&self) -> bool {
        self.overlap
    }

    fn retry_policy(&self) -> Option<Arc<dyn RetryPolicy>> {
        self.retry.clone()
    }

    async fn execute(
        &self,
        execution: Arc<JobExecution>,
        services: Option<Arc<dyn ServiceProvider>>,
        cancel: CancellationToken,
    ) -> Result<(), JobError> {
        let ctx = RetryContext::new(execution.clone());
        let action = self.action.clone();
        let attempt = move || -> AttemptFuture {
            let action = action.clone();
            let execution = execution.clone();
            let services = services.clone();
            let cancel = cancel.clone();
            Box::pin(async move {
                if cancel.is_cancelled() {
                    return Err(JobError::Cancelled);
                }
                action(execution, services, cancel).await
            })
        };
        run_with_policy(self.retry.clone(), ctx, &attempt).await
    }
}

/// A disposable runner built fresh for every attempt of a [`TaskJob`].
///
/// Dropping the runner releases whatever it acquired, on success,
/// failure, and cancellation alike.
#[async_trait]
pub trait JobRunner: Send {
    async fn run(
        &mut self,
        execution: &JobExecution,
        cancel: CancellationToken,
    ) -> Result<(), JobError>;
}

/// Builds one [`JobRunner`] per attempt, from the service provider when
/// one is in scope.
pub type RunnerFactory = Arc<
    dyn Fn(Option<&Arc<dyn ServiceProvider>>) -> Result<Box<dyn JobRunner>, JobError>
        + Send
        + Sync,
>;

/// A definition backed by a runner type instead of a closure.
pub struct TaskJob {
    id: String,
    name: String,
    schedule: Option<Schedule>,
    overlap: bool,
    retry: Option<Arc<dyn RetryPolicy>>,
    factory: RunnerFactory,
}

impl TaskJob {
    /// Wrap a runner factory. The factory receives the scoped service
    /// provider when one exists and may use it for construction; it is
    /// called once per attempt so every attempt gets a fresh runner.
    pub fn new<F>(id: impl Into<String>, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Option<&Arc<dyn ServiceProvider>>) -> Result<Box<dyn JobRunner>, JobError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            schedule: None,
            overlap: false,
            retry: None,
            factory: Arc::new(factory),
        }
    }

    /// Convenience for runner types constructible without services.
    pub fn from_default<R>(id: impl Into<String>, name: impl Into<String>) -> Self
    where
        R: JobRunner + Default + 'static,
    {
        Self::new(id, name, |_| Ok(Box::new(R::default()) as Box<dyn JobRunner>))
    }

    /// Attach a schedule.
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Attach a retry policy.
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Allow concurrent executions of this definition.
    pub fn allow_overlap(mut self) -> Self {
        self.overlap = true;
        self
    }
}

#[async_trait]
impl JobDefinition for TaskJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    fn executions_can_overlap(&self) -> bool {
        self.overlap
    }

    fn retry_policy(&self) -> Option<Arc<dyn RetryPolicy>> {
        self.retry.clone()
    }

    async fn execute(
        &self,
        execution: Arc<JobExecution>,
        services: Option<Arc<dyn ServiceProvider>>,
        cancel: CancellationToken,
    ) -> Result<(), JobError> {
        let ctx = RetryContext::new(execution.clone());
        let factory = self.factory.clone();
        let attempt = move || -> AttemptFuture {
            let factory = factory.clone();
            let execution = execution.clone();
            let services = services.clone();
            let cancel = cancel.clone();
            Box::pin(async move {
                if cancel.is_cancelled() {
                    return Err(JobError::Cancelled);
                }
                // Fresh runner per attempt; dropped on every exit path.
                let mut runner = factory(services.as_ref())?;
                runner.run(&execution, cancel).await
            })
        };
        run_with_policy(self.retry.clone(), ctx, &attempt).await
    }
}
