//! Retry-policy integration.
//!
//! The retry engine itself is an external collaborator: the scheduler
//! only defines the [`RetryPolicy`] interface and hands each policy a
//! zero-argument action that performs one attempt, together with a
//! [`RetryContext`] exposing the current execution and definition.
//! [`FixedBackoff`] is a minimal reference policy so retry wiring is
//! usable out of the box.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::warn;

use crate::definition::JobDefinition;
use crate::error::JobError;
use crate::execution::JobExecution;

/// One boxed attempt of the job body.
pub type AttemptFuture = BoxFuture<'static, Result<(), JobError>>;

/// Zero-argument action producing a fresh attempt per call.
pub type AttemptFn<'a> = &'a (dyn Fn() -> AttemptFuture + Send + Sync);

/// What a retry policy may inspect while deciding on another attempt.
///
/// Carried for the duration of a single `execute` call.
pub struct RetryContext {
    execution: Arc<JobExecution>,
    definition: Arc<dyn JobDefinition>,
}

impl RetryContext {
    pub(crate) fn new(execution: Arc<JobExecution>) -> Self {
        let definition = execution.definition().clone();
        Self {
            execution,
            definition,
        }
    }

    /// The execution this policy invocation belongs to.
    pub fn execution(&self) -> &Arc<JobExecution> {
        &self.execution
    }

    /// The definition being executed.
    pub fn definition(&self) -> &Arc<dyn JobDefinition> {
        &self.definition
    }
}

/// Invokes an action one or more times per its policy and either yields
/// success or re-surfaces the terminal failure.
#[async_trait]
pub trait RetryPolicy: Send + Sync {
    async fn run(&self, ctx: &RetryContext, attempt: AttemptFn<'_>) -> Result<(), JobError>;
}

/// Run `attempt` under the optional policy; without one, the action is
/// invoked exactly once.
pub(crate) async fn run_with_policy(
    policy: Option<Arc<dyn RetryPolicy>>,
    ctx: RetryContext,
    attempt: AttemptFn<'_>,
) -> Result<(), JobError> {
    match policy {
        Some(policy) => policy.run(&ctx, attempt).await,
        None => attempt().await,
    }
}

/// Reference policy: up to `max_attempts` attempts with a fixed delay
/// between them, observing the execution's cancellation token between
/// attempts.
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    max_attempts: u32,
    delay: Duration,
}

impl FixedBackoff {
    /// A policy with the given attempt budget and no delay.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    /// Sleep `delay` between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl RetryPolicy for FixedBackoff {
    async fn run(&self, ctx: &RetryContext, attempt: AttemptFn<'_>) -> Result<(), JobError> {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for n in 1..=attempts {
            if ctx.execution().cancellation_token().is_cancelled() {
                return Err(JobError::Cancelled);
            }
            match attempt().await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(
                        job_id = %ctx.definition().id(),
                        attempt = n,
                        error = %err,
                        "Job attempt failed"
                    );
                    last_error = Some(err);
                }
            }
            if n < attempts && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| JobError::failed("retry policy made no attempts")))
    }
}
