//! Lifecycle event sinks.
//!
//! The scheduler reports registry changes and execution lifecycle edges
//! to an optional [`SchedulerNotifier`] and to registered per-event
//! handlers. Hooks run synchronously from the emitting context, so they
//! must be quick; a panicking sink is contained and logged, never
//! surfaced to the scheduler or to other sinks.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::definition::JobDefinition;
use crate::execution::JobExecution;

/// Observer of scheduler lifecycle events. Every hook has an empty
/// default so implementations pick only what they need.
#[allow(unused_variables)]
pub trait SchedulerNotifier: Send + Sync {
    /// A definition was added to the registry.
    fn definition_added(&self, definition: &Arc<dyn JobDefinition>) {}

    /// A definition was removed, explicitly or by retirement.
    fn definition_removed(&self, definition: &Arc<dyn JobDefinition>) {}

    /// The dispatch loop started.
    fn scheduler_started(&self) {}

    /// The dispatch loop stopped and all executions finished.
    fn scheduler_stopped(&self) {}

    /// An execution was created; fires before its user code runs.
    fn job_started(&self, execution: &Arc<JobExecution>) {}

    /// An execution finished; fires after its user code returned.
    fn job_completed(&self, execution: &Arc<JobExecution>) {}
}

/// Synchronous callback registered via `on_job_started` /
/// `on_job_completed`.
pub type JobEventHandler = Arc<dyn Fn(&Arc<JobExecution>) + Send + Sync>;

/// Invoke a sink, containing any panic it raises.
pub(crate) fn guard_sink(hook: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(hook, "Event sink panicked; ignoring");
    }
}
