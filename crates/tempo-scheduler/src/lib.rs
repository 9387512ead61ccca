//! In-process job scheduler.
//!
//! This crate provides a polling scheduler that owns a registry of job
//! definitions, launches each due definition as an independent tokio
//! task, and tracks every run as a `JobExecution` with its own
//! cancellation token linked to the scheduler's root.
//!
//! # Features
//!
//! - Cron-driven schedules (5- or 6-field UTC expressions via `croner`)
//!   with earliest-start floors and symmetric jitter windows
//! - One-shot definitions that retire themselves once their run is done
//! - Overlap prevention per definition (due instants are dropped, not
//!   queued) with opt-in concurrent execution
//! - Forced starts that bypass schedule and overlap checks for one tick
//! - Retry-policy integration per definition, with execution context
//! - Graceful shutdown via CancellationToken: `stop()` joins every
//!   running execution
//! - Lifecycle observability: start/completion handlers, an optional
//!   notifier sink, and serializable per-definition status snapshots
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tempo_scheduler::{ActionJob, Schedule, Scheduler};
//!
//! let scheduler = Scheduler::new();
//!
//! scheduler.add(Arc::new(
//!     ActionJob::new("hourly-report", "Hourly Report", |_execution, _services, cancel| async move {
//!         build_report(cancel).await
//!     })
//!     .with_schedule(Schedule::cron("0 * * * *")),
//! ));
//!
//! scheduler.on_job_completed(|execution| {
//!     println!("{} finished: {:?}", execution.definition_id(), execution.success());
//! });
//!
//! scheduler.start().await;
//! // ...
//! scheduler.stop().await;
//! ```

mod clock;
mod config;
mod definition;
mod error;
mod execution;
mod notifier;
mod retry;
mod schedule;
mod scheduler;
mod services;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SchedulerConfig;
pub use definition::{ActionJob, JobAction, JobDefinition, JobRunner, RunnerFactory, TaskJob};
pub use error::JobError;
pub use execution::JobExecution;
pub use notifier::{JobEventHandler, SchedulerNotifier};
pub use retry::{AttemptFn, AttemptFuture, FixedBackoff, RetryContext, RetryPolicy};
pub use schedule::Schedule;
pub use scheduler::{JobStatus, Scheduler, SchedulerBuilder};
pub use services::{resolve, ServiceError, ServiceProvider, ServiceScope};
