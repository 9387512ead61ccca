//! Per-run execution state.
//!
//! A `JobExecution` is created by the scheduler for a single run of a
//! definition, transitions one-way from running to finished, and is
//! never mutated again once its finish time is set. Cancellation is a
//! child token linked to the scheduler's root: cancelling the scheduler
//! cancels every execution, cancelling one execution affects nothing
//! else.

use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::definition::JobDefinition;
use crate::error::JobError;

#[derive(Debug, Default)]
struct ExecutionState {
    finish_time: Option<DateTime<Utc>>,
    error: Option<JobError>,
}

/// One concrete run of a job definition.
pub struct JobExecution {
    id: Uuid,
    definition: Arc<dyn JobDefinition>,
    start_time: DateTime<Utc>,
    cancel: CancellationToken,
    completed: CancellationToken,
    state: RwLock<ExecutionState>,
}

impl JobExecution {
    pub(crate) fn new(
        definition: Arc<dyn JobDefinition>,
        start_time: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition,
            start_time,
            cancel,
            completed: CancellationToken::new(),
            state: RwLock::new(ExecutionState::default()),
        }
    }

    /// Unique id of this run.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The definition this run belongs to.
    pub fn definition(&self) -> &Arc<dyn JobDefinition> {
        &self.definition
    }

    /// Id of the owning definition.
    pub fn definition_id(&self) -> &str {
        self.definition.id()
    }

    /// When the run started, per the scheduler's clock.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// When the run finished, once it has.
    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().unwrap().finish_time
    }

    /// The terminal error, when the run failed or was cancelled.
    pub fn error(&self) -> Option<JobError> {
        self.state.read().unwrap().error.clone()
    }

    /// Whether the run is still in flight.
    pub fn running(&self) -> bool {
        self.finish_time().is_none()
    }

    /// `Some(true)` when finished without error, `Some(false)` when
    /// finished with one, `None` while still running.
    pub fn success(&self) -> Option<bool> {
        let state = self.state.read().unwrap();
        state.finish_time.map(|_| state.error.is_none())
    }

    /// Wall-clock duration of the run, once finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finish_time().map(|finish| finish - self.start_time)
    }

    /// The cancellation token observed by this run's workload.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel this run only; siblings and the scheduler are unaffected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the run has finished. Useful for racing an
    /// external timeout against a run.
    pub async fn wait(&self) {
        self.completed.cancelled().await;
    }

    /// Record the terminal state. The first call wins; later calls are
    /// ignored so the finished state is immutable.
    pub(crate) fn finish(&self, at: DateTime<Utc>, error: Option<JobError>) -> bool {
        {
            let mut state = self.state.write().unwrap();
            if state.finish_time.is_some() {
                return false;
            }
            state.finish_time = Some(at);
            state.error = error;
        }
        self.completed.cancel();
        true
    }
}

impl fmt::Debug for JobExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExecution")
            .field("id", &self.id)
            .field("definition_id", &self.definition.id())
            .field("start_time", &self.start_time)
            .field("finish_time", &self.finish_time())
            .field("error", &self.error())
            .finish()
    }
}
