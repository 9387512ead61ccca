//! Scheduler configuration.
//!
//! Provides the polling cadence for the dispatch loop. Individual jobs
//! carry their own `Schedule`; this only controls how often the
//! scheduler wakes up to evaluate them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Dispatch poll frequency in milliseconds.
    /// Defaults to 1000 (one second).
    #[serde(default = "default_poll_frequency_ms")]
    pub poll_frequency_ms: u64,
}

fn default_poll_frequency_ms() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_frequency_ms: default_poll_frequency_ms(),
        }
    }
}

impl SchedulerConfig {
    /// The poll frequency as a [`Duration`].
    pub fn poll_frequency(&self) -> Duration {
        Duration::from_millis(self.poll_frequency_ms)
    }
}
