//! Next-run computation from cron expressions, earliest-start bounds,
//! and jitter windows.
//!
//! Cron parsing is delegated to the `croner` crate; everything here is
//! evaluated in UTC. A `Schedule` without a cron expression is a
//! one-shot: it fires once at its earliest-start instant (or the Unix
//! epoch when none is set) and is exhausted afterwards.
//!
//! Jitter adds a symmetric random offset to each computed next-run
//! instant to de-correlate schedulers that share a cron expression.

use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;
use rand::Rng;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
struct ScheduleState {
    next_run: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
}

/// When a job should run: cron cadence, earliest-start floor, jitter.
///
/// Construction never fails. An expression the cron library rejects
/// degrades the schedule to an earliest-start one-shot, as does a cron
/// expression with no future occurrence.
///
/// The derived `next_run_time` is `None` once the schedule is
/// exhausted (a one-shot that has already run).
#[derive(Debug)]
pub struct Schedule {
    expr: Option<String>,
    cron: Option<Cron>,
    earliest_start: Option<DateTime<Utc>>,
    jitter: Option<Duration>,
    state: RwLock<ScheduleState>,
}

impl Schedule {
    /// A one-shot schedule due immediately (epoch floor).
    pub fn once() -> Self {
        Self::build(None, None, None)
    }

    /// A one-shot schedule due at `start`.
    pub fn at(start: DateTime<Utc>) -> Self {
        Self::build(None, Some(start), None)
    }

    /// A recurring schedule from a 5- or 6-field cron expression in UTC.
    ///
    /// An unparseable expression is kept for display but the schedule
    /// behaves as if no cron was set.
    pub fn cron(expr: impl Into<String>) -> Self {
        let expr = expr.into();
        let cron = match Cron::new(&expr).with_seconds_optional().parse() {
            Ok(cron) => Some(cron),
            Err(err) => {
                debug!(expr = %expr, error = %err, "Cron expression rejected; treating schedule as one-shot");
                None
            }
        };
        Self::build_with_cron(Some(expr), cron, None, None)
    }

    /// Do not schedule before `start`, even when the cron cadence is due.
    pub fn with_earliest_start(mut self, start: DateTime<Utc>) -> Self {
        self.earliest_start = Some(start);
        self.update_next_run_time(DateTime::UNIX_EPOCH);
        self
    }

    /// Offset each computed next-run by a fresh uniform draw in
    /// `[-jitter, +jitter]`.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = Some(jitter);
        self.update_next_run_time(DateTime::UNIX_EPOCH);
        self
    }

    fn build(
        expr: Option<String>,
        earliest_start: Option<DateTime<Utc>>,
        jitter: Option<Duration>,
    ) -> Self {
        Self::build_with_cron(expr, None, earliest_start, jitter)
    }

    fn build_with_cron(
        expr: Option<String>,
        cron: Option<Cron>,
        earliest_start: Option<DateTime<Utc>>,
        jitter: Option<Duration>,
    ) -> Self {
        let schedule = Self {
            expr,
            cron,
            earliest_start,
            jitter,
            state: RwLock::new(ScheduleState::default()),
        };
        schedule.update_next_run_time(DateTime::UNIX_EPOCH);
        schedule
    }

    /// The raw cron expression as supplied, even when it failed to parse.
    pub fn cron_expression(&self) -> Option<&str> {
        self.expr.as_deref()
    }

    /// Whether a usable cron expression is in effect.
    pub fn has_cron(&self) -> bool {
        self.cron.is_some()
    }

    /// The earliest-start floor, when one is set.
    pub fn earliest_start(&self) -> Option<DateTime<Utc>> {
        self.earliest_start
    }

    /// The next instant this schedule is due, or `None` when exhausted.
    pub fn next_run_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().unwrap().next_run
    }

    /// The start instant of the most recent run, when one has happened.
    pub fn last_run_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().unwrap().last_run
    }

    /// Record (or clear) the last run instant.
    ///
    /// Assigning an instant recomputes the next run using it as the
    /// reference, so cadence is anchored to execution *start*, not
    /// finish: a job that outruns its cron period is due again as soon
    /// as it finishes unless overlap prevention drops the missed
    /// instants. Assigning `None` clears only the field.
    pub fn set_last_run_time(&self, instant: Option<DateTime<Utc>>) {
        match instant {
            Some(instant) => {
                self.state.write().unwrap().last_run = Some(instant);
                self.update_next_run_time(instant);
            }
            None => {
                self.state.write().unwrap().last_run = None;
            }
        }
    }

    /// Recompute `next_run_time` using `reference` as the cron reference
    /// instant, then apply jitter. Never fails.
    pub fn update_next_run_time(&self, reference: DateTime<Utc>) {
        let next = self.compute_next(reference);
        self.state.write().unwrap().next_run = next;
    }

    fn compute_next(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if let Some(cron) = &self.cron {
            // Strictly after the reference; the occurrence at the
            // reference instant itself is not repeated.
            match cron.find_next_occurrence(&reference, false) {
                Ok(next) => {
                    let clamped = match self.earliest_start {
                        Some(earliest) if earliest > next => earliest,
                        _ => next,
                    };
                    return Some(self.apply_jitter(clamped));
                }
                Err(err) => {
                    debug!(
                        expr = self.expr.as_deref().unwrap_or(""),
                        error = %err,
                        "No future cron occurrence; treating schedule as one-shot"
                    );
                }
            }
        }

        // One-shot: a single pending run at the earliest-start floor,
        // gone once it has run.
        if self.state.read().unwrap().last_run.is_some() {
            None
        } else {
            Some(self.earliest_start.unwrap_or(DateTime::UNIX_EPOCH))
        }
    }

    // A negative draw may land below earliest_start; the floor bounds
    // scheduling, not firing once scheduled.
    fn apply_jitter(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let Some(jitter) = self.jitter else {
            return instant;
        };
        let bound_ms = jitter.as_millis() as i64;
        if bound_ms == 0 {
            return instant;
        }
        let offset_ms = rand::thread_rng().gen_range(-bound_ms..=bound_ms);
        instant + chrono::Duration::milliseconds(offset_ms)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn instant(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 29, h, m, s).unwrap()
    }

    #[test]
    fn test_once_is_due_at_epoch() {
        let schedule = Schedule::once();
        assert_eq!(schedule.next_run_time(), Some(DateTime::UNIX_EPOCH));
        assert!(!schedule.has_cron());
    }

    #[test]
    fn test_at_is_due_at_instant() {
        let start = instant(12, 0, 0);
        let schedule = Schedule::at(start);
        assert_eq!(schedule.next_run_time(), Some(start));
    }

    #[test]
    fn test_one_shot_exhausts_after_run() {
        let start = instant(12, 0, 0);
        let schedule = Schedule::at(start);

        schedule.set_last_run_time(Some(start));
        assert_eq!(schedule.next_run_time(), None);
        assert_eq!(schedule.last_run_time(), Some(start));
    }

    #[test]
    fn test_clearing_last_run_does_not_recompute() {
        let schedule = Schedule::at(instant(12, 0, 0));
        schedule.set_last_run_time(Some(instant(12, 0, 1)));
        assert_eq!(schedule.next_run_time(), None);

        schedule.set_last_run_time(None);
        assert_eq!(schedule.last_run_time(), None);
        // Only the field is cleared; next-run stays exhausted.
        assert_eq!(schedule.next_run_time(), None);
    }

    #[test]
    fn test_cron_next_after_reference() {
        let schedule = Schedule::cron("0 * * * *");
        let reference = instant(12, 30, 0);

        schedule.set_last_run_time(Some(reference));
        assert_eq!(schedule.next_run_time(), Some(instant(13, 0, 0)));
    }

    #[test]
    fn test_cron_on_the_hour_is_strictly_after() {
        let schedule = Schedule::cron("0 * * * *");
        let reference = instant(13, 0, 0);

        schedule.set_last_run_time(Some(reference));
        assert_eq!(schedule.next_run_time(), Some(instant(14, 0, 0)));
    }

    #[test]
    fn test_cron_with_seconds_field() {
        let schedule = Schedule::cron("*/1 * * * * *");
        let reference = instant(12, 0, 0);

        schedule.set_last_run_time(Some(reference));
        assert_eq!(schedule.next_run_time(), Some(instant(12, 0, 1)));
    }

    #[test]
    fn test_initial_cron_reference_is_epoch() {
        let schedule = Schedule::cron("* * * * *");
        let next = schedule.next_run_time().unwrap();
        // First occurrence after the epoch: far in the past, so the
        // schedule is immediately due.
        assert!(next < Utc::now());
    }

    #[test]
    fn test_earliest_start_clamps_cron() {
        let earliest = instant(15, 0, 0);
        let schedule = Schedule::cron("0 * * * *").with_earliest_start(earliest);

        schedule.set_last_run_time(Some(instant(12, 30, 0)));
        assert_eq!(schedule.next_run_time(), Some(earliest));

        // Once past the floor, the cron cadence wins.
        schedule.set_last_run_time(Some(instant(16, 30, 0)));
        assert_eq!(schedule.next_run_time(), Some(instant(17, 0, 0)));
    }

    #[test]
    fn test_invalid_cron_degrades_to_one_shot() {
        let start = instant(9, 0, 0);
        let schedule = Schedule::cron("not a cron").with_earliest_start(start);

        assert!(!schedule.has_cron());
        assert_eq!(schedule.cron_expression(), Some("not a cron"));
        assert_eq!(schedule.next_run_time(), Some(start));

        schedule.set_last_run_time(Some(start));
        assert_eq!(schedule.next_run_time(), None);
    }

    #[test]
    fn test_jitter_stays_within_window() {
        let jitter = Duration::from_secs(30);
        let schedule = Schedule::cron("0 * * * *").with_jitter(jitter);
        let reference = instant(12, 30, 0);
        let unjittered = instant(13, 0, 0);

        for _ in 0..100 {
            schedule.set_last_run_time(Some(reference));
            let next = schedule.next_run_time().unwrap();
            let offset = (next - unjittered).num_milliseconds().unsigned_abs();
            assert!(offset <= jitter.as_millis() as u64);
        }
    }

    #[test]
    fn test_jitter_draws_fresh_each_recomputation() {
        let schedule = Schedule::cron("0 * * * *").with_jitter(Duration::from_secs(600));
        let reference = instant(12, 30, 0);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            schedule.set_last_run_time(Some(reference));
            seen.insert(schedule.next_run_time().unwrap());
        }
        assert!(seen.len() > 1, "jitter should vary across recomputations");
    }

    #[test]
    fn test_jitter_may_undershoot_earliest_start() {
        // The floor clamps the scheduling base; a negative draw below it
        // is accepted and simply fires immediately once due.
        let earliest = instant(15, 0, 0);
        let schedule = Schedule::cron("0 * * * *")
            .with_earliest_start(earliest)
            .with_jitter(Duration::from_secs(3600));

        let mut undershot = false;
        for _ in 0..200 {
            schedule.set_last_run_time(Some(instant(12, 30, 0)));
            if schedule.next_run_time().unwrap() < earliest {
                undershot = true;
                break;
            }
        }
        assert!(undershot, "negative jitter draws should be able to undershoot the floor");
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let schedule = Schedule::cron("0 * * * *").with_jitter(Duration::ZERO);
        schedule.set_last_run_time(Some(instant(12, 30, 0)));
        assert_eq!(schedule.next_run_time(), Some(instant(13, 0, 0)));
    }
}
