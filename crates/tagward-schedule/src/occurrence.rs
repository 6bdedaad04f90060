//! Previous-occurrence search over a forward-only cron rule.
//!
//! Cron parsers answer "when is the next run after T", never "when was the
//! last run before T". `find_previous_occurrence` recovers the latter by
//! bisecting over probe points in a seven-day lookback: each probe asks the
//! rule for its next run, and the answer tells which half of the bracket
//! still holds the most recent occurrence. Every branch shrinks the
//! bracket, so the search finishes well inside its iteration cap.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::trace;

use crate::error::ScheduleError;

/// How far back the search looks for a previous occurrence, in days.
pub const MAX_LOOKBACK_DAYS: i64 = 7;

/// Bracket width below which the search stops refining, in seconds.
pub const RESOLUTION_SECS: i64 = 60;

/// Iteration cap for the search.
pub const MAX_ITERATIONS: u32 = 30;

/// The one primitive the evaluator needs from a cron parser.
pub trait CronRule: Send + Sync {
    /// First occurrence strictly after `after`, or `None` if the rule never fires again.
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

impl CronRule for cron::Schedule {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.after(&after).next()
    }
}

/// Most recent occurrence of `rule` at or before `now`, within the lookback.
///
/// Returns `Ok(None)` when no occurrence is found (including rules that can
/// never fire) and `Err(NotConverged)` if the iteration cap is hit.
pub fn find_previous_occurrence(
    rule: &dyn CronRule,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let resolution = TimeDelta::seconds(RESOLUTION_SECS);
    let mut minimum = now - TimeDelta::days(MAX_LOOKBACK_DAYS);
    let mut maximum = now;
    let mut current = now - TimeDelta::seconds(1);
    let mut last_found = None;

    for iteration in 1..=MAX_ITERATIONS {
        let candidate = rule.next_after(current);
        trace!(iteration, %current, ?candidate, "probing cron rule");

        if candidate == Some(now) {
            return Ok(Some(now));
        }

        if maximum - minimum < resolution {
            return Ok(last_found);
        }

        match candidate {
            // A rule that never fires again counts as "before now", like a zero time.
            None => {
                last_found = None;
                let probe = minimum + (maximum - minimum) / 2;
                minimum = current;
                current = probe;
            }
            Some(next) if next < now => {
                last_found = Some(next);
                let probe = minimum + (maximum - minimum) / 2;
                minimum = current;
                current = probe;
            }
            Some(_) => {
                maximum = current;
                current = current - (current - minimum) / 2;
            }
        }
    }

    Err(ScheduleError::NotConverged(MAX_ITERATIONS))
}
