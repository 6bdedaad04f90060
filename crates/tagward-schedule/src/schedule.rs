//! Update schedule annotation parsing and evaluation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::duration::parse_duration;
use crate::error::ScheduleError;
use crate::occurrence::find_previous_occurrence;

/// One maintenance window: opens at each cron occurrence, stays open for `duration`.
#[derive(Debug, Clone)]
pub struct Window {
    expression: String,
    rule: cron::Schedule,
    duration: Duration,
}

impl Window {
    /// Parse a single `CRON|DURATION` piece.
    pub fn parse(piece: &str) -> Result<Self, ScheduleError> {
        let parts: Vec<&str> = piece.split('|').collect();
        let [expression, duration] = parts.as_slice() else {
            return Err(ScheduleError::InvalidWindow(piece.to_string()));
        };

        let expression = expression.trim();
        let rule = cron::Schedule::from_str(expression).map_err(|e| ScheduleError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        let duration = parse_duration(duration)?;

        Ok(Self {
            expression: expression.to_string(),
            rule,
            duration,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Most recent opening at or before `now`.
    pub fn previous_opening(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        find_previous_occurrence(&self.rule, now)
    }

    /// Whether this window lets a workload last updated at `last_update`
    /// move at `now`. Unresolvable windows deny.
    pub fn allows(&self, last_update: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let prev_run = match self.previous_opening(now) {
            Ok(Some(prev_run)) => prev_run,
            Ok(None) => {
                debug!(window = %self, "no previous occurrence in lookback");
                return false;
            }
            Err(e) => {
                warn!(window = %self, error = %e, "skipping window");
                return false;
            }
        };

        let Ok(duration) = TimeDelta::from_std(self.duration) else {
            warn!(window = %self, "window duration out of range, skipping");
            return false;
        };

        if now - last_update < duration {
            debug!(window = %self, %last_update, "cooldown not elapsed");
            return false;
        }

        if now == prev_run {
            return true;
        }
        match prev_run.checked_add_signed(duration) {
            Some(window_end) => now > prev_run && now < window_end,
            None => now > prev_run,
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{:?}", self.expression, self.duration)
    }
}

/// A set of OR'd maintenance windows.
#[derive(Debug, Clone)]
pub struct UpdateSchedule {
    windows: Vec<Window>,
}

impl UpdateSchedule {
    /// Parse an annotation value of the form `CRON|DURATION[,CRON|DURATION...]`.
    ///
    /// A blank value yields `Ok(None)`, meaning updates are always allowed.
    /// Cron expressions are split on `,` first, so cron lists (`1,15`)
    /// can't appear inside a window.
    pub fn parse(annotation: &str) -> Result<Option<Self>, ScheduleError> {
        let windows = annotation
            .split(',')
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
            .map(Window::parse)
            .collect::<Result<Vec<_>, _>>()?;

        if windows.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self { windows }))
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    /// True if any window allows the update.
    pub fn allows(&self, last_update: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.windows.iter().any(|w| w.allows(last_update, now))
    }
}

/// Decide whether an update may be applied at `now`.
///
/// No schedule means always allowed. A window that cannot be resolved is
/// skipped; the remaining windows still get a say.
pub fn is_update_allowed(
    schedule: Option<&UpdateSchedule>,
    last_update: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    match schedule {
        None => true,
        Some(schedule) => schedule.allows(last_update, now),
    }
}
