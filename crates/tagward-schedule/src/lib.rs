//! tagward-schedule: maintenance windows for workload updates.
//!
//! A workload opts into windows with a single annotation:
//!
//! ```text
//! tagward.io/update-schedule: "0 0 2 * * *|1h, 0 30 14 * * SAT|30m"
//! ```
//!
//! Each `CRON|DURATION` pair is a window that opens at every cron
//! occurrence and stays open for the duration. Windows are OR'd; a
//! workload may update inside any open window once its own cooldown (the
//! window's duration, measured from the workload's last applied update)
//! has elapsed.
//!
//! # Components
//!
//! - **`duration`**: compound duration strings (`1h30m`, `90s`, `250ms`)
//! - **`occurrence`**: the `CronRule` seam and the previous-occurrence search
//! - **`schedule`**: annotation parsing and the allow/deny decision

pub mod duration;
pub mod error;
pub mod occurrence;
pub mod schedule;

pub use duration::parse_duration;
pub use error::ScheduleError;
pub use occurrence::{CronRule, find_previous_occurrence};
pub use schedule::{UpdateSchedule, Window, is_update_allowed};
