//! Workload label and annotation keys read by the gate.

/// Update policy (`all`, `major`, `minor`, `patch`, `force`, `glob:…`, `regexp:…`).
pub const POLICY: &str = "tagward.io/policy";

/// `"true"` restricts the force policy to identical tags.
pub const MATCH_TAG: &str = "tagward.io/matchTag";

/// `"false"` lets semver policies cross pre-release labels. Defaults to `"true"`.
pub const MATCH_PRE_RELEASE: &str = "tagward.io/matchPreRelease";

/// Trigger kind (`poll` or default).
pub const TRIGGER: &str = "tagward.io/trigger";

/// Registry poll schedule for poll-triggered workloads.
pub const POLL_SCHEDULE: &str = "tagward.io/pollSchedule";

/// Votes required before an update may proceed. Absent or `0` means none.
pub const MINIMUM_APPROVALS: &str = "tagward.io/approvals";

/// Hours an approval request stays open.
pub const APPROVAL_DEADLINE: &str = "tagward.io/approvalDeadline";

/// Maintenance windows: `CRON|DURATION[,CRON|DURATION...]`.
pub const UPDATE_SCHEDULE: &str = "tagward.io/update-schedule";

/// RFC 3339 timestamp of the last applied update, written by the gate.
pub const UPDATE_TIME: &str = "tagward.io/update-time";

/// Default approval deadline in hours.
pub const APPROVAL_DEADLINE_DEFAULT_HOURS: u64 = 24;
