//! Update policies: decide whether a workload should move from its current
//! tag to a newly observed one.
//!
//! Policies are read from the workload's annotations first, then its labels
//! (key `tagward.io/policy`):
//!
//! | Value | Behaviour |
//! |---|---|
//! | `all` | any higher semver version, pre-release matching relaxed |
//! | `major` / `minor` / `patch` | higher version within the given bound |
//! | `force` | always update (or only the same tag with `matchTag`) |
//! | `glob:<pattern>` | tag matches the glob and sorts after the current tag |
//! | `regexp:<re>` | tag matches the regular expression |
//! | `never` / empty | never update |

use std::collections::HashMap;
use std::fmt;

use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::annotations;
use crate::version::{core_components, parse_version};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("no major.minor elements found in tag {0:?}")]
    NotVersioned(String),
    #[error("failed to parse current version {0:?}")]
    InvalidCurrent(String),
    #[error("failed to parse new version {0:?}")]
    InvalidNew(String),
    #[error("invalid policy {0:?}: {1}")]
    Invalid(String, String),
    #[error("unknown policy {0:?}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    None,
    Semver,
    Force,
    Glob,
    Regexp,
}

/// Semver bound for a semver policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemverLevel {
    All,
    Major,
    Minor,
    Patch,
}

impl fmt::Display for SemverLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SemverLevel::All => "all",
            SemverLevel::Major => "major",
            SemverLevel::Minor => "minor",
            SemverLevel::Patch => "patch",
        })
    }
}

/// A parsed update policy.
#[derive(Debug, Clone)]
pub enum UpdatePolicy {
    Never,
    Semver {
        level: SemverLevel,
        match_pre_release: bool,
    },
    Force {
        match_tag: bool,
    },
    Glob {
        policy: String,
        pattern: Regex,
    },
    Regexp {
        policy: String,
        regexp: Regex,
    },
}

impl UpdatePolicy {
    /// Parse a policy value. Options only apply to the policies that use them.
    pub fn parse(value: &str, match_tag: bool, match_pre_release: bool) -> Result<Self, PolicyError> {
        if let Some(pattern) = value.strip_prefix("glob:") {
            if pattern.is_empty() || pattern.contains(':') {
                return Err(PolicyError::Invalid(value.to_string(), "bad glob".to_string()));
            }
            return Ok(UpdatePolicy::Glob {
                policy: value.to_string(),
                pattern: glob_to_regex(pattern)?,
            });
        }
        if let Some(expr) = value.strip_prefix("regexp:") {
            let regexp = Regex::new(expr)
                .map_err(|e| PolicyError::Invalid(value.to_string(), e.to_string()))?;
            return Ok(UpdatePolicy::Regexp {
                policy: value.to_string(),
                regexp,
            });
        }

        let level = match value {
            "all" => SemverLevel::All,
            "major" => SemverLevel::Major,
            "minor" => SemverLevel::Minor,
            "patch" => SemverLevel::Patch,
            "force" => return Ok(UpdatePolicy::Force { match_tag }),
            "" | "never" => return Ok(UpdatePolicy::Never),
            other => return Err(PolicyError::Unknown(other.to_string())),
        };
        Ok(UpdatePolicy::Semver {
            level,
            match_pre_release,
        })
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            UpdatePolicy::Never => PolicyKind::None,
            UpdatePolicy::Semver { .. } => PolicyKind::Semver,
            UpdatePolicy::Force { .. } => PolicyKind::Force,
            UpdatePolicy::Glob { .. } => PolicyKind::Glob,
            UpdatePolicy::Regexp { .. } => PolicyKind::Regexp,
        }
    }

    pub fn name(&self) -> String {
        match self {
            UpdatePolicy::Never => "never".to_string(),
            UpdatePolicy::Semver { level, .. } => level.to_string(),
            UpdatePolicy::Force { .. } => "force".to_string(),
            UpdatePolicy::Glob { policy, .. } | UpdatePolicy::Regexp { policy, .. } => {
                policy.clone()
            }
        }
    }

    /// Whether a workload running `current` should move to `new`.
    pub fn should_update(&self, current: &str, new: &str) -> Result<bool, PolicyError> {
        match self {
            UpdatePolicy::Never => Ok(false),
            UpdatePolicy::Force { match_tag } => Ok(!match_tag || current == new),
            UpdatePolicy::Glob { pattern, .. } => Ok(pattern.is_match(new) && new > current),
            UpdatePolicy::Regexp { regexp, .. } => Ok(regexp.is_match(new)),
            UpdatePolicy::Semver {
                level,
                match_pre_release,
            } => semver_should_update(*level, *match_pre_release, current, new),
        }
    }
}

fn semver_should_update(
    level: SemverLevel,
    match_pre_release: bool,
    current: &str,
    new: &str,
) -> Result<bool, PolicyError> {
    if current == "latest" {
        return Ok(true);
    }

    let components = core_components(new);
    if components != 2 && components != 3 {
        return Err(PolicyError::NotVersioned(new.to_string()));
    }

    let current_version =
        parse_version(current).ok_or_else(|| PolicyError::InvalidCurrent(current.to_string()))?;
    let new_version = parse_version(new).ok_or_else(|| PolicyError::InvalidNew(new.to_string()))?;

    if match_pre_release && level != SemverLevel::All && current_version.pre != new_version.pre {
        return Ok(false);
    }

    if current_version >= new_version {
        return Ok(false);
    }

    Ok(match level {
        SemverLevel::All | SemverLevel::Major => true,
        SemverLevel::Minor => new_version.major == current_version.major,
        SemverLevel::Patch => {
            new_version.major == current_version.major
                && new_version.minor == current_version.minor
        }
    })
}

fn glob_to_regex(pattern: &str) -> Result<Regex, PolicyError> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
        .map_err(|e| PolicyError::Invalid(pattern.to_string(), e.to_string()))
}

/// Resolve a workload's policy from its annotations, falling back to labels.
///
/// Invalid or unknown values are logged and treated as `never`.
pub fn policy_from_labels(
    labels: &HashMap<String, String>,
    annotations: &HashMap<String, String>,
) -> UpdatePolicy {
    let source = if annotations.contains_key(annotations::POLICY) {
        annotations
    } else if labels.contains_key(annotations::POLICY) {
        labels
    } else {
        return UpdatePolicy::Never;
    };

    let value = &source[annotations::POLICY];
    let match_tag = source
        .get(annotations::MATCH_TAG)
        .is_some_and(|v| v == "true");
    let match_pre_release = source
        .get(annotations::MATCH_PRE_RELEASE)
        .is_none_or(|v| v == "true");

    match UpdatePolicy::parse(value, match_tag, match_pre_release) {
        Ok(policy) => policy,
        Err(PolicyError::Unknown(policy)) => {
            info!(%policy, "unknown policy, check the workload configuration");
            UpdatePolicy::Never
        }
        Err(e) => {
            warn!(error = %e, "failed to parse policy, check the workload configuration");
            UpdatePolicy::Never
        }
    }
}
