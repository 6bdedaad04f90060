//! Lenient semantic-version parsing for image tags.
//!
//! Registries are full of tags like `v1.2.3` and `1.4`. The strict
//! `semver` grammar rejects both, so tags are normalised first: a leading
//! `v` is dropped and a missing patch component becomes `.0`.

use semver::Version;
use tracing::debug;

/// Parse a tag as a semantic version, tolerating `v` prefixes and
/// `major.minor` tags.
pub fn parse_version(tag: &str) -> Option<Version> {
    let raw = tag.strip_prefix('v').unwrap_or(tag);
    if raw.is_empty() {
        return None;
    }

    let core_end = raw.find(['-', '+']).unwrap_or(raw.len());
    let (core, suffix) = raw.split_at(core_end);
    let normalised = match core.split('.').count() {
        1 => format!("{core}.0.0{suffix}"),
        2 => format!("{core}.0{suffix}"),
        _ => raw.to_string(),
    };

    Version::parse(&normalised).ok()
}

/// Pre-release label of a tag (`1.2.3-dev` → `dev`), if it is semver and has one.
pub fn prerelease_label(tag: &str) -> Option<String> {
    let version = parse_version(tag)?;
    if version.pre.is_empty() {
        None
    } else {
        Some(version.pre.as_str().to_string())
    }
}

/// Number of dot-separated components in the version core of a tag.
pub(crate) fn core_components(tag: &str) -> usize {
    let raw = tag.strip_prefix('v').unwrap_or(tag);
    let core_end = raw.find(['-', '+']).unwrap_or(raw.len());
    raw[..core_end].split('.').count()
}

/// Highest semver tag in `tags` if it is newer than `current`.
///
/// When `same_prerelease` is set, only tags on the same pre-release label
/// as `current` are considered.
pub fn newest_available(current: &str, tags: &[String], same_prerelease: bool) -> Option<String> {
    let current_version = parse_version(current)?;

    let newest = tags
        .iter()
        .filter_map(|tag| match parse_version(tag) {
            Some(v) => Some((v, tag)),
            None => {
                debug!(%tag, "skipping non-semver tag");
                None
            }
        })
        .filter(|(v, _)| !same_prerelease || v.pre == current_version.pre)
        .max_by(|(a, _), (b, _)| a.cmp(b))?;

    (current_version < newest.0).then(|| newest.1.clone())
}
