//! Version tracker: folds observed tags into per-image tracked entries.
//!
//! Each base image gets at most one semver-tracked entry. That entry keeps
//! the full tag history plus the latest tag per pre-release channel
//! (`dev`, `prod`, ...), so eligibility checks can ask "is this tag newer
//! than the channel head" without rescanning history. Non-semver tags such
//! as `latest` or `build-42` stay as separate, inert placeholder entries.

use std::collections::HashMap;

use tracing::debug;

use crate::image::ImageRef;
use crate::types::{TrackedImage, TriggerType};
use crate::version::{parse_version, prerelease_label};

/// Build the tracked entry for a freshly observed reference.
///
/// Semver tags start a tag history (`tags = [tag]`) and, when they carry a
/// pre-release label, a channel head. Anything else becomes a placeholder
/// with `tags = None`.
pub fn observe(image: ImageRef, provider: &str, namespace: &str) -> TrackedImage {
    let tag = image.tag().to_string();
    let (tags, channel_tags) = if parse_version(&tag).is_some() {
        let channels = prerelease_label(&tag)
            .map(|label| HashMap::from([(label, tag.clone())]))
            .unwrap_or_default();
        (Some(vec![tag]), channels)
    } else {
        (None, HashMap::new())
    };

    TrackedImage {
        image,
        trigger: TriggerType::Default,
        poll_schedule: None,
        provider: provider.to_string(),
        namespace: namespace.to_string(),
        channel_tags,
        tags,
        meta: HashMap::new(),
    }
}

/// Merge a new observation into the tracked set.
///
/// If the set already holds a semver-tracked entry for the same base image
/// name, that entry is replaced in place by the merged result: the new
/// reference becomes its head, channel maps are unioned (new wins), tag
/// histories are concatenated, and metadata is taken from the new entry.
/// Otherwise the observation is appended unchanged.
///
/// Only semver-tracked observations look for a merge target; placeholders
/// are always appended. Entries with `tags == None` are never touched.
pub fn merge(mut entries: Vec<TrackedImage>, new: TrackedImage) -> Vec<TrackedImage> {
    let target = match new.tags {
        Some(_) => find_target(&entries, &new.image),
        None => None,
    };

    let Some(idx) = target else {
        debug!(image = %new.image, "tracking new image entry");
        entries.push(new);
        return entries;
    };

    let TrackedImage {
        image,
        channel_tags,
        tags,
        meta,
        ..
    } = new;

    let existing = &mut entries[idx];
    existing.image = image;
    existing.channel_tags.extend(channel_tags);
    if let (Some(history), Some(added)) = (existing.tags.as_mut(), tags) {
        history.extend(added);
    }
    existing.meta = meta;

    debug!(
        image = %existing.image,
        channels = existing.channel_tags.len(),
        "merged observation into tracked image"
    );

    entries
}

/// Index of the first semver-tracked entry with the same base image name.
fn find_target(entries: &[TrackedImage], image: &ImageRef) -> Option<usize> {
    let base = image.repository();
    entries
        .iter()
        .position(|e| e.is_semver_tracked() && e.image.repository() == base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked(reference: &str) -> TrackedImage {
        observe(ImageRef::parse(reference).unwrap(), "kubernetes", "default")
    }

    #[test]
    fn observe_classifies_tags() {
        let release = tracked("org/app:1.0.0");
        assert_eq!(release.tags, Some(vec!["1.0.0".to_string()]));
        assert!(release.channel_tags.is_empty());

        let dev = tracked("org/app:1.1.0-dev");
        assert_eq!(dev.channel_tag("dev"), Some("1.1.0-dev"));

        let latest = tracked("org/app:latest");
        assert!(latest.tags.is_none());
        assert!(latest.channel_tags.is_empty());
    }

    #[test]
    fn appends_when_no_target() {
        let entries = merge(vec![tracked("org/other:1.0.0")], tracked("org/app:1.0.0"));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].image.short_name(), "org/other");
        assert_eq!(entries[1].image.short_name(), "org/app");
    }

    #[test]
    fn merges_channels_and_concatenates_tags() {
        let entries = merge(Vec::new(), tracked("org/app:1.0.0-dev"));
        let entries = merge(entries, tracked("org/app:1.0.0-prod"));

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.image.tag(), "1.0.0-prod");
        assert_eq!(entry.channel_tag("dev"), Some("1.0.0-dev"));
        assert_eq!(entry.channel_tag("prod"), Some("1.0.0-prod"));
        assert_eq!(
            entry.tags,
            Some(vec!["1.0.0-dev".to_string(), "1.0.0-prod".to_string()])
        );
    }

    #[test]
    fn channel_seen_again_updates_head() {
        let entries = merge(Vec::new(), tracked("org/app:1.0.0-dev"));
        let entries = merge(entries, tracked("org/app:1.1.0-dev"));
        assert_eq!(entries[0].channel_tag("dev"), Some("1.1.0-dev"));
        assert_eq!(entries[0].channel_tags.len(), 1);
    }

    #[test]
    fn history_keeps_duplicates_in_call_order() {
        let mut entries = Vec::new();
        for tag in ["1.0.0", "1.0.0", "0.9.0"] {
            entries = merge(entries, tracked(&format!("org/app:{tag}")));
        }
        assert_eq!(
            entries[0].tags,
            Some(vec![
                "1.0.0".to_string(),
                "1.0.0".to_string(),
                "0.9.0".to_string()
            ])
        );
        // Latest observation is the head even when it is older.
        assert_eq!(entries[0].image.tag(), "0.9.0");
    }

    #[test]
    fn meta_is_replaced_by_newest_observation() {
        let mut first = tracked("org/app:1.0.0");
        first.meta.insert("owner".to_string(), "alice".to_string());
        first.meta.insert("stale".to_string(), "yes".to_string());
        let mut second = tracked("org/app:1.1.0");
        second.meta.insert("owner".to_string(), "bob".to_string());

        let entries = merge(merge(Vec::new(), first), second);
        assert_eq!(entries[0].meta.len(), 1);
        assert_eq!(entries[0].meta["owner"], "bob");
    }

    #[test]
    fn placeholders_are_left_untouched() {
        let latest = tracked("org/app:latest");
        let build = tracked("org/app:build-42");
        let entries = vec![latest.clone(), tracked("org/app:1.0.0"), build.clone()];

        let entries = merge(entries, tracked("org/app:1.1.0-dev"));
        let entries = merge(entries, tracked("org/app:nightly"));

        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0], latest);
        assert_eq!(entries[2], build);
        assert_eq!(entries[1].image.tag(), "1.1.0-dev");
        assert_eq!(entries[3].image.tag(), "nightly");
        assert!(entries[3].tags.is_none());
    }

    #[test]
    fn never_creates_second_semver_entry() {
        let mut entries = vec![tracked("org/app:latest")];
        for tag in ["1.0.0", "1.1.0-dev", "2.0.0", "2.0.1-prod", "v3"] {
            entries = merge(entries, tracked(&format!("org/app:{tag}")));
        }
        let semver_entries = entries
            .iter()
            .filter(|e| e.is_semver_tracked() && e.image.short_name() == "org/app")
            .count();
        assert_eq!(semver_entries, 1);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn different_registries_are_different_images() {
        let entries = merge(vec![tracked("quay.io/org/app:1.0.0")], tracked("org/app:1.0.0"));
        assert_eq!(entries.len(), 2);
    }
}
