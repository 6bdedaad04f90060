//! tagward-core: shared domain types for the Tagward update gate.
//!
//! # Components
//!
//! - **`image`**: container image reference parsing (`registry/name:tag`)
//! - **`types`**: trigger events, provider and trigger kinds, tracked images
//! - **`version`**: lenient semver parsing used for tag comparison
//! - **`tracker`**: per-channel version tracking (merge of observed tags)
//! - **`policy`**: update policies (semver, force, glob, regexp)
//! - **`annotations`**: workload label/annotation keys
//! - **`config`**: `tagward.toml` configuration

pub mod annotations;
pub mod config;
pub mod image;
pub mod policy;
pub mod tracker;
pub mod types;
pub mod version;

pub use config::GateConfig;
pub use image::{ImageError, ImageRef};
pub use policy::{PolicyError, PolicyKind, UpdatePolicy, policy_from_labels};
pub use types::*;
