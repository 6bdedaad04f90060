//! tagward-state: persistence collaborators for the update gate.
//!
//! The approval manager only sees two seams:
//!
//! - [`Cache`]: a flat byte-valued key/value store with prefix listing
//! - [`Codec`]: turns records into bytes and back
//!
//! [`RedbCache`] is the durable cache, backed by [redb](https://docs.rs/redb)
//! with a single `&str -> &[u8]` table. Keys are composite
//! (`approvals/{provider}/{identifier}`) so listing a prefix scopes the
//! scan. [`MemoryCache`] keeps everything in a map and honours per-entry
//! TTLs. Both are `Clone` + `Send` + `Sync` and can be shared across
//! async tasks.

pub mod cache;
pub mod codec;
pub mod error;
pub mod memory;
pub mod store;
pub mod tables;

pub use cache::Cache;
pub use codec::{Codec, JsonCodec};
pub use error::{StateError, StateResult};
pub use memory::MemoryCache;
pub use store::RedbCache;
