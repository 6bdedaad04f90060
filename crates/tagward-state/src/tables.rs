//! redb table definitions for the Tagward cache.

use redb::TableDefinition;

/// Opaque cache entries keyed by composite string keys
/// (e.g. `approvals/{provider}/{identifier}`).
pub const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");
