//! The cache contract consumed by the approval manager.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::StateResult;

/// Byte-valued key/value store shared between concurrent callers.
///
/// Implementations must tolerate concurrent `put`/`get`/`delete`/`list`.
/// No multi-key transactional guarantees are expected.
pub trait Cache: Send + Sync {
    /// Insert or overwrite `key`.
    fn put(&self, key: &str, value: &[u8]) -> StateResult<()>;

    /// Insert with a time-to-live. Backends without native expiry store
    /// the entry as-is and leave purging to their owner.
    fn put_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> StateResult<()> {
        let _ = ttl;
        self.put(key, value)
    }

    /// Fetch `key`, failing with `StateError::NotFound` if absent.
    fn get(&self, key: &str) -> StateResult<Vec<u8>>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> StateResult<()>;

    /// All entries whose key starts with `prefix`.
    fn list(&self, prefix: &str) -> StateResult<HashMap<String, Vec<u8>>>;
}
