//! Tracking of recently stored keys.
//!
//! Retrieval tools accept an optional key argument; when it is omitted
//! they fall back to the most recently stored one. [`StoredFileContext`]
//! keeps that short history: a deduplicated, most-recent-first list
//! capped at [`CAPACITY`] entries behind its own lock, independent of the
//! store's.

use std::sync::RwLock;

/// Maximum number of tracked keys; older entries are evicted.
pub const CAPACITY: usize = 10;

/// A bounded most-recent-first list of stored keys.
pub struct StoredFileContext {
    files: RwLock<Vec<String>>,
}

impl StoredFileContext {
    pub fn new() -> Self {
        StoredFileContext {
            files: RwLock::new(Vec::new()),
        }
    }

    /// Track a newly stored key at the front, dropping any earlier
    /// occurrence and evicting the oldest entry on overflow.
    pub fn add(&self, key: &str) {
        let mut files = self.files.write().unwrap();
        files.retain(|k| k != key);
        files.insert(0, key.to_string());
        files.truncate(CAPACITY);
    }

    /// The most recently stored key, if any.
    pub fn last(&self) -> Option<String> {
        self.files.read().unwrap().first().cloned()
    }

    /// Snapshot of all tracked keys, most recent first.
    pub fn list(&self) -> Vec<String> {
        self.files.read().unwrap().clone()
    }
}

impl Default for StoredFileContext {
    fn default() -> Self {
        Self::new()
    }
}
