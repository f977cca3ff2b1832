//! Content-addressed file storage.
//!
//! Entries are written when a client supplies file content inline and are
//! never evicted while the process runs.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Hex SHA-256 digest of `data`.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Thread-safe `hash -> content` map.
#[derive(Default)]
pub struct ContentStore {
    entries: Mutex<HashMap<String, Arc<str>>>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `content` under `hash`. The first write for a hash wins.
    pub fn insert(&self, hash: &str, content: &str) -> Arc<str> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(hash.to_string())
            .or_insert_with(|| Arc::from(content))
            .clone()
    }

    pub fn get(&self, hash: &str) -> Option<Arc<str>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn first_write_wins() {
        let store = ContentStore::new();
        store.insert("h1", "export const a = 1;");
        let kept = store.insert("h1", "something else");
        assert_eq!(&*kept, "export const a = 1;");
        assert_eq!(store.len(), 1);
        assert!(store.get("h2").is_none());
    }
}
