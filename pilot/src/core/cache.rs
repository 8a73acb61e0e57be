//! In-memory prompt cache keyed by the exact formatted prompt.
//!
//! Process-scoped and never evicted. A retry prompt carries the failure
//! diagnostic, so it never collides with the first-attempt prompt.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tracing::debug;

/// Compute a short hash of content for log fields.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8]) // First 8 bytes = 16 hex chars
}

#[derive(Debug, Default)]
pub struct PromptCache {
    entries: HashMap<String, String>,
    hits: u64,
    misses: u64,
}

impl PromptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a prompt, counting the hit or miss.
    pub fn get(&mut self, prompt: &str) -> Option<&str> {
        match self.entries.get(prompt) {
            Some(completion) => {
                self.hits += 1;
                debug!(key = %content_hash(prompt), "prompt cache hit");
                Some(completion.as_str())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, prompt: String, completion: String) {
        debug!(key = %content_hash(&prompt), "prompt cache store");
        self.entries.insert(prompt, completion);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_deterministic() {
        let hash1 = content_hash("Hello, world!");
        let hash2 = content_hash("Hello, world!");
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 16);
        assert_ne!(content_hash("Hello"), content_hash("World"));
    }

    #[test]
    fn get_counts_hits_and_misses() {
        let mut cache = PromptCache::new();
        assert!(cache.get("prompt").is_none());
        cache.insert("prompt".to_string(), "wait(1)".to_string());
        assert_eq!(cache.get("prompt"), Some("wait(1)"));
        assert!(cache.get("prompt ").is_none());
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 2);
        assert_eq!(cache.len(), 1);
    }
}
