//! Process-local cache backend.

use crate::cache::Cache;
use crate::error::CacheError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryCache {
    inner: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str, subkey: &str) -> bool {
        self.inner
            .read()
            .get(key)
            .map(|h| h.contains_key(subkey))
            .unwrap_or(false)
    }

    /// Sub-keys currently stored under a hash key, sorted.
    pub fn subkeys(&self, key: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .inner
            .read()
            .get(key)
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_many(&self, key: &str, subkeys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        let inner = self.inner.read();
        let hash = inner.get(key);
        Ok(subkeys
            .iter()
            .map(|s| hash.and_then(|h| h.get(s)).cloned())
            .collect())
    }

    async fn set_many(&self, key: &str, entries: Vec<(String, Vec<u8>)>) -> Result<(), CacheError> {
        self.inner.write().entry(key.to_string()).or_default().extend(entries);
        Ok(())
    }

    async fn evict(&self, key: &str, subkeys: &[String]) -> Result<(), CacheError> {
        let mut inner = self.inner.write();
        if let Some(hash) = inner.get_mut(key) {
            for s in subkeys {
                hash.remove(s);
            }
            if hash.is_empty() {
                inner.remove(key);
            }
        }
        Ok(())
    }
}
