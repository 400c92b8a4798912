use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::errors::{AuthError, Result};

/// Pluggable key-value store backing the token cache
///
/// The cache makes no durability assumptions beyond the current session;
/// hosts pick a scope via [`crate::CacheLocation`] and supply a matching
/// implementation.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Keys currently present in the store
    async fn keys(&self) -> Vec<String>;
}

/// In-memory store for session-scoped caching and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().ok()?.get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| AuthError::Storage("lock poisoned".to_string()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| AuthError::Storage("lock poisoned".to_string()))?
            .remove(key);
        Ok(())
    }

    async fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .ok()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let storage = MemoryStorage::new();
        assert!(storage.get("k").await.is_none());

        storage.set("k", "v").await.unwrap();
        assert_eq!(storage.get("k").await.as_deref(), Some("v"));

        storage.set("k", "v2").await.unwrap();
        assert_eq!(storage.get("k").await.as_deref(), Some("v2"));

        storage.remove("k").await.unwrap();
        assert!(storage.get("k").await.is_none());

        // removing again is idempotent
        storage.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_lists_entries() {
        let storage = MemoryStorage::new();
        storage.set("a", "1").await.unwrap();
        storage.set("b", "2").await.unwrap();

        let mut keys = storage.keys().await;
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
