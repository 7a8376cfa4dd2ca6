//! In-memory backend
//!
//! DashMap-backed implementation of the `KvBackend` contract, used by the
//! test suite and for ephemeral (non-persistent) runs.

use crate::error::Result;
use crate::storage::backend::KvBackend;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// In-memory key-value backend
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<DashMap<String, String>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    /// Number of keys stored
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the backend holds no keys
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop all keys
    pub fn clear(&self) {
        self.data.clear();
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.data.remove(key);
        }
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.data.iter().map(|e| e.key().clone()).collect())
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>> {
        Ok(keys
            .iter()
            .map(|k| (k.clone(), self.data.get(k).map(|v| v.value().clone())))
            .collect())
    }
}
