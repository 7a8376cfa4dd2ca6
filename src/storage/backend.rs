//! Key-value backend trait

use crate::error::Result;
use async_trait::async_trait;

/// Flat key-value backend contract.
///
/// String keys, string values, no transactions. `multi_get` returns one pair
/// per requested key, preserving request order, with `None` for absent keys.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove every listed key. Missing keys are ignored.
    async fn remove_many(&self, keys: &[String]) -> Result<()>;

    /// Enumerate all keys currently present. Order is unspecified.
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Batch read. One `(key, value)` pair per requested key, request order.
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>>;
}

/// Main storage interface
pub struct Storage {
    backend: Box<dyn KvBackend>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish()
    }
}

impl Storage {
    pub fn new(backend: Box<dyn KvBackend>) -> Self {
        Self { backend }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.backend.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.backend.set(key, value).await
    }

    pub async fn remove_many(&self, keys: &[String]) -> Result<()> {
        self.backend.remove_many(keys).await
    }

    pub async fn list_keys(&self) -> Result<Vec<String>> {
        self.backend.list_keys().await
    }

    pub async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>> {
        self.backend.multi_get(keys).await
    }
}
