//! File-persistent backend
//!
//! Stores the whole key space as a single JSON object on disk. The map is
//! loaded once at open and every mutation rewrites the file (write to a
//! sibling `.tmp` file, then rename). Durability is whatever the filesystem
//! gives a completed rename — nothing more is promised upstream.

use crate::error::{Error, Result};
use crate::storage::backend::KvBackend;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// JSON-file-backed key-value backend
pub struct FileBackend {
    path: PathBuf,
    map: RwLock<HashMap<String, String>>,
}

impl FileBackend {
    /// Open (or create) the backing file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let map = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str::<HashMap<String, String>>(&contents)
                .map_err(|e| Error::Storage(format!("Corrupt data file {}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), keys = map.len(), "Opened file backend");

        Ok(Self {
            path,
            map: RwLock::new(map),
        })
    }

    /// Rewrite the backing file from the given snapshot.
    ///
    /// Callers must hold the write lock across both the map mutation and
    /// this rewrite so concurrent mutations persist in order.
    async fn persist(&self, map: &HashMap<String, String>) -> Result<()> {
        let contents = serde_json::to_string(map)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), keys = map.len(), "Persisted file backend");
        Ok(())
    }
}

#[async_trait]
impl KvBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.map.write().await;
        map.insert(key.to_string(), value.to_string());
        self.persist(&map).await
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        let mut map = self.map.write().await;
        let mut removed = false;
        for key in keys {
            removed |= map.remove(key).is_some();
        }
        if removed {
            self.persist(&map).await?;
        }
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.map.read().await.keys().cloned().collect())
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>> {
        let map = self.map.read().await;
        Ok(keys
            .iter()
            .map(|k| (k.clone(), map.get(k).cloned()))
            .collect())
    }
}
