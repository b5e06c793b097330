use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use turnstile_core::{StateBlob, StateStore};

/// Process-local state store. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, StateBlob>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, key: &str) -> anyhow::Result<StateBlob> {
        Ok(self.blobs.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn save(&self, key: &str, blob: &StateBlob) -> anyhow::Result<()> {
        self.blobs.write().await.insert(key.to_owned(), blob.clone());
        debug!("Saved state: {key}");
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.blobs.write().await.remove(key);
        debug!("Deleted state: {key}");
        Ok(())
    }
}
