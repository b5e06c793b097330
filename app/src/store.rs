//! State store selected by configuration.

use async_trait::async_trait;
use tracing::info;
use turnstile_config::{StoreConfig, StoreKind};
use turnstile_core::{StateBlob, StateStore};
use turnstile_session::{MemoryStore, SqliteStore};

pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub async fn open(config: &StoreConfig) -> anyhow::Result<Self> {
        match config.kind {
            StoreKind::Memory => {
                info!("Using in-memory state store");
                Ok(Self::Memory(MemoryStore::new()))
            }
            StoreKind::Sqlite => {
                let path = config.resolved_path()?;
                Ok(Self::Sqlite(SqliteStore::open(path).await?))
            }
        }
    }

    pub async fn keys(&self) -> anyhow::Result<Vec<String>> {
        match self {
            Self::Memory(store) => Ok(store.keys().await),
            Self::Sqlite(store) => store.keys().await,
        }
    }
}

#[async_trait]
impl StateStore for Store {
    async fn load(&self, key: &str) -> anyhow::Result<StateBlob> {
        match self {
            Self::Memory(store) => store.load(key).await,
            Self::Sqlite(store) => store.load(key).await,
        }
    }

    async fn save(&self, key: &str, blob: &StateBlob) -> anyhow::Result<()> {
        match self {
            Self::Memory(store) => store.save(key, blob).await,
            Self::Sqlite(store) => store.save(key, blob).await,
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        match self {
            Self::Memory(store) => store.delete(key).await,
            Self::Sqlite(store) => store.delete(key).await,
        }
    }
}
