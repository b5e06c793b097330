use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use turnstile_core::{StateBlob, StateStore};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS turn_state (
    key TEXT PRIMARY KEY NOT NULL,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

/// SQLite-backed state store. Blobs are kept as JSON text, one row per key.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file at `db_path`.
    pub async fn open(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref();
        info!("Connecting to database: {}", db_path.display());

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::init(pool).await
    }

    /// A private in-memory database, gone once the store is dropped.
    pub async fn in_memory() -> anyhow::Result<Self> {
        // Every connection to `:memory:` is its own database, so keep exactly one alive.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        info!("State store initialized");
        Ok(Self { pool })
    }

    /// All stored keys, sorted.
    pub async fn keys(&self) -> anyhow::Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>("SELECT key FROM turn_state ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load(&self, key: &str) -> anyhow::Result<StateBlob> {
        let data = sqlx::query_scalar::<_, String>("SELECT data FROM turn_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match data {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(StateBlob::new()),
        }
    }

    async fn save(&self, key: &str, blob: &StateBlob) -> anyhow::Result<()> {
        let json = serde_json::to_string(blob)?;

        sqlx::query(
            "INSERT INTO turn_state (key, data, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(json)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        debug!("Saved state: {key}");
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM turn_state WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        info!("Cleared state: {key}");
        Ok(())
    }
}
