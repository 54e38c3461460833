//! PostgreSQL-backed [`MetadataStore`] for the replaydeck asset cache.
//!
//! Reads the remote path of an audio record from the `audios` table:
//!
//! ```sql
//! SELECT path FROM audios WHERE audio_id = $1
//! ```
//!
//! The schema and the pool lifecycle belong to the surrounding service; this
//! crate only issues the lookup.

use async_trait::async_trait;
use replaydeck_assets::{AssetId, Error, MetadataStore, RemotePath, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

const LOOKUP_REMOTE_PATH: &str = "SELECT path FROM audios WHERE audio_id = $1";

/// Metadata store reading from the `audios` table.
#[derive(Debug, Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a small pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| Error::metadata(format!("connecting to PostgreSQL failed: {e}")))?;
        info!("Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn lookup_remote_path(&self, id: AssetId) -> Result<Option<RemotePath>> {
        let path: Option<String> = sqlx::query_scalar(LOOKUP_REMOTE_PATH)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::metadata(format!("looking up audio {id} failed: {e}")))?;

        debug!(%id, found = path.is_some(), "Looked up remote path");
        Ok(path.map(RemotePath::from))
    }
}
