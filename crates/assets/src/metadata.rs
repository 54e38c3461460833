//! Lookup of remote paths by asset id

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::Result;
use crate::identity::{AssetId, RemotePath};

/// Source of truth mapping asset ids to remote paths.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Remote path recorded for `id`, or `None` when there is no such record.
    ///
    /// Store failures are reported as [`crate::Error::MetadataUnavailable`].
    async fn lookup_remote_path(&self, id: AssetId) -> Result<Option<RemotePath>>;
}

/// In-memory metadata store for tests and manifests.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    records: RwLock<HashMap<AssetId, RemotePath>>,
}

impl MemoryMetadataStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(self, id: impl Into<AssetId>, remote_path: impl Into<RemotePath>) -> Self {
        self.insert(id, remote_path);
        self
    }

    /// Record `remote_path` for `id`, replacing any previous record.
    pub fn insert(&self, id: impl Into<AssetId>, remote_path: impl Into<RemotePath>) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), remote_path.into());
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn lookup_remote_path(&self, id: AssetId) -> Result<Option<RemotePath>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }
}
