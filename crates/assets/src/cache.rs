//! The on-demand asset cache.
//!
//! `get_local_file` turns an asset id into a complete local file, fetching it
//! from the remote host on first use. Concurrent requests for the same entry
//! share one transfer, failed transfers leave nothing behind, and a committed
//! entry is reused for the lifetime of the cache directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::entry::LocalFile;
use crate::flight::SingleFlight;
use crate::identity::{AssetId, AssetIdentity, RemotePath};
use crate::key::{self, CacheKey, KeyClaims};
use crate::lock::DirLock;
use crate::metadata::MetadataStore;
use crate::transport::{self, RemoteHost, Transport};
use crate::writer::{self, AtomicWriter};
use crate::{Error, Result};

/// Cache of remote assets in a local directory.
///
/// Cheap to clone; clones share the directory and the in-flight registry.
#[derive(Clone)]
pub struct AssetCache {
    inner: Arc<Inner>,
}

struct Inner {
    _lock: DirLock,
    writer: AtomicWriter,
    claims: KeyClaims,
    metadata: Arc<dyn MetadataStore>,
    transport: Arc<dyn Transport>,
    host: RemoteHost,
    fetch_timeout: Duration,
    flight: SingleFlight<CacheKey, LocalFile>,
}

impl AssetCache {
    /// Open the cache described by `config`.
    ///
    /// Creates the cache directory if needed and removes temporary files left
    /// behind by an earlier process. The sweep is skipped while another
    /// process has the directory open.
    pub fn open(
        config: &CacheConfig,
        metadata: Arc<dyn MetadataStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let root = config.cache_dir.clone();
        std::fs::create_dir_all(&root).map_err(|e| Error::cache_io(e, &root, "create_dir_all"))?;
        let claims = KeyClaims::new(&root);
        claims.ensure_dir()?;

        match DirLock::try_exclusive(&root)? {
            Some(_exclusive) => {
                let removed = sweep_unlocked(&root)?;
                if removed > 0 {
                    info!(removed, ?root, "Removed orphaned temporary files");
                }
            }
            None => debug!(?root, "Cache directory in use, skipping orphan sweep"),
        }
        let lock = DirLock::shared(&root)?;

        let cache = Self {
            inner: Arc::new(Inner {
                _lock: lock,
                writer: AtomicWriter::new(root),
                claims,
                metadata,
                transport,
                host: config.remote.remote_host(),
                fetch_timeout: config.fetch_timeout(),
                flight: SingleFlight::new(),
            }),
        };

        debug!(
            root = ?cache.root(),
            transport = cache.inner.transport.name(),
            "Asset cache opened"
        );
        Ok(cache)
    }

    /// Open the cache with the transport selected by `config.remote`.
    pub fn from_config(config: &CacheConfig, metadata: Arc<dyn MetadataStore>) -> Result<Self> {
        let transport = transport::from_config(&config.remote)?;
        Self::open(config, metadata, transport)
    }

    /// The cache directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.inner.writer.root()
    }

    /// Local copy of the asset `id`, fetched from the remote host if needed.
    pub async fn get_local_file(&self, id: AssetId) -> Result<LocalFile> {
        let remote_path = self
            .inner
            .metadata
            .lookup_remote_path(id)
            .await?
            .ok_or_else(|| Error::asset_not_found(id))?;
        self.get_local_file_for(&AssetIdentity::new(id, remote_path))
            .await
    }

    /// Like [`get_local_file`](Self::get_local_file) for a caller that
    /// already knows the remote path.
    pub async fn get_local_file_for(&self, identity: &AssetIdentity) -> Result<LocalFile> {
        let remote_path = identity.remote_path.clone();
        let key = self.claim(remote_path.clone()).await?;

        if let Some(file) = self.lookup(&key).await? {
            debug!(id = %identity.id, %key, "Cache hit");
            return Ok(file);
        }

        debug!(id = %identity.id, %key, %remote_path, "Cache miss");
        let inner = Arc::clone(&self.inner);
        let fetch_key = key.clone();
        self.inner
            .flight
            .fetch_once(key, move || inner.populate(fetch_key, remote_path))
            .await
    }

    /// The committed entry for `key`, if there is one.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<LocalFile>> {
        self.inner.lookup(key).await
    }

    async fn claim(&self, remote_path: RemotePath) -> Result<CacheKey> {
        let claims = self.inner.claims.clone();
        tokio::task::spawn_blocking(move || claims.claim(&remote_path))
            .await
            .map_err(|e| Error::transport(format!("key claim task failed: {e}")))?
    }
}

/// Delete orphaned temporary files from the cache directory at `root`,
/// including its claims ledger, without opening a cache.
///
/// Refuses with a [`CacheIo`](Error::CacheIo) error while any process has
/// the directory open, since its staged downloads look like orphans. A
/// missing directory has nothing to sweep.
pub fn sweep_cache_dir(root: &Path) -> Result<usize> {
    if !root.is_dir() {
        return Ok(0);
    }
    let Some(_exclusive) = DirLock::try_exclusive(root)? else {
        return Err(Error::cache_io(
            std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "cache directory is in use by a running cache",
            ),
            root,
            "sweep",
        ));
    };
    sweep_unlocked(root)
}

fn sweep_unlocked(root: &Path) -> Result<usize> {
    let entries = writer::sweep_orphans(root)?;
    let claims = writer::sweep_orphans(&root.join(key::CLAIMS_DIR))?;
    Ok(entries + claims)
}

impl fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetCache")
            .field("root", &self.root())
            .field("transport", &self.inner.transport.name())
            .field("host", &self.inner.host.host)
            .field("fetch_timeout", &self.inner.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<LocalFile>> {
        let path = self.writer.entry_path(key);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(LocalFile::new(key.clone(), path, meta.len()))),
            Ok(_) => Err(Error::cache_io(
                std::io::Error::other("cache entry is not a regular file"),
                &path,
                "stat",
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::cache_io(e, &path, "stat")),
        }
    }

    /// Download `remote_path` into the entry for `key`.
    ///
    /// Runs once per key at a time under the single-flight registry.
    async fn populate(self: Arc<Self>, key: CacheKey, remote_path: RemotePath) -> Result<LocalFile> {
        // A fetch that finished between our presence check and registering
        // the ticket has already committed the entry.
        if let Some(file) = self.lookup(&key).await? {
            debug!(%key, "Entry committed by an earlier fetch");
            return Ok(file);
        }

        let handle = self.writer.stage()?;
        info!(
            %key,
            %remote_path,
            host = %self.host.host,
            transport = self.transport.name(),
            "Fetching remote asset"
        );
        let started = Instant::now();

        let copied = match tokio::time::timeout(
            self.fetch_timeout,
            self.transport.copy_to_local(
                &self.host,
                &remote_path,
                handle.path(),
                self.fetch_timeout,
            ),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::transport(format!(
                "fetching {remote_path} timed out after {}s",
                self.fetch_timeout.as_secs()
            ))),
        };

        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(discard_err) = self.writer.discard(handle) {
                    warn!(%key, error = %discard_err, "Failed to discard temporary file");
                }
                warn!(%key, %remote_path, error = %e, "Fetch failed");
                if matches!(e, Error::RemoteNotFound { .. }) {
                    self.release_claim(key, remote_path).await;
                }
                return Err(e);
            }
        };

        let writer = self.writer.clone();
        let commit_key = key.clone();
        let path: PathBuf = tokio::task::spawn_blocking(move || writer.commit(handle, &commit_key))
            .await
            .map_err(|e| Error::transport(format!("commit task failed: {e}")))??;

        info!(
            %key,
            bytes,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Cached remote asset"
        );
        Ok(LocalFile::new(key, path, bytes))
    }

    /// Hand `key` back when `remote_path` turned out not to exist, so a
    /// colliding path that does exist can still get the bare key.
    async fn release_claim(&self, key: CacheKey, remote_path: RemotePath) {
        let claims = self.claims.clone();
        match tokio::task::spawn_blocking(move || claims.release(&key, &remote_path)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(error = %err, "Failed to release cache key claim"),
            Err(err) => warn!(error = %err, "Claim release task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Protocol, RemoteConfig};
    use crate::metadata::MemoryMetadataStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Fixed {
        body: Vec<u8>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn copy_to_local(
            &self,
            _host: &RemoteHost,
            _remote_path: &RemotePath,
            dest: &Path,
            _timeout: Duration,
        ) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(dest, &self.body)
                .await
                .map_err(|e| Error::cache_io(e, dest, "write"))?;
            Ok(self.body.len() as u64)
        }
    }

    fn open(temp: &TempDir, body: &[u8]) -> (AssetCache, Arc<Fixed>) {
        let config = CacheConfig::new(RemoteConfig::new(Protocol::Https, "media.example.com"))
            .with_cache_dir(temp.path().join("cache"));
        let metadata = Arc::new(MemoryMetadataStore::new().with(1, "/remote/a.ogg"));
        let transport = Arc::new(Fixed {
            body: body.to_vec(),
            calls: AtomicUsize::new(0),
        });
        let cache = AssetCache::open(&config, metadata, transport.clone()).unwrap();
        (cache, transport)
    }

    #[tokio::test]
    async fn test_open_creates_layout() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = open(&temp, b"");
        assert!(cache.root().is_dir());
        assert!(cache.root().join(key::CLAIMS_DIR).is_dir());
        assert!(cache.root().join(crate::lock::LOCK_FILE).is_file());
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let temp = TempDir::new().unwrap();
        let (cache, transport) = open(&temp, b"OggS");

        let first = cache.get_local_file(AssetId::new(1)).await.unwrap();
        let second = cache.get_local_file(AssetId::new(1)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert_eq!(first.content_type(), "audio/ogg");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lookup_without_entry() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = open(&temp, b"");
        let key = key::resolve(&RemotePath::from("/remote/a.ogg")).unwrap();
        assert!(cache.lookup(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_in_place_of_entry_is_io_error() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = open(&temp, b"");
        std::fs::create_dir(cache.root().join("a.ogg")).unwrap();
        let err = cache.get_local_file(AssetId::new(1)).await.unwrap_err();
        assert!(matches!(err, Error::CacheIo { .. }));
    }
}
