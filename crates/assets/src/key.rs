//! Cache key derivation and collision detection.
//!
//! A remote asset is cached under the final component of its remote path, so
//! `/remote/demos/foo.mp3` lands at `<cache-dir>/foo.mp3`. Two different
//! remote paths can share a final component; the first one to claim a key
//! owns it and later paths are moved to a hash-qualified key such as
//! `foo-3f1c9a0b2d4e6f81.mp3`.
//!
//! Ownership is recorded under `<cache-dir>/.claims/<key>`, one small file per
//! key holding the remote path that owns it. Claims are published with
//! no-clobber semantics so two racing claimants cannot both win.

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::identity::RemotePath;
use crate::writer::{TEMP_PREFIX, TEMP_SUFFIX};
use crate::{Error, Result};

/// Directory (relative to the cache root) holding key claims.
pub const CLAIMS_DIR: &str = ".claims";

/// Longest file name most filesystems accept.
pub const MAX_KEY_LEN: usize = 255;

/// Hex characters of the remote-path digest used to qualify colliding keys.
const QUALIFIER_HEX_LEN: usize = 16;

/// Filesystem-safe name of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// The key as a file name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hash-qualified key for `remote`, used when the bare key is taken.
    ///
    /// `foo.mp3` becomes `foo-<digest>.mp3` where `<digest>` is the first 16
    /// hex characters of the SHA-256 of the full remote path.
    pub fn qualified(remote: &RemotePath) -> Result<Self> {
        let bare = resolve(remote)?;
        let digest = Sha256::digest(remote.as_str().as_bytes());
        let tag = hex::encode(&digest[..QUALIFIER_HEX_LEN / 2]);

        let (stem, ext) = match bare.0.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (bare.0.as_str(), None),
        };

        // Keep the qualified name within MAX_KEY_LEN by shortening the stem.
        let reserved = 1 + tag.len() + ext.map_or(0, |e| e.len() + 1);
        let stem = truncate_on_char_boundary(stem, MAX_KEY_LEN.saturating_sub(reserved));

        let name = match ext {
            Some(ext) => format!("{stem}-{tag}.{ext}"),
            None => format!("{stem}-{tag}"),
        };
        Ok(Self(name))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<Path> for CacheKey {
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}

/// Derive the cache key for a remote path.
///
/// Pure and deterministic: the same path always yields the same key. Paths
/// that cannot be mapped to a local file name unambiguously are rejected
/// rather than sanitized.
pub fn resolve(remote: &RemotePath) -> Result<CacheKey> {
    let raw = remote.as_str();
    let reject = |reason: &str| Error::invalid_asset_path(raw, reason);

    if raw.is_empty() {
        return Err(reject("path is empty"));
    }
    if !raw.starts_with('/') {
        return Err(reject("path must be absolute"));
    }
    if raw.chars().any(char::is_control) {
        return Err(reject("path contains control characters"));
    }
    if raw.contains('\\') {
        return Err(reject("path contains a backslash"));
    }
    if raw.split('/').any(|c| c == "." || c == "..") {
        return Err(reject("path contains relative components"));
    }

    let name = raw.rsplit('/').next().unwrap_or_default();
    if name.is_empty() {
        return Err(reject("path has no file name"));
    }
    if name.starts_with('.') {
        return Err(reject("file name must not start with '.'"));
    }
    if name.len() > MAX_KEY_LEN {
        return Err(reject("file name is too long"));
    }

    Ok(CacheKey(name.to_string()))
}

fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Ledger of which remote path owns which cache key.
#[derive(Debug, Clone)]
pub struct KeyClaims {
    dir: PathBuf,
}

impl KeyClaims {
    /// Claims stored under `<cache_root>/.claims`.
    #[must_use]
    pub fn new(cache_root: &Path) -> Self {
        Self {
            dir: cache_root.join(CLAIMS_DIR),
        }
    }

    /// Directory holding the claim files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ensure the claims directory exists.
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::cache_io(e, &self.dir, "create_dir_all"))
    }

    /// Return the key owned by `remote`, claiming one if necessary.
    ///
    /// A path that already owns its hash-qualified key keeps it, even if the
    /// bare key has since been released. Otherwise the bare key is used when
    /// it is free or already owned by `remote`, and the qualified key when
    /// it is not.
    pub fn claim(&self, remote: &RemotePath) -> Result<CacheKey> {
        let bare = resolve(remote)?;
        let qualified = CacheKey::qualified(remote)?;
        if self.owner(&qualified)?.as_ref() == Some(remote) {
            return Ok(qualified);
        }
        if self.try_claim(&bare, remote)? {
            return Ok(bare);
        }

        debug!(%remote, %bare, %qualified, "Cache key collision, using qualified key");
        if self.try_claim(&qualified, remote)? {
            return Ok(qualified);
        }

        Err(Error::invalid_asset_path(
            remote.as_str(),
            format!("cache keys '{bare}' and '{qualified}' are owned by other remote paths"),
        ))
    }

    /// Drop the claim on `key` if `remote` owns it.
    ///
    /// Only for keys with no committed entry. Returns whether a claim was
    /// removed.
    pub fn release(&self, key: &CacheKey, remote: &RemotePath) -> Result<bool> {
        if self.owner(key)?.as_ref() != Some(remote) {
            return Ok(false);
        }
        let path = self.dir.join(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(%remote, %key, "Released cache key");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::cache_io(e, &path, "release claim")),
        }
    }

    /// Remote path that owns `key`, if any.
    pub fn owner(&self, key: &CacheKey) -> Result<Option<RemotePath>> {
        let path = self.dir.join(key);
        match std::fs::read_to_string(&path) {
            Ok(owner) => Ok(Some(RemotePath::new(owner))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::cache_io(e, &path, "read claim")),
        }
    }

    /// Returns whether `remote` owns `key` after this call.
    fn try_claim(&self, key: &CacheKey, remote: &RemotePath) -> Result<bool> {
        if let Some(owner) = self.owner(key)? {
            return Ok(owner == *remote);
        }

        let mut staged = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| Error::cache_io(e, &self.dir, "stage claim"))?;
        staged
            .write_all(remote.as_str().as_bytes())
            .and_then(|()| staged.as_file().sync_all())
            .map_err(|e| Error::cache_io(e, staged.path(), "write claim"))?;

        let path = self.dir.join(key);
        match staged.persist_noclobber(&path) {
            Ok(_) => {
                debug!(%remote, %key, "Claimed cache key");
                Ok(true)
            }
            Err(err) if err.error.kind() == std::io::ErrorKind::AlreadyExists => {
                // Lost the race to another claimant; the winner's claim is complete.
                Ok(self.owner(key)?.is_some_and(|owner| owner == *remote))
            }
            Err(err) => {
                warn!(%key, error = %err.error, "Failed to publish cache key claim");
                Err(Error::cache_io(err.error, &path, "publish claim"))
            }
        }
    }
}
