//! Committed cache entries

use std::path::{Path, PathBuf};

use crate::key::CacheKey;
use crate::{Error, Result};

/// A fully downloaded file in the cache directory.
///
/// Values of this type only exist for entries that were committed, so the
/// file behind `path` is always complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    key: CacheKey,
    path: PathBuf,
    len: u64,
}

impl LocalFile {
    pub(crate) fn new(key: CacheKey, path: PathBuf, len: u64) -> Self {
        Self { key, path, len }
    }

    /// Cache key of the entry.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Absolute location of the entry.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the entry has no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// MIME type guessed from the file extension.
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        let ext = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("mp3") => "audio/mpeg",
            Some("wav") => "audio/wav",
            Some("ogg" | "oga") => "audio/ogg",
            Some("opus") => "audio/opus",
            Some("flac") => "audio/flac",
            Some("m4a") => "audio/mp4",
            Some("aac") => "audio/aac",
            Some("webm") => "audio/webm",
            _ => "application/octet-stream",
        }
    }

    /// Open the entry for reading.
    pub async fn open(&self) -> Result<tokio::fs::File> {
        tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| Error::cache_io(e, &self.path, "open entry"))
    }
}
