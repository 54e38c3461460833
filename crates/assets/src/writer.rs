//! Staged writes that become visible only when complete.
//!
//! Downloads land in a temporary file inside the cache directory and are
//! published with a single rename, so a reader sees either no entry or the
//! whole file.

use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::key::CacheKey;
use crate::{Error, Result};

/// Prefix of every temporary file the cache creates.
pub const TEMP_PREFIX: &str = ".replaydeck-";

/// Suffix of every temporary file the cache creates.
pub const TEMP_SUFFIX: &str = ".partial";

/// A staged download that has not been published yet.
///
/// Dropping the handle without committing removes the temporary file.
#[derive(Debug)]
pub struct TempHandle {
    file: NamedTempFile,
}

impl TempHandle {
    /// Location of the temporary file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Publishes staged files into a cache directory by atomic rename.
#[derive(Debug, Clone)]
pub struct AtomicWriter {
    root: PathBuf,
}

impl AtomicWriter {
    /// Writer for the cache directory at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final location of the entry for `key`.
    #[must_use]
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key)
    }

    /// Create an empty temporary file on the same volume as the cache.
    pub fn stage(&self) -> Result<TempHandle> {
        let file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.root)
            .map_err(|e| Error::cache_io(e, &self.root, "stage"))?;
        debug!(path = ?file.path(), "Staged temporary file");
        Ok(TempHandle { file })
    }

    /// Flush the staged file to disk and rename it to the entry for `key`.
    pub fn commit(&self, handle: TempHandle, key: &CacheKey) -> Result<PathBuf> {
        let dest = self.entry_path(key);
        handle
            .file
            .as_file()
            .sync_all()
            .map_err(|e| Error::cache_io(e, handle.path(), "sync"))?;

        // On failure the temporary file comes back inside the error and is
        // removed when that is dropped.
        handle
            .file
            .persist(&dest)
            .map_err(|e| Error::cache_io(e.error, &dest, "rename"))?;

        debug!(%key, ?dest, "Committed cache entry");
        Ok(dest)
    }

    /// Remove a staged file without publishing it.
    pub fn discard(&self, handle: TempHandle) -> Result<()> {
        let path = handle.path().to_path_buf();
        handle
            .file
            .close()
            .map_err(|e| Error::cache_io(e, &path, "discard"))?;
        debug!(?path, "Discarded temporary file");
        Ok(())
    }
}

/// Whether `name` looks like a temporary file created by this crate.
#[must_use]
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

/// Delete temporary files left behind in `dir` by an interrupted process.
///
/// Returns how many files were removed. Files that cannot be removed are
/// logged and skipped.
pub fn sweep_orphans(dir: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(Error::cache_io(e, dir, "read_dir")),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| Error::cache_io(e, dir, "read_dir"))?;
        let name = entry.file_name();
        if !is_temp_name(&name.to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(?path, "Removed orphaned temporary file");
                removed += 1;
            }
            Err(e) => warn!(?path, error = %e, "Failed to remove orphaned temporary file"),
        }
    }
    Ok(removed)
}
