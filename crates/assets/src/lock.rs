//! Advisory lock on a cache directory.
//!
//! Every open [`AssetCache`](crate::AssetCache) holds a shared lock on
//! `<cache>/.lock` for its whole lifetime. Deleting orphaned temporary files
//! takes the exclusive lock, so a sweep never removes the staged download of
//! a process that is still running.

use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::{Error, Result};

/// Lock file inside the cache directory.
pub const LOCK_FILE: &str = ".lock";

/// A held lock on a cache directory, released on drop.
#[derive(Debug)]
pub struct DirLock {
    _file: File,
}

impl DirLock {
    /// Share `root` with other open caches. Waits while a sweep holds it.
    pub fn shared(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE);
        let file = open_lock_file(&path)?;
        FileExt::lock_shared(&file).map_err(|e| Error::cache_io(e, &path, "lock shared"))?;
        Ok(Self { _file: file })
    }

    /// Take `root` for exclusive use, or `None` while any cache has it open.
    pub fn try_exclusive(root: &Path) -> Result<Option<Self>> {
        let path = root.join(LOCK_FILE);
        let file = open_lock_file(&path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(true) => Ok(Some(Self { _file: file })),
            Ok(false) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::cache_io(e, &path, "lock exclusive")),
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| Error::cache_io(e, path, "open lock"))
}
