//! Identity of a remote asset as issued by the metadata store

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of an asset record (the `audio_id` column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(i64);

impl AssetId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw identifier value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for AssetId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Absolute path of an asset on the remote host.
///
/// Stored exactly as the metadata store returned it; validation happens when
/// the path is turned into a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemotePath(String);

impl RemotePath {
    /// Wrap a remote path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RemotePath {
    fn from(path: String) -> Self {
        Self(path)
    }
}

impl From<&str> for RemotePath {
    fn from(path: &str) -> Self {
        Self(path.to_string())
    }
}

impl AsRef<str> for RemotePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An asset id together with the remote path it points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetIdentity {
    /// Metadata identifier
    pub id: AssetId,
    /// Location on the remote host
    pub remote_path: RemotePath,
}

impl AssetIdentity {
    /// Pair an id with its remote path.
    #[must_use]
    pub fn new(id: AssetId, remote_path: impl Into<RemotePath>) -> Self {
        Self {
            id,
            remote_path: remote_path.into(),
        }
    }
}
