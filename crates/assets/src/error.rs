//! Error types for the asset cache

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::identity::AssetId;

/// Error type for asset cache operations.
///
/// Every variant is cheap to clone so that a single fetch outcome can be
/// handed to all callers that waited on it.
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum Error {
    /// The metadata store has no record for the requested asset
    #[error("Asset {id} not found")]
    #[diagnostic(
        code(replaydeck::assets::asset_not_found),
        help("Check that the asset id exists in the metadata store")
    )]
    AssetNotFound {
        /// The identifier that was looked up
        id: AssetId,
    },

    /// The remote path cannot be mapped to a local cache key
    #[error("Invalid asset path '{path}': {reason}")]
    #[diagnostic(code(replaydeck::assets::invalid_path))]
    InvalidAssetPath {
        /// The offending remote path
        path: String,
        /// Why the path was rejected
        reason: String,
    },

    /// The remote host rejected our credentials or failed host verification
    #[error("Authentication failed for '{host}': {message}")]
    #[diagnostic(
        code(replaydeck::assets::auth_failed),
        help("Check the configured remote credentials and host key policy")
    )]
    AuthenticationFailed {
        /// Remote host name
        host: String,
        /// Details reported by the transport
        message: String,
    },

    /// The remote path does not exist on the remote host
    #[error("Remote file '{path}' not found on '{host}'")]
    #[diagnostic(code(replaydeck::assets::remote_not_found))]
    RemoteNotFound {
        /// Remote host name
        host: String,
        /// Remote path that was requested
        path: String,
    },

    /// Connection dropped, timed out, or failed mid-transfer
    #[error("Transport error: {message}")]
    #[diagnostic(code(replaydeck::assets::transport))]
    Transport {
        /// Error message describing the failure
        message: String,
    },

    /// Local disk failure while staging, committing or discarding a file
    #[error("Cache I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(replaydeck::assets::io),
        help("Check permissions and free space in the cache directory")
    )]
    CacheIo {
        /// The underlying I/O error
        #[source]
        source: Arc<std::io::Error>,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "stage", "rename", "read claim")
        operation: String,
    },

    /// The metadata store could not be queried
    #[error("Metadata store unavailable: {message}")]
    #[diagnostic(code(replaydeck::assets::metadata))]
    MetadataUnavailable {
        /// Error message from the store
        message: String,
    },

    /// Invalid cache or transport configuration
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(replaydeck::assets::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl Error {
    /// Create an asset-not-found error
    #[must_use]
    pub fn asset_not_found(id: AssetId) -> Self {
        Self::AssetNotFound { id }
    }

    /// Create an invalid asset path error
    #[must_use]
    pub fn invalid_asset_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAssetPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an authentication error
    #[must_use]
    pub fn authentication_failed(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create a remote-not-found error
    #[must_use]
    pub fn remote_not_found(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self::RemoteNotFound {
            host: host.into(),
            path: path.into(),
        }
    }

    /// Create a transport error
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a cache I/O error with path context
    #[must_use]
    pub fn cache_io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::CacheIo {
            source: Arc::new(source),
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create a metadata store error
    #[must_use]
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::MetadataUnavailable {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error came from talking to the remote host.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::RemoteNotFound { .. } | Self::Transport { .. }
        )
    }
}

/// Result type for asset cache operations
pub type Result<T> = std::result::Result<T, Error>;
