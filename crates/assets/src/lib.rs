//! On-demand cache of remote audio assets.
//!
//! Asset bytes live on a remote host and are copied into a local cache
//! directory the first time they are requested:
//!
//! - [`key`] maps a remote path to a local file name and detects collisions
//! - [`transport`] copies one remote file over HTTPS or SFTP
//! - [`writer`] stages downloads and publishes them with an atomic rename
//! - [`flight`] makes concurrent requests for one key share a single transfer
//! - [`lock`] keeps orphan sweeps away from directories in use
//! - [`AssetCache`] ties these together behind `get_local_file`
//!
//! ```no_run
//! use std::sync::Arc;
//! use replaydeck_assets::{AssetCache, AssetId, CacheConfig, MemoryMetadataStore};
//!
//! # async fn run() -> replaydeck_assets::Result<()> {
//! let config = CacheConfig::load("replaydeck.toml".as_ref())?;
//! let metadata = Arc::new(MemoryMetadataStore::new().with(42, "/remote/demos/foo.mp3"));
//! let cache = AssetCache::from_config(&config, metadata)?;
//! let file = cache.get_local_file(AssetId::new(42)).await?;
//! println!("{} ({} bytes)", file.path().display(), file.len());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod flight;
pub mod identity;
pub mod key;
pub mod lock;
pub mod metadata;
pub mod transport;
pub mod writer;

pub use cache::{AssetCache, sweep_cache_dir};
pub use config::{AuthConfig, CacheConfig, Protocol, RemoteConfig, default_cache_dir};
pub use entry::LocalFile;
pub use error::{Error, Result};
pub use identity::{AssetId, AssetIdentity, RemotePath};
pub use key::{CacheKey, KeyClaims, resolve};
pub use metadata::{MemoryMetadataStore, MetadataStore};
pub use transport::{Credentials, HostKeyPolicy, HttpsTransport, RemoteHost, Transport};
#[cfg(feature = "sftp")]
pub use transport::SftpTransport;
