//! Subcommand implementations

use replaydeck_assets::{
    AssetCache, AssetId, AssetIdentity, CacheKey, Error, MemoryMetadataStore, MetadataStore,
    RemotePath, resolve, sweep_cache_dir,
};
use replaydeck_postgres::PgMetadataStore;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::{Cli, CliError, Commands};
use crate::settings::{self, Overrides};

/// Result of `replaydeck fetch`.
#[derive(Debug, Serialize)]
pub struct FetchOutput {
    /// Asset id
    pub id: i64,
    /// Cache key of the entry
    pub key: String,
    /// Local path of the entry
    pub path: PathBuf,
    /// Size in bytes
    pub bytes: u64,
    /// Guessed MIME type
    pub content_type: &'static str,
}

impl fmt::Display for FetchOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.path.display(), self.bytes)
    }
}

/// Result of `replaydeck resolve`.
#[derive(Debug, Serialize)]
pub struct ResolveOutput {
    /// The remote path given
    pub remote_path: String,
    /// Key used when no other remote path owns it
    pub key: String,
    /// Key used when the bare key is taken
    pub qualified_key: String,
}

impl fmt::Display for ResolveOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "key:           {}", self.key)?;
        write!(f, "qualified key: {}", self.qualified_key)
    }
}

/// Result of `replaydeck sweep`.
#[derive(Debug, Serialize)]
pub struct SweepOutput {
    /// Cache directory swept
    pub cache_dir: PathBuf,
    /// Number of temporary files removed
    pub removed: usize,
}

impl fmt::Display for SweepOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "removed {} orphaned temporary file(s) from {}",
            self.removed,
            self.cache_dir.display()
        )
    }
}

/// Outcome of any subcommand.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Output {
    /// `fetch`
    Fetch(FetchOutput),
    /// `resolve`
    Resolve(ResolveOutput),
    /// `sweep`
    Sweep(SweepOutput),
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(out) => fmt::Display::fmt(out, f),
            Self::Resolve(out) => fmt::Display::fmt(out, f),
            Self::Sweep(out) => fmt::Display::fmt(out, f),
        }
    }
}

/// Run the parsed command line.
pub async fn execute(cli: &Cli) -> Result<Output, CliError> {
    let overrides = Overrides::from(cli);
    let config_path = cli.config.as_deref();

    match &cli.command {
        Commands::Fetch {
            id,
            remote_path,
            database_url,
        } => fetch(
            config_path,
            &overrides,
            AssetId::new(*id),
            remote_path.as_deref(),
            database_url.as_deref(),
        )
        .await
        .map(Output::Fetch),
        Commands::Resolve { remote_path } => resolve_keys(remote_path).map(Output::Resolve),
        Commands::Sweep => sweep(config_path, &overrides).map(Output::Sweep),
    }
}

/// Fetch `id` into the cache.
///
/// With `remote_path` the metadata lookup is skipped; otherwise the path is
/// read from PostgreSQL.
pub async fn fetch(
    config_path: Option<&Path>,
    overrides: &Overrides,
    id: AssetId,
    remote_path: Option<&str>,
    database_url: Option<&str>,
) -> Result<FetchOutput, CliError> {
    let config = settings::load(config_path, overrides)?;

    let file = if let Some(remote_path) = remote_path {
        let metadata: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
        let cache = AssetCache::from_config(&config, metadata)?;
        cache
            .get_local_file_for(&AssetIdentity::new(id, remote_path))
            .await?
    } else {
        let url = database_url.ok_or_else(|| {
            CliError::config_with_help(
                "no metadata source for the asset",
                "Pass --remote-path, or --database-url / DATABASE_URL",
            )
        })?;
        let metadata: Arc<dyn MetadataStore> = Arc::new(PgMetadataStore::connect(url).await?);
        let cache = AssetCache::from_config(&config, metadata)?;
        cache.get_local_file(id).await?
    };

    Ok(FetchOutput {
        id: id.get(),
        key: file.key().to_string(),
        path: file.path().to_path_buf(),
        bytes: file.len(),
        content_type: file.content_type(),
    })
}

/// Show the bare and qualified cache keys for `remote_path`.
pub fn resolve_keys(remote_path: &str) -> Result<ResolveOutput, CliError> {
    let remote = RemotePath::from(remote_path);
    let keys = resolve(&remote).and_then(|key| CacheKey::qualified(&remote).map(|q| (key, q)));
    match keys {
        Ok((key, qualified)) => Ok(ResolveOutput {
            remote_path: remote_path.to_string(),
            key: key.to_string(),
            qualified_key: qualified.to_string(),
        }),
        Err(Error::InvalidAssetPath { path, reason }) => Err(CliError::config(format!(
            "'{path}' cannot be cached: {reason}"
        ))),
        Err(other) => Err(other.into()),
    }
}

/// Remove orphaned temporary files from the cache directory.
///
/// Fails with exit code 3 while a server or another `fetch` has the
/// directory open.
pub fn sweep(config_path: Option<&Path>, overrides: &Overrides) -> Result<SweepOutput, CliError> {
    let cache_dir = settings::cache_dir(config_path, overrides)?;
    let removed = sweep_cache_dir(&cache_dir)?;
    Ok(SweepOutput { cache_dir, removed })
}
