//! Configuration types for the asset cache

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transport::{Credentials, HostKeyPolicy, RemoteHost};
use crate::{Error, Result};

/// Configuration for the asset cache.
///
/// Loaded from TOML:
///
/// ```toml
/// cache_dir = "/var/cache/replaydeck"
/// fetch_timeout_secs = 120
///
/// [remote]
/// protocol = "sftp"
/// host = "media.example.com"
/// user = "replays"
/// auth = { type = "key", path = "/etc/replaydeck/id_ed25519" }
/// host_key = { mode = "known-hosts" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Directory holding cached entries
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Upper bound for a single remote transfer, in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Where assets are fetched from
    pub remote: RemoteConfig,
}

impl CacheConfig {
    /// Configuration with defaults for everything but the remote host.
    #[must_use]
    pub fn new(remote: RemoteConfig) -> Self {
        Self {
            cache_dir: default_cache_dir(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            remote,
        }
    }

    /// Use `dir` as the cache directory.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Use `timeout` as the per-fetch timeout (rounded up to whole seconds).
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self
    }

    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| Error::configuration(format!("Invalid cache configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| Error::cache_io(e, path, "read config"))?;
        Self::from_toml_str(&contents)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.fetch_timeout_secs == 0 {
            return Err(Error::configuration("fetch_timeout_secs must be positive"));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::configuration("cache_dir must not be empty"));
        }
        self.remote.validate()
    }

    /// Per-fetch timeout.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// The remote host assets are fetched from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Transfer protocol
    #[serde(default)]
    pub protocol: Protocol,

    /// Host name or address
    pub host: String,

    /// Port, defaulting to the protocol's standard port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Login user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Authentication material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    /// How the remote host's identity is verified
    #[serde(default)]
    pub host_key: HostKeyPolicy,
}

impl RemoteConfig {
    /// Remote host with no credentials and default verification.
    #[must_use]
    pub fn new(protocol: Protocol, host: impl Into<String>) -> Self {
        Self {
            protocol,
            host: host.into(),
            port: None,
            user: None,
            auth: None,
            host_key: HostKeyPolicy::default(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::configuration("remote.host must not be empty"));
        }
        if self.protocol == Protocol::Https
            && matches!(
                self.host_key,
                HostKeyPolicy::Fingerprint { .. } | HostKeyPolicy::KnownHosts { path: Some(_) }
            )
        {
            return Err(Error::configuration(
                "host_key known_hosts files and fingerprints require protocol = \"sftp\"; \
                 https checks certificates against the system roots",
            ));
        }
        match (self.protocol, &self.auth) {
            (Protocol::Https, Some(AuthConfig::Key { .. })) => Err(Error::configuration(
                "key authentication requires protocol = \"sftp\"",
            )),
            (Protocol::Sftp, Some(AuthConfig::Bearer { .. })) => Err(Error::configuration(
                "bearer authentication requires protocol = \"https\"",
            )),
            (Protocol::Sftp, _) if self.user.is_none() => {
                Err(Error::configuration("remote.user is required for sftp"))
            }
            _ => Ok(()),
        }
    }

    /// Runtime view of this configuration with secrets wrapped.
    #[must_use]
    pub fn remote_host(&self) -> RemoteHost {
        let credentials = match &self.auth {
            None => Credentials::None,
            Some(AuthConfig::Password { password }) => Credentials::password(password.clone()),
            Some(AuthConfig::Key { path, passphrase }) => {
                Credentials::key_file(path.clone(), passphrase.clone())
            }
            Some(AuthConfig::Bearer { token }) => Credentials::bearer(token.clone()),
        };
        RemoteHost {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            credentials,
            host_key: self.host_key.clone(),
        }
    }
}

/// Transfer protocol used to reach the remote host.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// HTTPS GET of the remote path
    #[default]
    Https,
    /// SFTP over SSH
    Sftp,
}

/// Authentication configuration as written in the config file.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// Password login (HTTP basic auth or SSH password)
    Password {
        /// Password value
        password: String,
    },
    /// SSH private key file
    Key {
        /// Path to the private key
        path: PathBuf,
        /// Passphrase protecting the key
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
    /// Bearer token (`Authorization: Bearer <token>`)
    Bearer {
        /// Token value
        token: String,
    },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password { .. } => f.write_str("Password([REDACTED])"),
            Self::Key { path, .. } => f.debug_struct("Key").field("path", path).finish_non_exhaustive(),
            Self::Bearer { .. } => f.write_str("Bearer([REDACTED])"),
        }
    }
}

/// Default cache directory: `<user cache dir>/replaydeck/assets`.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("replaydeck")
        .join("assets")
}

// Default value functions
fn default_fetch_timeout_secs() -> u64 {
    300 // 5 minutes
}
