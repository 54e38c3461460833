//! Transports that copy one remote file to one local destination.
//!
//! A transport opens a single authenticated connection per copy and releases
//! it on every exit path. It never retries; callers decide whether a failed
//! fetch is attempted again.

mod https;
#[cfg(feature = "sftp")]
mod sftp;

pub use https::HttpsTransport;
#[cfg(feature = "sftp")]
pub use sftp::SftpTransport;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Protocol, RemoteConfig};
use crate::identity::RemotePath;
use crate::{Error, Result};

/// Copies remote files into local destinations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Stream the whole of `remote_path` on `host` into `dest`.
    ///
    /// `dest` already exists and is truncated before writing. The copy must
    /// give up with [`Error::Transport`] once `timeout` has elapsed. Returns
    /// the number of bytes written.
    async fn copy_to_local(
        &self,
        host: &RemoteHost,
        remote_path: &RemotePath,
        dest: &Path,
        timeout: Duration,
    ) -> Result<u64>;
}

/// Build the transport selected by `remote.protocol`.
pub fn from_config(remote: &RemoteConfig) -> Result<Arc<dyn Transport>> {
    match remote.protocol {
        Protocol::Https => Ok(Arc::new(HttpsTransport::new(&remote.host_key)?)),
        #[cfg(feature = "sftp")]
        Protocol::Sftp => Ok(Arc::new(SftpTransport::new())),
        #[cfg(not(feature = "sftp"))]
        Protocol::Sftp => Err(Error::configuration(
            "protocol \"sftp\" requires building with the `sftp` feature",
        )),
    }
}

/// A remote host together with the material needed to log in.
#[derive(Debug, Clone)]
pub struct RemoteHost {
    /// Host name or address
    pub host: String,
    /// Port override
    pub port: Option<u16>,
    /// Login user
    pub user: Option<String>,
    /// Authentication material
    pub credentials: Credentials,
    /// Host identity verification policy
    pub host_key: HostKeyPolicy,
}

impl RemoteHost {
    /// Host with no credentials and default verification.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: None,
            credentials: Credentials::None,
            host_key: HostKeyPolicy::default(),
        }
    }
}

/// Resolved credentials. Secret values never appear in `Debug` output.
#[derive(Clone)]
pub enum Credentials {
    /// Anonymous access (or SSH agent for sftp)
    None,
    /// Password login
    Password {
        /// Password value
        password: SecretString,
    },
    /// SSH private key file
    KeyFile {
        /// Path to the private key
        private_key: PathBuf,
        /// Passphrase protecting the key
        passphrase: Option<SecretString>,
    },
    /// Bearer token
    Bearer {
        /// Token value
        token: SecretString,
    },
}

impl Credentials {
    /// Password credentials.
    #[must_use]
    pub fn password(password: String) -> Self {
        Self::Password {
            password: SecretString::from(password),
        }
    }

    /// Private key credentials.
    #[must_use]
    pub fn key_file(private_key: PathBuf, passphrase: Option<String>) -> Self {
        Self::KeyFile {
            private_key,
            passphrase: passphrase.map(SecretString::from),
        }
    }

    /// Bearer token credentials.
    #[must_use]
    pub fn bearer(token: String) -> Self {
        Self::Bearer {
            token: SecretString::from(token),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Password { .. } => f.write_str("Password([REDACTED])"),
            Self::KeyFile { private_key, .. } => f
                .debug_struct("KeyFile")
                .field("private_key", private_key)
                .finish_non_exhaustive(),
            Self::Bearer { .. } => f.write_str("Bearer([REDACTED])"),
        }
    }
}

/// How the identity of the remote host is verified.
///
/// Verification is on unless `insecure-accept-any` is configured explicitly.
/// For HTTPS the policy decides whether certificates are validated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Check against an OpenSSH known_hosts file (default `~/.ssh/known_hosts`)
    KnownHosts {
        /// Alternate known_hosts file
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
    /// Require a specific SHA-256 host key fingerprint, hex encoded
    Fingerprint {
        /// Expected fingerprint; colons and case are ignored
        sha256: String,
    },
    /// Accept any host key or certificate
    InsecureAcceptAny,
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        Self::KnownHosts { path: None }
    }
}

impl HostKeyPolicy {
    /// The known_hosts file to consult, if this policy uses one.
    #[must_use]
    pub fn known_hosts_file(&self) -> Option<PathBuf> {
        match self {
            Self::KnownHosts { path: Some(path) } => Some(path.clone()),
            Self::KnownHosts { path: None } => {
                dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
            }
            Self::Fingerprint { .. } | Self::InsecureAcceptAny => None,
        }
    }
}

/// Fail when a transfer ended short of the size the remote advertised.
pub(crate) fn check_length(expected: Option<u64>, written: u64, remote: &RemotePath) -> Result<()> {
    match expected {
        Some(expected) if expected != written => Err(Error::transport(format!(
            "short transfer of {remote}: expected {expected} bytes, received {written}"
        ))),
        _ => Ok(()),
    }
}
