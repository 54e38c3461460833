//! Layered configuration: TOML file, then environment and flags.

use replaydeck_assets::{AuthConfig, CacheConfig, Protocol, RemoteConfig, default_cache_dir};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{Cli, CliError};

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Cache directory
    pub cache_dir: Option<PathBuf>,
    /// Remote host
    pub remote_host: Option<String>,
    /// Remote user
    pub remote_user: Option<String>,
    /// Remote password
    pub remote_password: Option<String>,
    /// Transfer protocol
    pub protocol: Option<Protocol>,
    /// Per-fetch timeout in seconds
    pub fetch_timeout_secs: Option<u64>,
}

impl From<&Cli> for Overrides {
    fn from(cli: &Cli) -> Self {
        Self {
            cache_dir: cli.cache_dir.clone(),
            remote_host: cli.remote_host.clone(),
            remote_user: cli.remote_user.clone(),
            remote_password: cli.remote_password.clone(),
            protocol: cli.protocol.map(Into::into),
            fetch_timeout_secs: cli.fetch_timeout_secs,
        }
    }
}

/// Build the full cache configuration.
///
/// The file (if any) is read first, overrides are applied on top and the
/// result is validated once at the end, so an override can supply a value
/// the file leaves out.
pub fn load(config_path: Option<&Path>, overrides: &Overrides) -> Result<CacheConfig, CliError> {
    let mut config = match config_path {
        Some(path) => read_file::<CacheConfig>(path)?,
        None => {
            let host = overrides.remote_host.clone().ok_or_else(|| {
                CliError::config_with_help(
                    "no remote host configured",
                    "Pass --config, or set --remote-host / REPLAYDECK_REMOTE_HOST",
                )
            })?;
            CacheConfig::new(RemoteConfig::new(
                overrides.protocol.unwrap_or_default(),
                host,
            ))
        }
    };

    if let Some(dir) = &overrides.cache_dir {
        config.cache_dir.clone_from(dir);
    }
    if let Some(secs) = overrides.fetch_timeout_secs {
        config = config.with_fetch_timeout(Duration::from_secs(secs));
    }
    if let Some(host) = &overrides.remote_host {
        config.remote.host.clone_from(host);
    }
    if let Some(protocol) = overrides.protocol {
        config.remote.protocol = protocol;
    }
    if let Some(user) = &overrides.remote_user {
        config.remote.user = Some(user.clone());
    }
    if let Some(password) = &overrides.remote_password {
        config.remote.auth = Some(AuthConfig::Password {
            password: password.clone(),
        });
    }

    config.validate()?;
    Ok(config)
}

/// Cache directory only, for commands that never contact the remote host.
pub fn cache_dir(config_path: Option<&Path>, overrides: &Overrides) -> Result<PathBuf, CliError> {
    #[derive(Deserialize)]
    struct CacheDirOnly {
        cache_dir: Option<PathBuf>,
    }

    if let Some(dir) = &overrides.cache_dir {
        return Ok(dir.clone());
    }
    let from_file = match config_path {
        Some(path) => read_file::<CacheDirOnly>(path)?.cache_dir,
        None => None,
    };
    Ok(from_file.unwrap_or_else(default_cache_dir))
}

fn read_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, CliError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        CliError::config_with_help(
            format!("cannot read {}: {e}", path.display()),
            "Check the --config / REPLAYDECK_CONFIG path",
        )
    })?;
    toml::from_str(&contents)
        .map_err(|e| CliError::config(format!("invalid configuration in {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(temp: &TempDir, contents: &str) -> PathBuf {
        let path = temp.path().join("replaydeck.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_flags_only() {
        let overrides = Overrides {
            remote_host: Some("media.example.com".to_string()),
            cache_dir: Some(PathBuf::from("/srv/cache")),
            fetch_timeout_secs: Some(30),
            ..Overrides::default()
        };
        let config = load(None, &overrides).unwrap();

        assert_eq!(config.remote.host, "media.example.com");
        assert_eq!(config.remote.protocol, Protocol::Https);
        assert_eq!(config.cache_dir, PathBuf::from("/srv/cache"));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_host_is_config_error() {
        let err = load(None, &Overrides::default()).unwrap_err();
        assert!(matches!(err, CliError::Config { .. }));
    }

    #[test]
    fn test_overrides_complete_the_file() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            &temp,
            r#"
            cache_dir = "/var/cache/replaydeck"

            [remote]
            protocol = "sftp"
            host = "10.0.0.5"
            "#,
        );
        // The file alone is missing the sftp user.
        assert!(load(Some(&path), &Overrides::default()).is_err());

        let overrides = Overrides {
            remote_user: Some("replays".to_string()),
            remote_password: Some("hunter2".to_string()),
            ..Overrides::default()
        };
        let config = load(Some(&path), &overrides).unwrap();
        assert_eq!(config.remote.user.as_deref(), Some("replays"));
        assert!(matches!(config.remote.auth, Some(AuthConfig::Password { .. })));
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/replaydeck"));
    }

    #[test]
    fn test_unreadable_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let err = load(Some(&temp.path().join("absent.toml")), &Overrides::default()).unwrap_err();
        assert!(matches!(err, CliError::Config { .. }));
    }

    #[test]
    fn test_cache_dir_precedence() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, "cache_dir = \"/from/file\"\n");

        assert_eq!(
            cache_dir(Some(&path), &Overrides::default()).unwrap(),
            PathBuf::from("/from/file")
        );
        let overrides = Overrides {
            cache_dir: Some(PathBuf::from("/from/flag")),
            ..Overrides::default()
        };
        assert_eq!(
            cache_dir(Some(&path), &overrides).unwrap(),
            PathBuf::from("/from/flag")
        );
        assert_eq!(
            cache_dir(None, &Overrides::default()).unwrap(),
            default_cache_dir()
        );
    }
}
