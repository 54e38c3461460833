//! Command-line arguments, CLI errors and exit codes

use clap::{Parser, Subcommand, ValueEnum};
use miette::{Diagnostic, Report};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

use crate::logging::{LogFormat, LogLevel};

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// Configuration or usage error exit code
pub const EXIT_CONFIG: i32 = 2;
/// Fetch or cache failure exit code
pub const EXIT_FETCH: i32 = 3;

/// Fetch and inspect cached replaydeck audio assets.
#[derive(Parser, Debug)]
#[command(name = "replaydeck", version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c', env = "REPLAYDECK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Cache directory (overrides the configuration file)
    #[arg(long, env = "REPLAYDECK_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Remote host assets are fetched from
    #[arg(long, env = "REPLAYDECK_REMOTE_HOST", global = true)]
    pub remote_host: Option<String>,

    /// Login user on the remote host
    #[arg(long, env = "REPLAYDECK_REMOTE_USER", global = true)]
    pub remote_user: Option<String>,

    /// Password for the remote host
    #[arg(
        long,
        env = "REPLAYDECK_REMOTE_PASSWORD",
        hide_env_values = true,
        global = true
    )]
    pub remote_password: Option<String>,

    /// Transfer protocol
    #[arg(long, value_enum, global = true)]
    pub protocol: Option<ProtocolArg>,

    /// Per-fetch timeout in seconds
    #[arg(long, env = "REPLAYDECK_FETCH_TIMEOUT_SECS", global = true)]
    pub fetch_timeout_secs: Option<u64>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, value_enum, default_value_t = LogLevel::Warn, global = true)]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    pub log_format: LogFormat,

    /// Print results and errors as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Fetch an asset into the cache and print its local path
    Fetch {
        /// Asset id (`audio_id`)
        id: i64,

        /// Remote path of the asset, skipping the database lookup
        #[arg(long)]
        remote_path: Option<String>,

        /// PostgreSQL connection string for the metadata lookup
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        database_url: Option<String>,
    },
    /// Show the cache keys a remote path maps to
    Resolve {
        /// Absolute path on the remote host
        remote_path: String,
    },
    /// Remove temporary files left behind by interrupted fetches
    ///
    /// Refused while a running cache has the directory open.
    Sweep,
}

/// Transfer protocol as accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProtocolArg {
    /// HTTPS GET
    Https,
    /// SFTP over SSH
    Sftp,
}

impl From<ProtocolArg> for replaydeck_assets::Protocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Https => Self::Https,
            ProtocolArg::Sftp => Self::Sftp,
        }
    }
}

/// CLI-specific error types with exit code mapping
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum CliError {
    /// Configuration or usage error (exit code 2)
    #[error("Configuration error: {message}")]
    #[diagnostic(code(replaydeck::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// Fetching or caching the asset failed (exit code 3)
    #[error(transparent)]
    #[diagnostic(transparent)]
    Fetch(replaydeck_assets::Error),
}

impl CliError {
    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

/// Configuration problems exit with 2, every other cache error with 3.
impl From<replaydeck_assets::Error> for CliError {
    fn from(err: replaydeck_assets::Error) -> Self {
        match err {
            replaydeck_assets::Error::Configuration { message } => Self::config(message),
            other => Self::Fetch(other),
        }
    }
}

/// Map CLI error to the process exit code
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config { .. } => EXIT_CONFIG,
        CliError::Fetch(_) => EXIT_FETCH,
    }
}

/// Print an error as a miette report on stderr, or as JSON on stdout.
#[allow(clippy::print_stdout, clippy::print_stderr)]
pub fn render_error(err: &CliError, json_mode: bool) {
    if json_mode {
        let code = match err {
            CliError::Config { .. } => "config",
            CliError::Fetch(_) => "fetch",
        };
        let body = serde_json::json!({
            "status": "error",
            "error": { "code": code, "message": err.to_string() },
        });
        println!("{body}");
    } else {
        let report = Report::new(err.clone());
        eprintln!("{report:?}");
        let _ = io::stderr().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaydeck_assets::{AssetId, Error};

    #[test]
    fn test_parse_fetch_with_remote_path() {
        let cli = Cli::try_parse_from([
            "replaydeck",
            "fetch",
            "42",
            "--remote-path",
            "/remote/demos/foo.mp3",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Fetch { id: 42, remote_path: Some(ref p), .. } if p == "/remote/demos/foo.mp3"
        ));
        assert!(!cli.json);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "replaydeck",
            "sweep",
            "--cache-dir",
            "/tmp/cache",
            "--json",
            "--protocol",
            "sftp",
        ])
        .unwrap();
        assert_eq!(cli.command, Commands::Sweep);
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/cache")));
        assert_eq!(cli.protocol, Some(ProtocolArg::Sftp));
        assert!(cli.json);
    }

    #[test]
    fn test_rejects_non_numeric_id() {
        assert!(Cli::try_parse_from(["replaydeck", "fetch", "foo"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(EXIT_OK, 0);
        assert_eq!(exit_code_for(&CliError::config("bad")), EXIT_CONFIG);
        let fetch = CliError::from(Error::transport("reset"));
        assert_eq!(exit_code_for(&fetch), EXIT_FETCH);
        let missing = CliError::from(Error::asset_not_found(AssetId::new(1)));
        assert_eq!(exit_code_for(&missing), EXIT_FETCH);
    }

    #[test]
    fn test_cache_configuration_error_is_config() {
        let err = CliError::from(Error::configuration("remote.host must not be empty"));
        assert_eq!(exit_code_for(&err), EXIT_CONFIG);
        assert!(err.to_string().contains("remote.host"));
    }
}
