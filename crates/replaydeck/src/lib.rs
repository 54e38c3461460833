//! replaydeck command-line interface.
//!
//! Loads cache configuration from a TOML file, the environment and flags,
//! then fetches assets, inspects cache keys or sweeps the cache directory.

pub mod cli;
pub mod commands;
pub mod logging;
pub mod settings;

pub use cli::{Cli, CliError, EXIT_CONFIG, EXIT_FETCH, EXIT_OK, exit_code_for, render_error};
