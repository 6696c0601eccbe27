// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::DEFAULT_CONFIG_FILE;
use crate::context::{ACCESS_KEY_ENV, USERNAME_ENV};

/// Command-line arguments for `sauceci`.
#[derive(Clone, Parser)]
#[command(
    name = "sauceci",
    version,
    about = "Run a project's tests, then its Sauce cloud tests behind a tunnel.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML). A missing file means built-in
    /// defaults.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Project checkout to run in. Defaults to the current directory.
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SAUCECI_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate config, print the plan, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Sauce account name; overrides `[credentials]` in the config.
    #[arg(long, value_name = "NAME", env = USERNAME_ENV)]
    pub sauce_username: Option<String>,

    /// Sauce access key; overrides `[credentials]` in the config.
    #[arg(long, value_name = "KEY", env = ACCESS_KEY_ENV, hide_env_values = true)]
    pub sauce_access_key: Option<String>,
}

impl std::fmt::Debug for CliArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliArgs")
            .field("config", &self.config)
            .field("workdir", &self.workdir)
            .field("log_level", &self.log_level)
            .field("dry_run", &self.dry_run)
            .field("sauce_username", &self.sauce_username)
            .field("sauce_access_key", &self.sauce_access_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
