// src/errors.rs

//! Crate-wide error types.
//!
//! - [`SauceciError`] covers everything that can go wrong *around* a job run
//!   (config loading, IO, TOML).
//! - [`JobError`] is the taxonomy of job failures. These never propagate as
//!   `Err` out of the runtime: the core turns each one into a single user
//!   message and a final exit code.
//! - [`SpawnError`] is what a `ProcessSupervisor` reports when the OS
//!   refuses to create a child at all.

use thiserror::Error;

use crate::types::{ProcessExit, ProcessRole};

#[derive(Error, Debug)]
pub enum SauceciError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Generic failure code used when a failure has no natural exit code
/// (manifest errors, missing credentials, readiness timeouts, ...).
pub const GENERIC_FAILURE: i32 = 1;

/// Everything that can make a job fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error(
        "Sauce tests detected but Sauce credentials have not been configured!\n  Please visit project config page to enter them"
    )]
    MissingCredentials,

    #[error("install command failed with exit code {0} - failing test")]
    InstallFailure(i32),

    #[error("test command failed with exit code {0} - not running Sauce tests")]
    TestCommandFailure(i32),

    #[error("could not read package.json to find start command ({0}) - failing test")]
    Manifest(String),

    #[error("application server exited ({0}) before it was ready - failing test")]
    ServerStartFailure(ProcessExit),

    #[error("application server exited unexpectedly ({0}) - failing test")]
    ServerLost(ProcessExit),

    #[error(
        "HTTP 200 check on localhost:{port} failed after {attempts} retries, server not up - failing test"
    )]
    ReadinessTimeout { port: u16, attempts: u32 },

    #[error("Error starting Sauce Connector ({0}) - failing test")]
    ConnectorStartFailure(ProcessExit),

    #[error("Sauce Connector exited unexpectedly ({0}) - failing test")]
    ConnectorLost(ProcessExit),

    #[error("cloud test command exited with code {0}")]
    CloudTestFailure(i32),

    #[error("could not start {role}: {reason}")]
    Spawn { role: ProcessRole, reason: String },

    #[error("job cancelled")]
    Cancelled,
}

impl JobError {
    /// Exit code the job finishes with when this error authors the outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            JobError::InstallFailure(code)
            | JobError::TestCommandFailure(code)
            | JobError::CloudTestFailure(code) => *code,
            JobError::ServerStartFailure(exit) | JobError::ServerLost(exit) => {
                exit.failure_code()
            }
            JobError::MissingCredentials
            | JobError::Manifest(_)
            | JobError::ReadinessTimeout { .. }
            | JobError::ConnectorStartFailure(_)
            | JobError::ConnectorLost(_)
            | JobError::Spawn { .. }
            | JobError::Cancelled => GENERIC_FAILURE,
        }
    }
}

/// The operating environment could not create a child process.
#[derive(Error, Debug)]
#[error("failed to spawn {role} (`{program}`): {source}")]
pub struct SpawnError {
    pub role: ProcessRole,
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SauceciError>;
