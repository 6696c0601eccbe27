// src/context.rs

//! The caller-supplied description of one job run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

use crate::config::ConfigFile;
use crate::engine::CoreSettings;
use crate::errors::JobError;
use crate::exec::command::{shell_wrap, shell_wrap_with_args, ShellCommand};
use crate::exec::SpawnRequest;
use crate::readiness::ReadinessPolicy;
use crate::types::ProcessRole;

/// Environment variable carrying the suggested listen port to the server.
pub const PORT_ENV: &str = "PORT";
pub const USERNAME_ENV: &str = "SAUCE_USERNAME";
pub const ACCESS_KEY_ENV: &str = "SAUCE_ACCESS_KEY";

/// Where user-visible progress text goes.
pub trait MessageSink: Send + Sync {
    fn message(&self, text: &str);
}

/// Sink used by the binary: prints to stdout and mirrors to the log.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl MessageSink for StdoutSink {
    fn message(&self, text: &str) {
        info!(target: "sauceci::message", "{}", text);
        println!("[sauceci] {text}");
    }
}

/// Sink that keeps every message, for tests and embedding callers.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl MessageSink for RecordingSink {
    fn message(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

/// Tunnel account. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub access_key: String,
}

impl Credentials {
    /// Both parts must be present and non-blank.
    pub fn from_parts(username: Option<String>, access_key: Option<String>) -> Option<Self> {
        let username = username.filter(|s| !s.trim().is_empty())?;
        let access_key = access_key.filter(|s| !s.trim().is_empty())?;
        Some(Self {
            username,
            access_key,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("access_key", &"<redacted>")
            .finish()
    }
}

/// Shell command strings for each stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplates {
    pub install: Option<String>,
    pub test: String,
    pub cloud_test: String,
    /// Credentials are appended as two positional arguments.
    pub tunnel: String,
}

/// Everything the job reads; immutable for the run.
#[derive(Clone)]
pub struct JobContext {
    pub working_dir: PathBuf,
    pub commands: CommandTemplates,
    pub credentials: Option<Credentials>,
    /// Added to every child's environment.
    pub env: BTreeMap<String, String>,
    pub port: u16,
    pub probe_path: String,
    pub readiness: ReadinessPolicy,
    pub ready_marker: String,
    pub grace_period: Duration,
    pub sink: Arc<dyn MessageSink>,
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("working_dir", &self.working_dir)
            .field("commands", &self.commands)
            .field("credentials", &self.credentials)
            .field("port", &self.port)
            .field("readiness", &self.readiness)
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}

impl JobContext {
    /// Build a context from validated config. Credentials are resolved by
    /// the caller (CLI/env override the file).
    pub fn from_config(
        cfg: &ConfigFile,
        working_dir: PathBuf,
        credentials: Option<Credentials>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            working_dir,
            commands: CommandTemplates {
                install: cfg.job.install.clone(),
                test: cfg.job.test.clone(),
                cloud_test: cfg.job.cloud_test.clone(),
                tunnel: cfg.tunnel.command.clone(),
            },
            credentials,
            env: BTreeMap::new(),
            port: cfg.server.port,
            probe_path: cfg.server.probe_path.clone(),
            readiness: ReadinessPolicy::new(
                cfg.server.probe_interval(),
                cfg.server.probe_attempts,
            ),
            ready_marker: cfg.tunnel.ready_marker.clone(),
            grace_period: cfg.teardown.grace_period(),
            sink,
        }
    }

    pub fn probe_url(&self) -> String {
        format!("http://localhost:{}{}", self.port, self.probe_path)
    }

    pub fn core_settings(&self) -> CoreSettings {
        CoreSettings {
            port: self.port,
            has_credentials: self.credentials.is_some(),
            has_install: self.commands.install.is_some(),
        }
    }

    /// Build the spawn request for `role`. The server's command comes from
    /// the manifest and is passed in as `start_command`.
    pub fn spawn_request(
        &self,
        role: ProcessRole,
        start_command: Option<&str>,
    ) -> Result<SpawnRequest, JobError> {
        let mut env = self.env.clone();

        let command = match role {
            ProcessRole::Install => {
                let install = self.commands.install.as_deref().ok_or_else(|| JobError::Spawn {
                    role,
                    reason: "no install command configured".to_string(),
                })?;
                shell_wrap(install)
            }
            ProcessRole::Tests => shell_wrap(&self.commands.test),
            ProcessRole::Server => {
                let start = start_command.ok_or_else(|| JobError::Spawn {
                    role,
                    reason: "no start command".to_string(),
                })?;
                env.insert(PORT_ENV.to_string(), self.port.to_string());
                shell_wrap(start)
            }
            ProcessRole::Connector => {
                let creds = self.require_credentials()?;
                shell_wrap_with_args(
                    &self.commands.tunnel,
                    &[creds.username.as_str(), creds.access_key.as_str()],
                )
            }
            ProcessRole::CloudTests => {
                let creds = self.require_credentials()?;
                env.insert(USERNAME_ENV.to_string(), creds.username.clone());
                env.insert(ACCESS_KEY_ENV.to_string(), creds.access_key.clone());
                shell_wrap(&self.commands.cloud_test)
            }
        };

        let ShellCommand { program, args } = command;
        Ok(SpawnRequest {
            role,
            program,
            args,
            cwd: self.working_dir.clone(),
            env,
        })
    }

    fn require_credentials(&self) -> Result<&Credentials, JobError> {
        self.credentials.as_ref().ok_or(JobError::MissingCredentials)
    }
}
