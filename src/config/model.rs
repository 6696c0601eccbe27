// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [job]
/// install = "npm install"
/// test = "npm test"
/// cloud_test = "npm run-script sauce"
///
/// [server]
/// port = 8031
///
/// [tunnel]
/// command = "java -jar thirdparty/Sauce-Connect.jar"
///
/// [teardown]
/// grace_ms = 5000
/// ```
///
/// All sections are optional and default to the values the Sauce worker
/// has always used. This is the unvalidated form; use
/// [`ConfigFile::try_from`] (or `load_and_validate`) to get a checked one.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub job: JobSection,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub tunnel: TunnelSection,

    #[serde(default)]
    pub teardown: TeardownSection,

    #[serde(default)]
    pub credentials: CredentialsSection,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub job: JobSection,
    pub server: ServerSection,
    pub tunnel: TunnelSection,
    pub teardown: TeardownSection,
    pub credentials: CredentialsSection,
}

impl ConfigFile {
    /// Build without validation. Only `validate.rs` should call this.
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            job: raw.job,
            server: raw.server,
            tunnel: raw.tunnel,
            teardown: raw.teardown,
            credentials: raw.credentials,
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self::new_unchecked(RawConfigFile::default())
    }
}

/// `[job]` section: the command templates run through the shell.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSection {
    /// Dependency install step; skipped when absent.
    #[serde(default)]
    pub install: Option<String>,

    #[serde(default = "default_test_command")]
    pub test: String,

    #[serde(default = "default_cloud_test_command")]
    pub cloud_test: String,
}

fn default_test_command() -> String {
    "npm test".to_string()
}

fn default_cloud_test_command() -> String {
    "npm run-script sauce".to_string()
}

impl Default for JobSection {
    fn default() -> Self {
        Self {
            install: None,
            test: default_test_command(),
            cloud_test: default_cloud_test_command(),
        }
    }
}

/// `[server]` section: where the application under test listens and how
/// we probe it.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// Port suggested to the server via `PORT`; also the port the tunnel
    /// forwards.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_probe_path")]
    pub probe_path: String,

    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,
}

fn default_port() -> u16 {
    8031
}

fn default_probe_path() -> String {
    "/".to_string()
}

fn default_probe_interval_ms() -> u64 {
    1000
}

fn default_probe_attempts() -> u32 {
    10
}

impl ServerSection {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            probe_path: default_probe_path(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_attempts: default_probe_attempts(),
        }
    }
}

/// `[tunnel]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelSection {
    /// Command template; username and access key are appended as the two
    /// final positional arguments.
    #[serde(default = "default_tunnel_command")]
    pub command: String,

    /// Literal substring the tunnel prints once it accepts connections.
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,
}

fn default_tunnel_command() -> String {
    "java -jar thirdparty/Sauce-Connect.jar".to_string()
}

fn default_ready_marker() -> String {
    "Connected! You may start your tests.".to_string()
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            command: default_tunnel_command(),
            ready_marker: default_ready_marker(),
        }
    }
}

/// `[teardown]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TeardownSection {
    /// How long server and tunnel get to exit after the polite signal.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

fn default_grace_ms() -> u64 {
    5000
}

impl TeardownSection {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

impl Default for TeardownSection {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
        }
    }
}

/// `[credentials]` section. Usually left empty in the file and supplied via
/// `SAUCE_USERNAME` / `SAUCE_ACCESS_KEY` instead.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsSection {
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub access_key: Option<String>,
}
