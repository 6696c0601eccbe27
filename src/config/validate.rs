// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, SauceciError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::SauceciError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// Check the semantic invariants serde cannot express.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_commands(cfg)?;
    validate_server(cfg)?;
    validate_tunnel(cfg)?;
    Ok(())
}

fn validate_commands(cfg: &RawConfigFile) -> Result<()> {
    ensure_non_empty("[job].test", &cfg.job.test)?;
    ensure_non_empty("[job].cloud_test", &cfg.job.cloud_test)?;
    if let Some(install) = &cfg.job.install {
        ensure_non_empty("[job].install", install)?;
    }
    Ok(())
}

fn validate_server(cfg: &RawConfigFile) -> Result<()> {
    if cfg.server.port == 0 {
        return Err(SauceciError::ConfigError(
            "[server].port must be a fixed port (got 0)".to_string(),
        ));
    }
    if cfg.server.probe_attempts == 0 {
        return Err(SauceciError::ConfigError(
            "[server].probe_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.server.probe_interval_ms == 0 {
        return Err(SauceciError::ConfigError(
            "[server].probe_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if !cfg.server.probe_path.starts_with('/') {
        return Err(SauceciError::ConfigError(format!(
            "[server].probe_path must start with '/' (got '{}')",
            cfg.server.probe_path
        )));
    }
    Ok(())
}

fn validate_tunnel(cfg: &RawConfigFile) -> Result<()> {
    ensure_non_empty("[tunnel].command", &cfg.tunnel.command)?;
    ensure_non_empty("[tunnel].ready_marker", &cfg.tunnel.ready_marker)
}

fn ensure_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SauceciError::ConfigError(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ConfigFile::try_from(RawConfigFile::default()).is_ok());
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut raw = RawConfigFile::default();
        raw.server.probe_attempts = 0;
        match ConfigFile::try_from(raw) {
            Err(SauceciError::ConfigError(msg)) => assert!(msg.contains("probe_attempts")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn blank_install_rejected() {
        let mut raw = RawConfigFile::default();
        raw.job.install = Some("  ".to_string());
        assert!(ConfigFile::try_from(raw).is_err());
    }
}
