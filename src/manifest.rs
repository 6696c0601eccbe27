// src/manifest.rs

//! Project manifest (`package.json`) lookup.
//!
//! The start script is read directly from the manifest instead of running
//! `npm start`: `npm start` forks the real server as a grandchild, which
//! would leave us signalling the wrong pid during teardown.

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::fs::FileSystem;

pub const MANIFEST_FILE: &str = "package.json";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("unreadable {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("invalid JSON in {path}: {reason}")]
    InvalidJson { path: String, reason: String },

    #[error("no \"scripts\" section")]
    MissingScripts,

    #[error("no \"scripts.start\" entry")]
    MissingStartScript,
}

pub fn manifest_path(working_dir: &Path) -> PathBuf {
    working_dir.join(MANIFEST_FILE)
}

/// Read the manifest in `working_dir` and return its `scripts.start`
/// command string.
pub fn load_start_command(
    fs: &dyn FileSystem,
    working_dir: &Path,
) -> Result<String, ManifestError> {
    let path = manifest_path(working_dir);
    let path_display = path.display().to_string();

    if !fs.is_file(&path) {
        return Err(ManifestError::NotFound(path_display));
    }

    let contents = fs
        .read_to_string(&path)
        .map_err(|e| ManifestError::Unreadable {
            path: path_display.clone(),
            reason: format!("{e:#}"),
        })?;

    let start = parse_start_command(&contents).map_err(|err| match err {
        ManifestError::InvalidJson { reason, .. } => ManifestError::InvalidJson {
            path: path_display.clone(),
            reason,
        },
        other => other,
    })?;

    debug!(manifest = %path_display, start = %start, "resolved start script");
    Ok(start)
}

/// Extract `scripts.start` from manifest JSON text.
pub fn parse_start_command(contents: &str) -> Result<String, ManifestError> {
    let json: Value =
        serde_json::from_str(contents).map_err(|e| ManifestError::InvalidJson {
            path: MANIFEST_FILE.to_string(),
            reason: e.to_string(),
        })?;

    let scripts = json
        .get("scripts")
        .and_then(Value::as_object)
        .ok_or(ManifestError::MissingScripts)?;

    scripts
        .get("start")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(ManifestError::MissingStartScript)
}
