// src/config/mod.rs

//! Configuration loading and validation for sauceci.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate invariants serde cannot express (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default, DEFAULT_CONFIG_FILE};
pub use model::{
    ConfigFile, CredentialsSection, JobSection, RawConfigFile, ServerSection, TeardownSection,
    TunnelSection,
};
pub use validate::validate_config;
