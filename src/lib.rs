// src/lib.rs

pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod manifest;
pub mod readiness;
pub mod runner;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::load_or_default;
use crate::config::model::ConfigFile;
use crate::context::{Credentials, JobContext, StdoutSink};
use crate::exec::TokioSupervisor;
use crate::fs::RealFileSystem;
use crate::readiness::ReqwestProbe;
use crate::runner::TestRunner;

/// High-level entry point used by `main.rs`. Returns the job's exit code.
///
/// This wires together:
/// - config loading and credential resolution
/// - the job context and its message sink
/// - the real process supervisor, HTTP probe and filesystem
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_or_default(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;

    let working_dir = match args.workdir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolving current directory")?,
    };

    let credentials = resolve_credentials(&args, &cfg);

    if args.dry_run {
        print_dry_run(&cfg, &working_dir, credentials.as_ref());
        return Ok(0);
    }

    let ctx = JobContext::from_config(&cfg, working_dir, credentials, Arc::new(StdoutSink));
    let probe = ReqwestProbe::new(ctx.readiness.probe_timeout)?;

    let runner = TestRunner::new(
        ctx,
        TokioSupervisor::new(),
        Arc::new(probe),
        Arc::new(RealFileSystem),
    );

    // Ctrl-C → teardown; a second Ctrl-C → force kill.
    {
        let cancel = runner.cancel_handle();
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                    return;
                }
                info!("interrupt received; cancelling job");
                if !cancel.cancel().await {
                    return;
                }
            }
        });
    }

    let code = runner
        .run(|code| debug!(code, "job completion callback fired"))
        .await;
    Ok(code)
}

/// CLI/env values win over the config file; blanks count as unset.
fn resolve_credentials(args: &CliArgs, cfg: &ConfigFile) -> Option<Credentials> {
    fn non_blank(value: Option<&String>) -> Option<String> {
        value.filter(|s| !s.trim().is_empty()).cloned()
    }

    let username = non_blank(args.sauce_username.as_ref())
        .or_else(|| non_blank(cfg.credentials.username.as_ref()));
    let access_key = non_blank(args.sauce_access_key.as_ref())
        .or_else(|| non_blank(cfg.credentials.access_key.as_ref()));

    Credentials::from_parts(username, access_key)
}

/// Print the resolved plan without running anything.
fn print_dry_run(cfg: &ConfigFile, working_dir: &Path, credentials: Option<&Credentials>) {
    println!("sauceci dry-run");
    println!("  workdir = {}", working_dir.display());
    println!();

    println!("stages:");
    if let Some(ref install) = cfg.job.install {
        println!("  - install:     {install}");
    }
    println!("  - tests:       {}", cfg.job.test);
    println!(
        "  - server:      scripts.start from {}",
        manifest::manifest_path(working_dir).display()
    );
    println!(
        "      readiness: GET http://localhost:{}{} every {} ms, {} attempts",
        cfg.server.port, cfg.server.probe_path, cfg.server.probe_interval_ms,
        cfg.server.probe_attempts
    );
    println!("  - tunnel:      {} <username> <access-key>", cfg.tunnel.command);
    println!("      ready on:  {:?}", cfg.tunnel.ready_marker);
    println!("  - cloud tests: {}", cfg.job.cloud_test);
    println!("  - teardown:    grace {} ms", cfg.teardown.grace_ms);
    println!();

    match credentials {
        Some(creds) => println!("credentials: {} (access key set)", creds.username),
        None => println!("credentials: missing (job would fail before spawning anything)"),
    }

    debug!("dry-run complete (no execution)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::config::model::CredentialsSection;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["sauceci"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    fn cfg_with(username: &str, key: &str) -> ConfigFile {
        ConfigFile {
            credentials: CredentialsSection {
                username: Some(username.to_string()),
                access_key: Some(key.to_string()),
            },
            ..ConfigFile::default()
        }
    }

    #[test]
    fn cli_credentials_override_file() {
        let creds = resolve_credentials(
            &args(&["--sauce-username", "bob", "--sauce-access-key", "cli-key"]),
            &cfg_with("alice", "file-key"),
        )
        .unwrap();
        assert_eq!(creds.username, "bob");
        assert_eq!(creds.access_key, "cli-key");
    }

    #[test]
    fn blank_cli_value_falls_back_to_file() {
        let creds = resolve_credentials(
            &args(&["--sauce-username", " ", "--sauce-access-key", "cli-key"]),
            &cfg_with("alice", "file-key"),
        )
        .unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.access_key, "cli-key");
    }
}
