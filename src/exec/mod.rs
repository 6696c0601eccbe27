// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`command`] turns command-template strings into program + args.
//! - [`supervisor`] owns child processes: spawn, exit notification,
//!   signalling. `TokioSupervisor` is the production implementation; tests
//!   plug in a fake through the `ProcessSupervisor` trait.
//! - [`lines`] assembles output chunks into bounded lines.
//! - [`watcher`] scans the tunnel's stdout for its readiness marker.

pub mod command;
pub mod lines;
pub mod supervisor;
pub mod watcher;

pub use command::{shell_wrap, shell_wrap_with_args, ShellCommand};
pub use lines::{LineReader, LineScanner};
pub use supervisor::{OutputStream, ProcessHandle, ProcessSupervisor, SpawnRequest, TokioSupervisor};
pub use watcher::{spawn_connector_watcher, watch, WatchOutcome};
