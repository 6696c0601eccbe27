// src/engine/mod.rs

//! Job orchestration engine.
//!
//! The pure state machine lives in [`core`]: it consumes [`JobEvent`]s and
//! answers with [`JobCommand`]s, without touching Tokio, processes or the
//! network. The async shell in [`runtime`] executes those commands and turns
//! process exits, poll results, marker matches and timers back into events.
//! [`guard`] holds the set-once outcome both sides agree on; [`teardown`]
//! tracks the escalation state of the long-lived children.

use crate::types::{ProcessExit, ProcessRole, StopSignal};

/// Events flowing into the core from the shell and its background tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// Kick off the job.
    Start,
    /// A child was created.
    Spawned { role: ProcessRole },
    /// The OS refused to create a child.
    SpawnFailed { role: ProcessRole, reason: String },
    /// A child exited (or was killed).
    ProcessExited { role: ProcessRole, exit: ProcessExit },
    /// `scripts.start` was found in the manifest.
    ManifestLoaded { start_command: String },
    /// The manifest could not provide a start command.
    ManifestFailed { reason: String },
    /// The server answered 200.
    ReadinessReady { attempts: u32 },
    /// The server never answered 200.
    ReadinessTimedOut { attempts: u32 },
    /// The tunnel printed its readiness marker.
    ConnectorReady,
    /// The teardown grace period ran out.
    GraceElapsed,
    /// Operator asked to stop (e.g. Ctrl-C).
    CancelRequested,
}

/// Command produced by the pure core, to be executed by the IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCommand {
    /// User-visible progress text for the message sink.
    Message(String),
    /// Start the child for `role` from the job's command templates.
    Spawn(ProcessRole),
    /// Start the application server with the manifest's start script.
    SpawnServer { start_command: String },
    /// Read the project manifest.
    LoadManifest,
    /// Begin HTTP readiness polling against the server.
    StartReadinessPoll,
    /// Attach the marker watcher to the tunnel's stdout.
    WatchConnector,
    /// Deliver a signal to a running long-lived child.
    Signal { role: ProcessRole, signal: StopSignal },
    /// Arm the teardown grace timer.
    StartGraceTimer,
    /// Report the final exit code. Emitted exactly once per run.
    Finish(i32),
}

/// Decision returned by the core after handling a single `JobEvent`.
#[derive(Debug, Clone, Default)]
pub struct CoreStep {
    pub commands: Vec<JobCommand>,
    /// Whether the shell should keep reading events.
    pub keep_running: bool,
}

pub mod core;
pub mod guard;
pub mod runtime;
pub mod teardown;

pub use core::{CoreSettings, JobCore};
pub use guard::CompletionGuard;
pub use runtime::JobRuntime;
pub use teardown::Children;
pub use crate::types::{Stage, TerminationState};
