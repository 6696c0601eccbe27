// src/engine/core.rs

//! Pure job state machine.
//!
//! [`JobCore`] consumes [`JobEvent`]s one at a time and returns the
//! [`JobCommand`]s the IO shell (`engine::runtime::JobRuntime`) should
//! perform. It owns the stage, the teardown bookkeeping and the write side
//! of the [`CompletionGuard`]; it has no channels, no Tokio types and
//! performs no IO, so every transition can be unit tested directly.
//!
//! Every handler re-checks the guard before acting: several completion
//! sources can each deliver an event after the outcome was decided, and all
//! of those must be no-ops.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::guard::CompletionGuard;
use crate::engine::teardown::{graceful_signal, Children};
use crate::engine::{CoreStep, JobCommand, JobEvent};
use crate::errors::{JobError, GENERIC_FAILURE};
use crate::types::{ProcessExit, ProcessRole, Stage, StopSignal, TerminationState};

/// The slice of the job context the core needs to make decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreSettings {
    pub port: u16,
    pub has_credentials: bool,
    pub has_install: bool,
}

#[derive(Debug)]
pub struct JobCore {
    settings: CoreSettings,
    guard: Arc<CompletionGuard>,
    stage: Stage,
    started: bool,
    children: Children,
}

impl JobCore {
    pub fn new(settings: CoreSettings, guard: Arc<CompletionGuard>) -> Self {
        Self {
            settings,
            guard,
            stage: Stage::Install,
            started: false,
            children: Children::default(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn children(&self) -> &Children {
        &self.children
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Handle a single event and return the resulting commands.
    pub fn step(&mut self, event: JobEvent) -> CoreStep {
        if self.is_done() {
            debug!(?event, "job already done; ignoring event");
            return CoreStep::default();
        }

        let mut out = Vec::new();
        match event {
            JobEvent::Start => self.on_start(&mut out),
            JobEvent::Spawned { role } => self.on_spawned(role, &mut out),
            JobEvent::SpawnFailed { role, reason } => {
                self.fail(JobError::Spawn { role, reason }, &mut out)
            }
            JobEvent::ProcessExited { role, exit } => self.on_exit(role, exit, &mut out),
            JobEvent::ManifestLoaded { start_command } => {
                if self.expecting(Stage::AwaitManifest) {
                    self.stage = Stage::StartServer;
                    out.push(JobCommand::SpawnServer { start_command });
                }
            }
            JobEvent::ManifestFailed { reason } => {
                if self.expecting(Stage::AwaitManifest) {
                    self.fail(JobError::Manifest(reason), &mut out);
                }
            }
            JobEvent::ReadinessReady { attempts } => {
                if self.expecting(Stage::AwaitReadiness) {
                    info!(attempts, port = self.settings.port, "server is up");
                    out.push(JobCommand::Message(format!(
                        "Got HTTP 200 on localhost:{} indicating server is up",
                        self.settings.port
                    )));
                    out.push(JobCommand::Message("Starting Sauce Connector".to_string()));
                    self.stage = Stage::StartConnector;
                    out.push(JobCommand::Spawn(ProcessRole::Connector));
                }
            }
            JobEvent::ReadinessTimedOut { attempts } => {
                if self.expecting(Stage::AwaitReadiness) {
                    self.fail(
                        JobError::ReadinessTimeout {
                            port: self.settings.port,
                            attempts,
                        },
                        &mut out,
                    );
                }
            }
            JobEvent::ConnectorReady => {
                if self.expecting(Stage::AwaitConnectorReady) {
                    out.push(JobCommand::Message(
                        "Sauce Connector ready - running cloud tests".to_string(),
                    ));
                    self.stage = Stage::RunCloudTests;
                    out.push(JobCommand::Spawn(ProcessRole::CloudTests));
                }
            }
            JobEvent::GraceElapsed => {
                if self.stage == Stage::Teardown {
                    self.force_kill(&mut out);
                }
            }
            JobEvent::CancelRequested => {
                if self.stage == Stage::Teardown {
                    // Second request while already stopping: skip the wait.
                    self.force_kill(&mut out);
                } else {
                    self.fail(JobError::Cancelled, &mut out);
                }
            }
        }

        CoreStep {
            commands: out,
            keep_running: !self.is_done(),
        }
    }

    /// True if the job is undecided and in `stage`. Anything else means the
    /// event is stale (a late poll result, a duplicate marker, ...).
    fn expecting(&self, stage: Stage) -> bool {
        if self.guard.is_claimed() {
            debug!(current = ?self.stage, "outcome already claimed; ignoring event");
            return false;
        }
        if self.stage != stage {
            debug!(current = ?self.stage, expected = ?stage, "event for another stage; ignoring");
            return false;
        }
        true
    }

    fn on_start(&mut self, out: &mut Vec<JobCommand>) {
        if self.started {
            debug!("job already started; ignoring duplicate start");
            return;
        }
        self.started = true;

        if !self.settings.has_credentials {
            self.fail(JobError::MissingCredentials, out);
            return;
        }

        if self.settings.has_install {
            self.stage = Stage::Install;
            out.push(JobCommand::Spawn(ProcessRole::Install));
        } else {
            self.stage = Stage::RunTests;
            out.push(JobCommand::Spawn(ProcessRole::Tests));
        }
    }

    fn on_spawned(&mut self, role: ProcessRole, out: &mut Vec<JobCommand>) {
        // Record the child before anything else so teardown can reach it.
        self.children.started(role);

        match role {
            ProcessRole::Server if self.expecting(Stage::StartServer) => {
                out.push(JobCommand::Message(format!(
                    "Waiting for webserver to come up on localhost:{}",
                    self.settings.port
                )));
                self.stage = Stage::AwaitReadiness;
                out.push(JobCommand::StartReadinessPoll);
            }
            ProcessRole::Connector if self.expecting(Stage::StartConnector) => {
                self.stage = Stage::AwaitConnectorReady;
                out.push(JobCommand::WatchConnector);
            }
            _ => {
                if self.stage == Stage::Teardown {
                    // Raced with the decision; stop it along with the rest.
                    self.signal(role, graceful_signal(role), TerminationState::GracefulSent, out);
                }
            }
        }
    }

    fn on_exit(&mut self, role: ProcessRole, exit: ProcessExit, out: &mut Vec<JobCommand>) {
        self.children.advance(role, TerminationState::Terminated);
        if self.stage == Stage::Teardown {
            debug!(role = %role, exit = %exit, "child confirmed termination");
            if !self.children.any_running() {
                self.finish(out);
            }
            return;
        }

        if self.guard.is_claimed() {
            debug!(role = %role, exit = %exit, "outcome already claimed; ignoring exit");
            return;
        }

        match role {
            ProcessRole::Install if self.stage == Stage::Install => {
                if exit.success() {
                    self.stage = Stage::RunTests;
                    out.push(JobCommand::Spawn(ProcessRole::Tests));
                } else {
                    self.fail(JobError::InstallFailure(exit.exit_code()), out);
                }
            }
            ProcessRole::Tests if self.stage == Stage::RunTests => {
                if exit.success() {
                    out.push(JobCommand::Message(
                        "test command succeeded - trying Sauce tests...".to_string(),
                    ));
                    self.stage = Stage::AwaitManifest;
                    out.push(JobCommand::LoadManifest);
                } else {
                    self.fail(JobError::TestCommandFailure(exit.exit_code()), out);
                }
            }
            ProcessRole::Server => {
                let err = if self.stage <= Stage::AwaitReadiness {
                    JobError::ServerStartFailure(exit)
                } else {
                    JobError::ServerLost(exit)
                };
                self.fail(err, out);
            }
            ProcessRole::Connector => {
                let err = if self.stage <= Stage::AwaitConnectorReady {
                    JobError::ConnectorStartFailure(exit)
                } else {
                    JobError::ConnectorLost(exit)
                };
                self.fail(err, out);
            }
            ProcessRole::CloudTests if self.stage == Stage::RunCloudTests => {
                let code = exit.exit_code();
                if self.guard.claim(code) {
                    info!(code, "cloud tests finished");
                    let message = if code == 0 {
                        "cloud test command exited with code 0".to_string()
                    } else {
                        JobError::CloudTestFailure(code).to_string()
                    };
                    out.push(JobCommand::Message(message));
                    self.teardown_or_finish(out);
                }
            }
            _ => {
                debug!(role = %role, exit = %exit, stage = ?self.stage, "unexpected exit; ignoring");
            }
        }
    }

    /// Claim the outcome for `err` and move towards Done. A no-op if some
    /// other source already decided the job.
    fn fail(&mut self, err: JobError, out: &mut Vec<JobCommand>) {
        let code = err.exit_code();
        if !self.guard.claim(code) {
            debug!(error = %err, "outcome already claimed; ignoring failure");
            return;
        }
        warn!(stage = ?self.stage, code, error = %err, "job failed");
        out.push(JobCommand::Message(err.to_string()));
        self.teardown_or_finish(out);
    }

    fn teardown_or_finish(&mut self, out: &mut Vec<JobCommand>) {
        if self.children.any_running() {
            self.begin_teardown(out);
        } else {
            self.finish(out);
        }
    }

    fn begin_teardown(&mut self, out: &mut Vec<JobCommand>) {
        info!(running = ?self.children.running(), "starting teardown");
        self.stage = Stage::Teardown;
        for role in self.children.running() {
            if role.is_long_lived() {
                out.push(JobCommand::Message(format!("Shutting down {role}")));
            }
            self.signal(role, graceful_signal(role), TerminationState::GracefulSent, out);
        }
        out.push(JobCommand::StartGraceTimer);
    }

    fn force_kill(&mut self, out: &mut Vec<JobCommand>) {
        let running = self.children.running();
        if !running.is_empty() {
            warn!(?running, "grace period over; force-killing");
        }
        for role in running {
            self.signal(role, StopSignal::Kill, TerminationState::ForceSent, out);
        }
        self.finish(out);
    }

    fn signal(
        &mut self,
        role: ProcessRole,
        signal: StopSignal,
        next: TerminationState,
        out: &mut Vec<JobCommand>,
    ) {
        if self.children.advance(role, next) {
            out.push(JobCommand::Signal { role, signal });
        }
    }

    fn finish(&mut self, out: &mut Vec<JobCommand>) {
        let code = self.guard.outcome().unwrap_or(GENERIC_FAILURE);
        info!(code, "job done");
        self.stage = Stage::Done;
        out.push(JobCommand::Finish(code));
    }
}
