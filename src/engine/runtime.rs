// src/engine/runtime.rs

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::context::JobContext;
use crate::errors::GENERIC_FAILURE;
use crate::exec::lines::{drain_lines, LineReader};
use crate::exec::watcher::spawn_connector_watcher;
use crate::exec::{OutputStream, ProcessSupervisor};
use crate::fs::FileSystem;
use crate::manifest::load_start_command;
use crate::readiness::{poll, HttpProbe, PollOutcome};
use crate::types::{ProcessRole, StopSignal};

use super::core::JobCore;
use super::guard::CompletionGuard;
use super::{JobCommand, JobEvent};

/// A child the shell still knows about.
struct Tracked {
    pid: u32,
    /// Kept only for the tunnel until the watcher takes it.
    stdout: Option<OutputStream>,
}

/// Drives [`JobCore`] in response to `JobEvent`s and performs the IO it
/// asks for: spawning and signalling children through a
/// [`ProcessSupervisor`], polling readiness, watching tunnel output, timers.
///
/// Events are handled strictly one at a time. Feedback that is known
/// synchronously (a spawn succeeded or failed, the manifest was read) goes
/// through a local queue and is handled before anything that arrived on the
/// channel, so no background event can slip in between a spawn and its
/// bookkeeping.
pub struct JobRuntime<S: ProcessSupervisor> {
    core: JobCore,
    ctx: Arc<JobContext>,
    supervisor: S,
    probe: Arc<dyn HttpProbe>,
    fs: Arc<dyn FileSystem>,
    guard: Arc<CompletionGuard>,
    event_tx: mpsc::Sender<JobEvent>,
    event_rx: mpsc::Receiver<JobEvent>,
    local: VecDeque<JobEvent>,
    processes: HashMap<ProcessRole, Tracked>,
    start_command: Option<String>,
}

impl<S: ProcessSupervisor> fmt::Debug for JobRuntime<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRuntime")
            .field("core", &self.core)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl<S: ProcessSupervisor> JobRuntime<S> {
    pub fn new(
        ctx: JobContext,
        supervisor: S,
        probe: Arc<dyn HttpProbe>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        let guard = Arc::new(CompletionGuard::new());
        let core = JobCore::new(ctx.core_settings(), Arc::clone(&guard));
        let (event_tx, event_rx) = mpsc::channel(64);

        Self {
            core,
            ctx: Arc::new(ctx),
            supervisor,
            probe,
            fs,
            guard,
            event_tx,
            event_rx,
            local: VecDeque::new(),
            processes: HashMap::new(),
            start_command: None,
        }
    }

    /// Sender for external completion sources (e.g. Ctrl-C →
    /// `JobEvent::CancelRequested`).
    pub fn event_sender(&self) -> mpsc::Sender<JobEvent> {
        self.event_tx.clone()
    }

    pub fn guard(&self) -> Arc<CompletionGuard> {
        Arc::clone(&self.guard)
    }

    /// Run the job to completion and return its exit code.
    pub async fn run(mut self) -> i32 {
        info!(workdir = %self.ctx.working_dir.display(), "job started");
        self.local.push_back(JobEvent::Start);

        let mut final_code = None;
        loop {
            let event = match self.local.pop_front() {
                Some(event) => event,
                None => match self.event_rx.recv().await {
                    Some(event) => event,
                    None => {
                        warn!("job event channel closed; exiting");
                        break;
                    }
                },
            };

            debug!(?event, stage = ?self.core.stage(), "job received event");
            let step = self.core.step(event);

            for command in step.commands {
                if let Some(code) = self.execute_command(command) {
                    final_code = Some(code);
                }
            }

            if !step.keep_running {
                break;
            }
        }

        let code = final_code.unwrap_or(GENERIC_FAILURE);
        info!(code, "job finished");
        code
    }

    /// Execute a single command from the core. Returns the exit code for
    /// `Finish`.
    fn execute_command(&mut self, command: JobCommand) -> Option<i32> {
        match command {
            JobCommand::Message(text) => self.ctx.sink.message(&text),
            JobCommand::Spawn(role) => self.spawn(role),
            JobCommand::SpawnServer { start_command } => {
                self.start_command = Some(start_command);
                self.spawn(ProcessRole::Server);
            }
            JobCommand::LoadManifest => self.load_manifest(),
            JobCommand::StartReadinessPoll => self.start_readiness_poll(),
            JobCommand::WatchConnector => self.watch_connector(),
            JobCommand::Signal { role, signal } => self.signal(role, signal),
            JobCommand::StartGraceTimer => self.start_grace_timer(),
            JobCommand::Finish(code) => return Some(code),
        }
        None
    }

    fn spawn(&mut self, role: ProcessRole) {
        let request = match self
            .ctx
            .spawn_request(role, self.start_command.as_deref())
        {
            Ok(request) => request,
            Err(err) => {
                self.local.push_back(JobEvent::SpawnFailed {
                    role,
                    reason: err.to_string(),
                });
                return;
            }
        };

        let mut handle = match self.supervisor.spawn(request) {
            Ok(handle) => handle,
            Err(err) => {
                error!(role = %role, error = %err, "spawn failed");
                self.local.push_back(JobEvent::SpawnFailed {
                    role,
                    reason: err.source.to_string(),
                });
                return;
            }
        };

        let pid = handle.pid();
        info!(role = %role, pid, "process spawned");

        let tx = self.event_tx.clone();
        handle.on_exit(move |exit| async move {
            let _ = tx.send(JobEvent::ProcessExited { role, exit }).await;
        });

        let mut stdout = handle.take_stdout();
        if role != ProcessRole::Connector {
            if let Some(out) = stdout.take() {
                tokio::spawn(async move {
                    let mut lines = LineReader::new(out);
                    drain_lines(&mut lines, role, "stdout").await;
                });
            }
        }

        self.processes.insert(role, Tracked { pid, stdout });
        self.local.push_back(JobEvent::Spawned { role });
    }

    fn load_manifest(&mut self) {
        let event = match load_start_command(self.fs.as_ref(), &self.ctx.working_dir) {
            Ok(start_command) => JobEvent::ManifestLoaded { start_command },
            Err(err) => JobEvent::ManifestFailed {
                reason: err.to_string(),
            },
        };
        self.local.push_back(event);
    }

    fn start_readiness_poll(&self) {
        let probe = Arc::clone(&self.probe);
        let guard = Arc::clone(&self.guard);
        let tx = self.event_tx.clone();
        let url = self.ctx.probe_url();
        let policy = self.ctx.readiness;

        tokio::spawn(async move {
            let event = match poll(probe.as_ref(), &url, policy, &guard).await {
                PollOutcome::Ready { attempts } => JobEvent::ReadinessReady { attempts },
                PollOutcome::TimedOut { attempts } => JobEvent::ReadinessTimedOut { attempts },
                PollOutcome::Cancelled => {
                    debug!(url = %url, "readiness polling cancelled");
                    return;
                }
            };
            if guard.is_claimed() {
                return;
            }
            let _ = tx.send(event).await;
        });
    }

    fn watch_connector(&mut self) {
        let stdout = self
            .processes
            .get_mut(&ProcessRole::Connector)
            .and_then(|p| p.stdout.take());

        match stdout {
            Some(stdout) => {
                spawn_connector_watcher(
                    stdout,
                    self.ctx.ready_marker.clone(),
                    Arc::clone(&self.guard),
                    self.event_tx.clone(),
                );
            }
            None => {
                warn!("tunnel has no stdout to watch; readiness marker can never be seen");
            }
        }
    }

    fn signal(&mut self, role: ProcessRole, signal: StopSignal) {
        let Some(tracked) = self.processes.get(&role) else {
            warn!(role = %role, ?signal, "no such process to signal");
            return;
        };
        info!(role = %role, pid = tracked.pid, ?signal, "signalling process");
        if let Err(err) = self.supervisor.terminate(tracked.pid, signal) {
            // Usually the process already exited on its own.
            warn!(role = %role, pid = tracked.pid, ?signal, error = %err, "signal failed");
        }
    }

    fn start_grace_timer(&self) {
        let tx = self.event_tx.clone();
        let grace = self.ctx.grace_period;
        debug!(?grace, "grace timer armed");
        tokio::spawn(async move {
            sleep(grace).await;
            let _ = tx.send(JobEvent::GraceElapsed).await;
        });
    }
}
