// src/exec/supervisor.rs

//! Child process ownership and signalling.
//!
//! The runtime talks to a [`ProcessSupervisor`] instead of
//! `tokio::process` directly, so tests can swap in a scripted fake while
//! production uses [`TokioSupervisor`].

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::Result;
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::errors::SpawnError;
use crate::exec::lines::{drain_lines, LineReader};
use crate::types::{ProcessExit, ProcessRole, StopSignal};

/// Readable stdout of a child.
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Everything needed to start one child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub role: ProcessRole,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Added on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

/// Handle to a spawned child.
///
/// The stdout stream and the exit notification can each be taken once.
pub struct ProcessHandle {
    role: ProcessRole,
    pid: u32,
    stdout: Option<OutputStream>,
    exit: Option<oneshot::Receiver<ProcessExit>>,
}

impl ProcessHandle {
    pub fn new(
        role: ProcessRole,
        pid: u32,
        stdout: Option<OutputStream>,
        exit: oneshot::Receiver<ProcessExit>,
    ) -> Self {
        Self {
            role,
            pid,
            stdout,
            exit: Some(exit),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    /// Register the single exit listener. The callback runs on its own task
    /// exactly once; a second registration is ignored.
    ///
    /// If the supervisor loses track of the child without reporting an exit,
    /// the listener still fires with `ProcessExit::Code(-1)`.
    pub fn on_exit<F, Fut>(&mut self, callback: F)
    where
        F: FnOnce(ProcessExit) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(exit_rx) = self.exit.take() else {
            warn!(role = %self.role, pid = self.pid, "exit listener already registered; ignoring");
            return;
        };
        let role = self.role;
        let pid = self.pid;

        tokio::spawn(async move {
            let exit = match exit_rx.await {
                Ok(exit) => exit,
                Err(_) => {
                    warn!(role = %role, pid, "exit notification lost; reporting -1");
                    ProcessExit::Code(-1)
                }
            };
            callback(exit).await;
        });
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("role", &self.role)
            .field("pid", &self.pid)
            .field("stdout", &self.stdout.is_some())
            .field("exit", &self.exit.is_some())
            .finish()
    }
}

/// Spawn and signal child processes.
pub trait ProcessSupervisor: Send {
    /// Start a child. Failure to create the process at all is reported
    /// synchronously.
    fn spawn(&mut self, request: SpawnRequest) -> std::result::Result<ProcessHandle, SpawnError>;

    /// Deliver `signal` to the child with `pid`. Does not wait for it to
    /// exit.
    fn terminate(&mut self, pid: u32, signal: StopSignal) -> Result<()>;
}

/// Production supervisor backed by `tokio::process`.
#[derive(Debug, Default)]
pub struct TokioSupervisor;

impl TokioSupervisor {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSupervisor for TokioSupervisor {
    fn spawn(&mut self, request: SpawnRequest) -> std::result::Result<ProcessHandle, SpawnError> {
        let role = request.role;
        info!(
            role = %role,
            program = %request.program,
            args = ?request.args,
            cwd = %request.cwd.display(),
            "starting process"
        );

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .current_dir(&request.cwd)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| SpawnError {
            role,
            program: request.program.clone(),
            source,
        })?;

        // Only missing once the child has been reaped.
        let Some(pid) = child.id() else {
            return Err(SpawnError {
                role,
                program: request.program,
                source: std::io::Error::other("process exited before its pid was known"),
            });
        };
        let stdout = child.stdout.take().map(|s| Box::new(s) as OutputStream);

        // Always consume stderr so buffers don't fill; log at debug.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = LineReader::new(stderr);
                drain_lines(&mut lines, role, "stderr").await;
            });
        }

        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ProcessExit::from_status(status),
                Err(e) => {
                    warn!(role = %role, pid, error = %e, "waiting for process failed");
                    ProcessExit::Code(-1)
                }
            };
            info!(role = %role, pid, exit = %exit, "process exited");
            if exit_tx.send(exit).is_err() {
                debug!(role = %role, pid, "nobody listening for process exit");
            }
        });

        Ok(ProcessHandle::new(role, pid, stdout, exit_rx))
    }

    #[cfg(unix)]
    fn terminate(&mut self, pid: u32, signal: StopSignal) -> Result<()> {
        use anyhow::Context;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        // Pid 0 would address our own process group.
        anyhow::ensure!(pid != 0, "refusing to send {signal:?} to pid 0");

        let sig = match signal {
            StopSignal::Interrupt => Signal::SIGINT,
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        };
        let raw = i32::try_from(pid).with_context(|| format!("pid {pid} out of range"))?;
        debug!(pid, signal = ?sig, "sending signal");
        kill(Pid::from_raw(raw), sig)
            .with_context(|| format!("sending {sig:?} to pid {pid}"))
    }

    #[cfg(not(unix))]
    fn terminate(&mut self, pid: u32, signal: StopSignal) -> Result<()> {
        anyhow::bail!("sending {signal:?} to pid {pid} is only supported on Unix")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::exec::command::shell_wrap;

    fn request(role: ProcessRole, script: &str) -> SpawnRequest {
        let cmd = shell_wrap(script);
        SpawnRequest {
            role,
            program: cmd.program,
            args: cmd.args,
            cwd: std::env::temp_dir(),
            env: BTreeMap::from([("SAUCECI_PROBE".to_string(), "42".to_string())]),
        }
    }

    #[tokio::test]
    async fn reports_exit_code_and_stdout() {
        let mut sup = TokioSupervisor::new();
        let mut handle = sup
            .spawn(request(ProcessRole::Tests, "echo $SAUCECI_PROBE; exit 3"))
            .unwrap();

        let mut lines = LineReader::new(handle.take_stdout().unwrap());
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("42"));

        let (tx, rx) = oneshot::channel();
        handle.on_exit(move |exit| async move {
            let _ = tx.send(exit);
        });
        assert_eq!(rx.await.unwrap(), ProcessExit::Code(3));
    }

    #[tokio::test]
    async fn terminate_delivers_signal() {
        let mut sup = TokioSupervisor::new();
        let mut handle = sup
            .spawn(request(ProcessRole::Server, "sleep 30"))
            .unwrap();

        let (tx, rx) = oneshot::channel();
        handle.on_exit(move |exit| async move {
            let _ = tx.send(exit);
        });

        sup.terminate(handle.pid(), StopSignal::Terminate).unwrap();
        assert_eq!(rx.await.unwrap(), ProcessExit::Signal(15));
    }

    #[test]
    fn pid_zero_is_never_signalled() {
        let mut sup = TokioSupervisor::new();
        let err = sup.terminate(0, StopSignal::Kill).unwrap_err();
        assert!(err.to_string().contains("pid 0"));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mut sup = TokioSupervisor::new();
            let err = sup
                .spawn(SpawnRequest {
                    role: ProcessRole::Connector,
                    program: "/definitely/not/here".to_string(),
                    args: vec![],
                    cwd: std::env::temp_dir(),
                    env: BTreeMap::new(),
                })
                .unwrap_err();
            assert_eq!(err.role, ProcessRole::Connector);
        });
    }
}
