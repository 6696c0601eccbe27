use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use sauceci::errors::SpawnError;
use sauceci::exec::{ProcessHandle, ProcessSupervisor, SpawnRequest};
use sauceci::types::{ProcessExit, ProcessRole, StopSignal};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};

/// How a fake child behaves once spawned.
#[derive(Debug, Clone)]
pub struct Script {
    /// Exit on its own after a delay.
    pub exit_after: Option<(Duration, ProcessExit)>,
    /// Lines written to stdout, each after its delay from the previous one.
    pub stdout: Vec<(Duration, String)>,
    /// Reaction to SIGINT/SIGTERM: exit after this delay, or ignore it.
    pub on_graceful: Option<Duration>,
    /// Refuse to start.
    pub spawn_error: bool,
}

impl Script {
    /// Exits with `code` right away.
    pub fn exits(code: i32) -> Self {
        Self::exits_after(Duration::ZERO, code)
    }

    pub fn exits_after(delay: Duration, code: i32) -> Self {
        Self {
            exit_after: Some((delay, ProcessExit::Code(code))),
            stdout: Vec::new(),
            on_graceful: Some(Duration::ZERO),
            spawn_error: false,
        }
    }

    /// Runs until signalled and stops promptly on a graceful signal.
    pub fn long_lived() -> Self {
        Self {
            exit_after: None,
            stdout: Vec::new(),
            on_graceful: Some(Duration::ZERO),
            spawn_error: false,
        }
    }

    pub fn spawn_error() -> Self {
        Self {
            spawn_error: true,
            ..Self::long_lived()
        }
    }

    pub fn with_line(mut self, delay: Duration, line: &str) -> Self {
        self.stdout.push((delay, line.to_string()));
        self
    }

    pub fn ignoring_graceful(mut self) -> Self {
        self.on_graceful = None;
        self
    }

    pub fn stopping_after(mut self, delay: Duration) -> Self {
        self.on_graceful = Some(delay);
        self
    }
}

/// One delivered signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalRecord {
    pub role: ProcessRole,
    pub pid: u32,
    pub signal: StopSignal,
    pub at: Instant,
}

struct Child {
    role: ProcessRole,
    script: Script,
    exit_tx: Option<oneshot::Sender<ProcessExit>>,
    /// Dropping this closes the child's stdout.
    stdout_close: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct Inner {
    scripts: HashMap<ProcessRole, Script>,
    next_pid: u32,
    children: HashMap<u32, Child>,
    spawned: Vec<SpawnRequest>,
    signals: Vec<SignalRecord>,
    exits: Vec<(ProcessRole, ProcessExit)>,
}

/// A `ProcessSupervisor` that runs scripted fake children.
///
/// Clones share state, so a test can keep one clone for assertions and
/// hand the other to the runtime. Roles without a script exit 0 at once
/// (short-lived) or run until signalled (server, tunnel).
#[derive(Clone, Default)]
pub struct FakeSupervisor {
    inner: Arc<Mutex<Inner>>,
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, role: ProcessRole, script: Script) -> Self {
        self.inner.lock().unwrap().scripts.insert(role, script);
        self
    }

    pub fn spawned(&self) -> Vec<SpawnRequest> {
        self.inner.lock().unwrap().spawned.clone()
    }

    pub fn spawned_roles(&self) -> Vec<ProcessRole> {
        self.spawned().iter().map(|r| r.role).collect()
    }

    pub fn signals(&self) -> Vec<SignalRecord> {
        self.inner.lock().unwrap().signals.clone()
    }

    pub fn exits(&self) -> Vec<(ProcessRole, ProcessExit)> {
        self.inner.lock().unwrap().exits.clone()
    }

    /// Roles of children that have not exited yet.
    pub fn alive(&self) -> Vec<ProcessRole> {
        let inner = self.inner.lock().unwrap();
        let mut roles: Vec<_> = inner
            .children
            .values()
            .filter(|c| c.exit_tx.is_some())
            .map(|c| c.role)
            .collect();
        roles.sort_by_key(|r| format!("{r:?}"));
        roles
    }

    /// Make the child with `role` exit now, as if it crashed.
    pub fn exit_now(&self, role: ProcessRole, exit: ProcessExit) {
        let pid = {
            let inner = self.inner.lock().unwrap();
            inner
                .children
                .iter()
                .find(|(_, c)| c.role == role && c.exit_tx.is_some())
                .map(|(pid, _)| *pid)
        };
        if let Some(pid) = pid {
            finish(&self.inner, pid, exit);
        }
    }

    fn script_for(inner: &Inner, role: ProcessRole) -> Script {
        inner.scripts.get(&role).cloned().unwrap_or_else(|| {
            if role.is_long_lived() {
                Script::long_lived()
            } else {
                Script::exits(0)
            }
        })
    }
}

fn finish(inner: &Arc<Mutex<Inner>>, pid: u32, exit: ProcessExit) {
    let mut guard = inner.lock().unwrap();
    let Some(child) = guard.children.get_mut(&pid) else {
        return;
    };
    let Some(tx) = child.exit_tx.take() else {
        return;
    };
    child.stdout_close.take();
    let role = child.role;
    guard.exits.push((role, exit));
    drop(guard);
    let _ = tx.send(exit);
}

impl ProcessSupervisor for FakeSupervisor {
    fn spawn(&mut self, request: SpawnRequest) -> std::result::Result<ProcessHandle, SpawnError> {
        let role = request.role;
        let mut inner = self.inner.lock().unwrap();
        let script = Self::script_for(&inner, role);

        if script.spawn_error {
            return Err(SpawnError {
                role,
                program: request.program,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }

        inner.next_pid += 1;
        let pid = 1000 + inner.next_pid;
        inner.spawned.push(request);

        let (exit_tx, exit_rx) = oneshot::channel();
        let (close_tx, close_rx) = oneshot::channel::<()>();
        let (mut writer, reader) = tokio::io::duplex(64 * 1024);

        let lines = script.stdout.clone();
        tokio::spawn(async move {
            for (delay, line) in lines {
                sleep(delay).await;
                if writer.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                    return;
                }
            }
            // Keep stdout open until the child exits.
            let _ = close_rx.await;
        });

        if let Some((delay, exit)) = script.exit_after {
            let shared = Arc::clone(&self.inner);
            tokio::spawn(async move {
                sleep(delay).await;
                finish(&shared, pid, exit);
            });
        }

        inner.children.insert(
            pid,
            Child {
                role,
                script,
                exit_tx: Some(exit_tx),
                stdout_close: Some(close_tx),
            },
        );

        Ok(ProcessHandle::new(role, pid, Some(Box::new(reader)), exit_rx))
    }

    fn terminate(&mut self, pid: u32, signal: StopSignal) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(child) = inner.children.get(&pid) else {
            return Err(anyhow!("no such process: {pid}"));
        };
        let role = child.role;
        let alive = child.exit_tx.is_some();
        let on_graceful = child.script.on_graceful;

        inner.signals.push(SignalRecord {
            role,
            pid,
            signal,
            at: Instant::now(),
        });
        drop(inner);

        if !alive {
            return Err(anyhow!("process {pid} already exited"));
        }

        let exit = ProcessExit::Signal(signal.signo());
        if signal.is_forced() {
            finish(&self.inner, pid, exit);
        } else if let Some(delay) = on_graceful {
            let shared = Arc::clone(&self.inner);
            tokio::spawn(async move {
                sleep(delay).await;
                finish(&shared, pid, exit);
            });
        }
        Ok(())
    }
}
