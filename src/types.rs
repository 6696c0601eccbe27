use std::fmt;

use crate::errors::GENERIC_FAILURE;

/// Which child process of the job we are talking about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    /// Optional dependency install step (e.g. `npm install`).
    Install,
    /// The project's own test command.
    Tests,
    /// The application-under-test web server (long-lived).
    Server,
    /// The Sauce Connect tunnel (long-lived).
    Connector,
    /// The cloud-browser test command.
    CloudTests,
}

impl ProcessRole {
    pub fn label(self) -> &'static str {
        match self {
            ProcessRole::Install => "install command",
            ProcessRole::Tests => "test command",
            ProcessRole::Server => "application server",
            ProcessRole::Connector => "Sauce Connector",
            ProcessRole::CloudTests => "cloud test command",
        }
    }

    /// Server and tunnel keep running until teardown; everything else is
    /// expected to exit on its own.
    pub fn is_long_lived(self) -> bool {
        matches!(self, ProcessRole::Server | ProcessRole::Connector)
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Normal exit with a status code.
    Code(i32),
    /// Killed by a signal (Unix only).
    Signal(i32),
}

impl ProcessExit {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return ProcessExit::Signal(sig);
            }
        }
        ProcessExit::Code(status.code().unwrap_or(-1))
    }

    pub fn success(self) -> bool {
        matches!(self, ProcessExit::Code(0))
    }

    /// Shell-style exit code: the status code, or `128 + signal`.
    pub fn exit_code(self) -> i32 {
        match self {
            ProcessExit::Code(code) => code,
            ProcessExit::Signal(sig) => 128 + sig,
        }
    }

    /// Code to report when this exit is treated as a failure. A clean exit
    /// of a process that was supposed to keep running maps to the generic
    /// failure code.
    pub fn failure_code(self) -> i32 {
        match self.exit_code() {
            0 => GENERIC_FAILURE,
            code => code,
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Code(code) => write!(f, "exit code {code}"),
            ProcessExit::Signal(sig) => write!(f, "signal {sig}"),
        }
    }
}

/// Signals the supervisor knows how to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGINT: graceful stop for the tunnel.
    Interrupt,
    /// SIGTERM: graceful stop for the server.
    Terminate,
    /// SIGKILL: forced stop once the grace period has elapsed.
    Kill,
}

impl StopSignal {
    pub fn is_forced(self) -> bool {
        matches!(self, StopSignal::Kill)
    }

    /// POSIX signal number.
    pub fn signo(self) -> i32 {
        match self {
            StopSignal::Interrupt => 2,
            StopSignal::Terminate => 15,
            StopSignal::Kill => 9,
        }
    }
}

/// Job pipeline stage. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Install,
    RunTests,
    AwaitManifest,
    StartServer,
    AwaitReadiness,
    StartConnector,
    AwaitConnectorReady,
    RunCloudTests,
    Teardown,
    Done,
}

/// Teardown progress for one child.
///
/// Ordered so that `advance` can enforce monotonicity with a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TerminationState {
    NotStarted,
    GracefulSent,
    ForceSent,
    Terminated,
}

impl TerminationState {
    /// Move forward to `next`; a backward move is ignored. Returns whether
    /// the state changed.
    pub fn advance(&mut self, next: TerminationState) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }

    pub fn is_terminated(self) -> bool {
        self == TerminationState::Terminated
    }
}
