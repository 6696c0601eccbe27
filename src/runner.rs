// src/runner.rs

//! Entry point for embedding callers: run one job and report its code.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::context::JobContext;
use crate::engine::{JobEvent, JobRuntime};
use crate::exec::ProcessSupervisor;
use crate::fs::FileSystem;
use crate::readiness::HttpProbe;

/// One configured job, ready to run.
///
/// `cancel_handle()` can be taken before `run` to stop the job from outside
/// (the binary wires it to Ctrl-C).
pub struct TestRunner<S: ProcessSupervisor> {
    runtime: JobRuntime<S>,
}

impl<S: ProcessSupervisor> TestRunner<S> {
    pub fn new(
        ctx: JobContext,
        supervisor: S,
        probe: Arc<dyn HttpProbe>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            runtime: JobRuntime::new(ctx, supervisor, probe, fs),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.runtime.event_sender(),
        }
    }

    /// Run the job to completion. `on_done` receives the final code exactly
    /// once, before this returns.
    pub async fn run<F>(self, on_done: F) -> i32
    where
        F: FnOnce(i32),
    {
        let guard = self.runtime.guard();
        let code = self.runtime.run().await;

        // The core claims before finishing; this only differs if the event
        // channel closed underneath it.
        if guard.outcome() != Some(code) {
            debug!(code, claimed = ?guard.outcome(), "runtime ended without a claimed outcome");
        }

        info!(code, "reporting job result");
        on_done(code);
        code
    }
}

/// Requests cancellation of a running job.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: mpsc::Sender<JobEvent>,
}

impl CancelHandle {
    /// First call starts teardown; a second call while tearing down
    /// force-kills. Returns false once the job is gone.
    pub async fn cancel(&self) -> bool {
        self.tx.send(JobEvent::CancelRequested).await.is_ok()
    }
}

/// Convenience wrapper around [`TestRunner`].
pub async fn run_job<S, F>(
    ctx: JobContext,
    supervisor: S,
    probe: Arc<dyn HttpProbe>,
    fs: Arc<dyn FileSystem>,
    on_done: F,
) -> i32
where
    S: ProcessSupervisor,
    F: FnOnce(i32),
{
    TestRunner::new(ctx, supervisor, probe, fs).run(on_done).await
}
