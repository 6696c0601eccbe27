// src/exec/watcher.rs

//! Readiness detection on the tunnel's stdout.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::guard::CompletionGuard;
use crate::engine::JobEvent;
use crate::exec::lines::{drain_lines, LineReader};
use crate::types::ProcessRole;

/// How [`watch`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// A line contained the marker.
    Ready,
    /// The stream ended (or failed) without the marker.
    Closed,
    /// The job was decided elsewhere first.
    Cancelled,
}

/// Read lines until one contains `marker`.
///
/// Lines after the match are left in `lines` for the caller; `watch` itself
/// resolves at most once per call.
pub async fn watch<R: AsyncRead + Unpin>(
    lines: &mut LineReader<R>,
    marker: &str,
    guard: &CompletionGuard,
) -> WatchOutcome {
    loop {
        let next = tokio::select! {
            _ = guard.claimed() => return WatchOutcome::Cancelled,
            next = lines.next_line() => next,
        };

        match next {
            Ok(Some(line)) => {
                debug!(role = %ProcessRole::Connector, "stdout: {}", line);
                if line.contains(marker) {
                    return WatchOutcome::Ready;
                }
            }
            Ok(None) => return WatchOutcome::Closed,
            Err(e) => {
                debug!(error = %e, "tunnel stdout read error");
                return WatchOutcome::Closed;
            }
        }
    }
}

/// Attach a watcher to the tunnel's stdout.
///
/// Fires `JobEvent::ConnectorReady` at most once, and only while the job is
/// still undecided. After the match the rest of the stream is drained so
/// the tunnel never blocks on a full pipe.
pub fn spawn_connector_watcher<R>(
    stdout: R,
    marker: String,
    guard: Arc<CompletionGuard>,
    event_tx: mpsc::Sender<JobEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = LineReader::new(stdout);

        match watch(&mut lines, &marker, &guard).await {
            WatchOutcome::Ready if !guard.is_claimed() => {
                info!(marker = %marker, "tunnel reported ready");
                let _ = event_tx.send(JobEvent::ConnectorReady).await;
            }
            WatchOutcome::Ready | WatchOutcome::Cancelled => {
                debug!("tunnel watcher stopped: job already decided");
            }
            WatchOutcome::Closed => {
                debug!("tunnel stdout closed before ready marker");
                return;
            }
        }

        drain_lines(&mut lines, ProcessRole::Connector, "stdout").await;
    })
}
