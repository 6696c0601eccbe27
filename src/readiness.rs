// src/readiness.rs

//! HTTP readiness polling for the application under test.
//!
//! One GET per interval tick; a 200 resolves immediately, anything else is a
//! failed attempt. Polling is tied to the job: once the job's outcome has
//! been claimed no further probes go out.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::engine::guard::CompletionGuard;

/// How often and how long to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Upper bound for a single probe; a slower answer is a failed attempt.
    pub probe_timeout: Duration,
}

impl ReadinessPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            probe_timeout: interval,
        }
    }
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), 10)
    }
}

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// HTTP 200.
    Success,
    /// Any other HTTP status.
    Status(u16),
    /// Transport error (connection refused, reset, ...).
    Error(String),
}

/// Something that can issue one HTTP GET.
pub trait HttpProbe: Send + Sync {
    fn probe<'a>(&'a self, url: &'a str) -> Pin<Box<dyn Future<Output = ProbeResult> + Send + 'a>>;
}

/// Production probe backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    pub fn new(request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpProbe for ReqwestProbe {
    fn probe<'a>(&'a self, url: &'a str) -> Pin<Box<dyn Future<Output = ProbeResult> + Send + 'a>> {
        Box::pin(async move {
            match self.client.get(url).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::OK => ProbeResult::Success,
                Ok(resp) => ProbeResult::Status(resp.status().as_u16()),
                Err(e) => ProbeResult::Error(e.to_string()),
            }
        })
    }
}

/// How a poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
    /// The job finished some other way first.
    Cancelled,
}

/// Probe `url` until it answers 200, `policy.max_attempts` probes have
/// failed, or `guard` is claimed.
///
/// The first probe goes out one interval after the call, matching a
/// server that needs a moment to bind.
pub async fn poll(
    probe: &dyn HttpProbe,
    url: &str,
    policy: ReadinessPolicy,
    guard: &CompletionGuard,
) -> PollOutcome {
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = guard.claimed() => return PollOutcome::Cancelled,
            _ = sleep(policy.interval) => {}
        }
        if guard.is_claimed() {
            return PollOutcome::Cancelled;
        }

        let attempt = failures + 1;
        let result = tokio::select! {
            _ = guard.claimed() => return PollOutcome::Cancelled,
            res = timeout(policy.probe_timeout, probe.probe(url)) => {
                res.unwrap_or_else(|_| ProbeResult::Error("probe timed out".to_string()))
            }
        };
        if guard.is_claimed() {
            return PollOutcome::Cancelled;
        }

        match result {
            ProbeResult::Success => {
                debug!(url, attempt, "readiness probe succeeded");
                return PollOutcome::Ready { attempts: attempt };
            }
            ProbeResult::Status(status) => {
                debug!(url, attempt, status, "readiness probe got non-200");
            }
            ProbeResult::Error(err) => {
                debug!(url, attempt, error = %err, "readiness probe failed");
            }
        }

        failures += 1;
        if failures >= policy.max_attempts {
            return PollOutcome::TimedOut { attempts: failures };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails until the `succeed_on`-th call (1-based); 0 = never.
    struct CountingProbe {
        calls: AtomicU32,
        succeed_on: u32,
    }

    impl HttpProbe for CountingProbe {
        fn probe<'a>(&'a self, _url: &'a str) -> Pin<Box<dyn Future<Output = ProbeResult> + Send + 'a>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let succeed = self.succeed_on != 0 && n >= self.succeed_on;
            Box::pin(async move {
                if succeed {
                    ProbeResult::Success
                } else {
                    ProbeResult::Status(503)
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_third_attempt() {
        let probe = CountingProbe {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        };
        let guard = CompletionGuard::new();
        let outcome = poll(&probe, "http://localhost:8031/", ReadinessPolicy::default(), &guard).await;
        assert_eq!(outcome, PollOutcome::Ready { attempts: 3 });
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_only_after_max_attempts() {
        let probe = CountingProbe {
            calls: AtomicU32::new(0),
            succeed_on: 0,
        };
        let guard = CompletionGuard::new();
        let start = tokio::time::Instant::now();
        let outcome = poll(&probe, "http://localhost:8031/", ReadinessPolicy::default(), &guard).await;
        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 10 });
        assert_eq!(probe.calls.load(Ordering::SeqCst), 10);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn claimed_guard_stops_probing() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicU32::new(0),
            succeed_on: 0,
        });
        let guard = Arc::new(CompletionGuard::new());

        let task = {
            let probe = Arc::clone(&probe);
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                poll(probe.as_ref(), "http://localhost:8031/", ReadinessPolicy::default(), &guard).await
            })
        };

        sleep(Duration::from_millis(2500)).await;
        guard.claim(1);
        assert_eq!(task.await.unwrap(), PollOutcome::Cancelled);

        let calls = probe.calls.load(Ordering::SeqCst);
        assert_eq!(calls, 2);
        sleep(Duration::from_secs(20)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), calls);
    }
}
