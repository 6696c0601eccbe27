use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use sauceci::readiness::{HttpProbe, ProbeResult};
use tokio::time::Instant;

/// Probe that fails with 503 until a given attempt, then answers 200.
#[derive(Debug, Clone)]
pub struct FakeProbe {
    succeed_on: Option<u32>,
    calls: Arc<AtomicU32>,
    times: Arc<Mutex<Vec<Instant>>>,
}

impl FakeProbe {
    /// Succeeds on the `attempt`-th call (1-based).
    pub fn ready_on(attempt: u32) -> Self {
        Self {
            succeed_on: Some(attempt),
            calls: Arc::new(AtomicU32::new(0)),
            times: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn never_ready() -> Self {
        Self {
            succeed_on: None,
            ..Self::ready_on(0)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// When each probe went out.
    pub fn call_times(&self) -> Vec<Instant> {
        self.times.lock().unwrap().clone()
    }
}

impl HttpProbe for FakeProbe {
    fn probe<'a>(&'a self, _url: &'a str) -> Pin<Box<dyn Future<Output = ProbeResult> + Send + 'a>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.times.lock().unwrap().push(Instant::now());
            match self.succeed_on {
                Some(at) if n >= at => ProbeResult::Success,
                _ => ProbeResult::Status(503),
            }
        })
    }
}
