// src/engine/guard.rs

//! The single "who decides the outcome" latch for a job run.

use std::sync::OnceLock;

use tokio::sync::watch;

/// Set-once job outcome shared by the core and every background listener.
///
/// `claim` is atomic: when several completion sources race (server exit,
/// readiness timeout, tunnel exit, cloud-test exit, cancellation) exactly
/// one of them wins. Everyone else must check [`is_claimed`] before any
/// further side effect, or await [`claimed`] to stop early.
///
/// [`is_claimed`]: CompletionGuard::is_claimed
/// [`claimed`]: CompletionGuard::claimed
#[derive(Debug)]
pub struct CompletionGuard {
    outcome: OnceLock<i32>,
    claimed_tx: watch::Sender<bool>,
}

impl CompletionGuard {
    pub fn new() -> Self {
        let (claimed_tx, _) = watch::channel(false);
        Self {
            outcome: OnceLock::new(),
            claimed_tx,
        }
    }

    /// Record `code` as the job's outcome. Returns `false` (and changes
    /// nothing) if an outcome was already recorded.
    pub fn claim(&self, code: i32) -> bool {
        if self.outcome.set(code).is_err() {
            return false;
        }
        self.claimed_tx.send_replace(true);
        true
    }

    pub fn is_claimed(&self) -> bool {
        self.outcome.get().is_some()
    }

    pub fn outcome(&self) -> Option<i32> {
        self.outcome.get().copied()
    }

    /// Resolves once an outcome has been claimed (immediately if it already
    /// has).
    pub async fn claimed(&self) {
        let mut rx = self.claimed_tx.subscribe();
        let _ = rx.wait_for(|claimed| *claimed).await;
    }
}

impl Default for CompletionGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn first_claim_wins() {
        let guard = CompletionGuard::new();
        assert!(!guard.is_claimed());
        assert!(guard.claim(3));
        assert!(!guard.claim(0));
        assert_eq!(guard.outcome(), Some(3));
    }

    #[test]
    fn concurrent_claims_pick_exactly_one() {
        let guard = Arc::new(CompletionGuard::new());
        let winners: usize = (0..8)
            .map(|code| {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || guard.claim(code))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn claimed_wakes_waiters() {
        let guard = Arc::new(CompletionGuard::new());
        let waiter = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move { guard.claimed().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        guard.claim(1);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        // Already claimed: returns immediately.
        guard.claimed().await;
    }
}
