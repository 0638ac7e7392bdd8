//! Serialization of enable and disable requests.
//!
//! Each request takes the latch: it waits for the request in flight to finish,
//! then installs a fresh token that is resolved when its [`LatchGuard`] drops.
//! An asynchronous request moves the guard into the scheduled job, so the next
//! request waits for the job rather than for the caller.

use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub(crate) struct EnableLatch {
    current: Mutex<CancellationToken>,
}

impl EnableLatch {
    pub(crate) fn new() -> Self {
        let resolved = CancellationToken::new();
        resolved.cancel();
        Self {
            current: Mutex::new(resolved),
        }
    }

    /// Waits for the previous request; `None` when it did not finish in time.
    pub(crate) async fn acquire(&self, timeout: Duration) -> Option<LatchGuard> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let previous = self.current.lock().clone();
            if tokio::time::timeout_at(deadline, previous.cancelled())
                .await
                .is_err()
            {
                return None;
            }
            let mut current = self.current.lock();
            if current.is_cancelled() {
                let fresh = CancellationToken::new();
                *current = fresh.clone();
                return Some(LatchGuard { token: fresh });
            }
        }
    }
}

/// Held for the duration of one enable or disable request.
pub(crate) struct LatchGuard {
    token: CancellationToken,
}

impl LatchGuard {
    pub(crate) fn completion(&self) -> Completion {
        Completion {
            token: self.token.clone(),
        }
    }
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Resolves when an enable or disable request has finished its work.
#[derive(Clone, Debug)]
pub struct Completion {
    token: CancellationToken,
}

impl Completion {
    /// An already finished request.
    pub(crate) fn done() -> Self {
        let token = CancellationToken::new();
        token.cancel();
        Self { token }
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn second_request_waits_for_first() {
        let latch = Arc::new(EnableLatch::new());
        let first = latch.acquire(Duration::from_secs(1)).await.unwrap();
        let completion = first.completion();

        let waiter = tokio::spawn({
            let latch = latch.clone();
            async move { latch.acquire(Duration::from_secs(5)).await.is_some() }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        assert!(!completion.is_done());

        drop(first);
        assert!(completion.is_done());
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_times_out_while_held() {
        let latch = EnableLatch::new();
        let _held = latch.acquire(Duration::from_secs(1)).await.unwrap();
        assert!(latch.acquire(Duration::from_millis(50)).await.is_none());
    }
}
