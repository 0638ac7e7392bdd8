//! # Registration queue.
//!
//! [`RegistrationManager`] serializes register and unregister requests for the
//! one service registration a component owns.
//!
//! ```text
//! change(desired)
//!   ├─ queue empty and already in `desired` ─► false
//!   ├─ queue tail already asks for `desired` ─► false (collapsed)
//!   ├─ queue was non-empty ─► enqueue, wait for own op (bounded) ─► false
//!   └─ queue was empty ─► become the executor: run every queued op in FIFO
//!                         order until the queue drains ─► true
//! ```
//!
//! The queue lock is never held across the registrar call, so requests arriving
//! while the executor registers simply queue up behind it.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RegState {
    Registered,
    Unregistered,
}

impl RegState {
    fn matches(self, registered: bool) -> bool {
        match self {
            RegState::Registered => registered,
            RegState::Unregistered => !registered,
        }
    }
}

impl fmt::Display for RegState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegState::Registered => "registered",
            RegState::Unregistered => "unregistered",
        })
    }
}

/// Performs the actual registry calls for a [`RegistrationManager`].
#[async_trait]
pub(crate) trait Registrar<T>: Send + Sync {
    /// Returns `None` when the service could not be registered.
    async fn register(&self) -> Option<T>;

    /// Runs once the executor drained the queue with a live registration.
    async fn post_register(&self, _registration: &T) {}

    async fn unregister(&self, registration: T);

    /// A queued request did not complete within the timeout.
    fn timed_out(&self, _desired: RegState) {}
}

#[derive(Clone)]
struct Op {
    desired: RegState,
    done: CancellationToken,
}

struct Queue<T> {
    ops: VecDeque<Op>,
    registration: Option<T>,
}

pub(crate) struct RegistrationManager<T> {
    queue: Mutex<Queue<T>>,
    timeout: Duration,
}

impl<T: Clone + Send + Sync + 'static> RegistrationManager<T> {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            queue: Mutex::new(Queue {
                ops: VecDeque::new(),
                registration: None,
            }),
            timeout,
        }
    }

    pub(crate) fn registration(&self) -> Option<T> {
        self.queue.lock().registration.clone()
    }

    /// Moves the registration towards `desired`.
    ///
    /// Returns `true` only for the caller that executed the queue.
    pub(crate) async fn change<R>(&self, desired: RegState, registrar: &R) -> bool
    where
        R: Registrar<T> + ?Sized,
    {
        let waiting = {
            let mut queue = self.queue.lock();
            match queue.ops.back() {
                None if desired.matches(queue.registration.is_some()) => {
                    tracing::trace!(%desired, "registration already in desired state");
                    return false;
                }
                Some(last) if last.desired == desired => {
                    tracing::trace!(%desired, "duplicate registration request");
                    return false;
                }
                _ => {}
            }
            let op = Op {
                desired,
                done: CancellationToken::new(),
            };
            queue.ops.push_back(op.clone());
            (queue.ops.len() > 1).then_some(op.done)
        };

        if let Some(done) = waiting {
            if tokio::time::timeout(self.timeout, done.cancelled())
                .await
                .is_err()
            {
                tracing::warn!(%desired, timeout = ?self.timeout, "timed out waiting for registration change");
                registrar.timed_out(desired);
            }
            return false;
        }

        let mut last = None;
        loop {
            let next = self.queue.lock().ops.front().cloned();
            let Some(next) = next else {
                break;
            };
            match next.desired {
                RegState::Registered => {
                    let registration = registrar.register().await;
                    self.queue.lock().registration = registration.clone();
                    last = registration;
                }
                RegState::Unregistered => {
                    let registration = self.queue.lock().registration.take();
                    if let Some(registration) = registration {
                        registrar.unregister(registration).await;
                    }
                    last = None;
                }
            }
            next.done.cancel();
            let mut queue = self.queue.lock();
            queue.ops.pop_front();
            if queue.ops.is_empty() {
                break;
            }
        }
        if let Some(registration) = last {
            registrar.post_register(&registration).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    struct Gated {
        gate: Semaphore,
        next: AtomicU32,
        log: Mutex<Vec<String>>,
    }

    impl Gated {
        fn new(open: bool) -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(if open { Semaphore::MAX_PERMITS } else { 0 }),
                next: AtomicU32::new(1),
                log: Mutex::new(Vec::new()),
            })
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    #[async_trait]
    impl Registrar<u32> for Gated {
        async fn register(&self) -> Option<u32> {
            self.log.lock().push("register:start".into());
            self.gate.acquire().await.ok()?.forget();
            let id = self.next.fetch_add(1, Ordering::SeqCst);
            self.log.lock().push(format!("register:{id}"));
            Some(id)
        }

        async fn unregister(&self, registration: u32) {
            self.log.lock().push(format!("unregister:{registration}"));
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    #[tokio::test]
    async fn same_state_requests_collapse() {
        let manager = Arc::new(RegistrationManager::<u32>::new(Duration::from_secs(2)));
        let registrar = Gated::new(false);

        let executor = tokio::spawn({
            let (m, r) = (manager.clone(), registrar.clone());
            async move { m.change(RegState::Registered, &*r).await }
        });
        eventually(|| registrar.log().len() == 1).await;

        assert!(!manager.change(RegState::Registered, &*registrar).await);
        assert!(!manager.change(RegState::Registered, &*registrar).await);

        registrar.gate.add_permits(10);
        assert!(executor.await.unwrap());
        assert_eq!(registrar.log(), vec!["register:start", "register:1"]);
        assert_eq!(manager.registration(), Some(1));

        assert!(!manager.change(RegState::Registered, &*registrar).await);
    }

    #[tokio::test]
    async fn register_then_unregister_runs_in_order() {
        let manager = Arc::new(RegistrationManager::<u32>::new(Duration::from_secs(2)));
        let registrar = Gated::new(false);

        let executor = tokio::spawn({
            let (m, r) = (manager.clone(), registrar.clone());
            async move { m.change(RegState::Registered, &*r).await }
        });
        eventually(|| registrar.log().len() == 1).await;

        let waiter = tokio::spawn({
            let (m, r) = (manager.clone(), registrar.clone());
            async move { m.change(RegState::Unregistered, &*r).await }
        });
        eventually(|| manager.queue.lock().ops.len() == 2).await;
        assert!(!waiter.is_finished());

        registrar.gate.add_permits(10);
        assert!(executor.await.unwrap());
        assert!(!waiter.await.unwrap());
        assert_eq!(
            registrar.log(),
            vec!["register:start", "register:1", "unregister:1"]
        );
        assert_eq!(manager.registration(), None);
    }

    #[tokio::test]
    async fn already_unregistered_is_a_no_op() {
        let manager = RegistrationManager::<u32>::new(Duration::from_secs(1));
        let registrar = Gated::new(true);
        assert!(!manager.change(RegState::Unregistered, &*registrar).await);
        assert!(registrar.log().is_empty());
    }
}
