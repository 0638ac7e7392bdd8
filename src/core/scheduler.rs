//! Execution of asynchronous lifecycle work.
//!
//! Asynchronous `enable`/`disable` requests and late binds are handed to a
//! [`Scheduler`]. The default [`TokioScheduler`] spawns them on the current tokio
//! runtime and keeps them in a [`TaskTracker`] so shutdown can wait for them.

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::task::TaskTracker;

#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
    /// Runs `job` in the background.
    fn schedule(&self, job: BoxFuture<'static, ()>);

    /// Waits for every scheduled job to finish.
    async fn drain(&self);
}

#[derive(Clone, Debug, Default)]
pub struct TokioScheduler {
    tasks: TaskTracker,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    fn schedule(&self, job: BoxFuture<'static, ()>) {
        self.tasks.spawn(job);
    }

    async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
