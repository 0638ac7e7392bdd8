//! Per-instance, per-dependency open/close bookkeeping.
//!
//! When a dependency is opened for an instance, the tracking count at that
//! moment becomes the open point; events numbered below it were already covered
//! by the initial bind. Closing records the close point the same way. Bind,
//! updated and unbind callbacks arriving from the tracker consult these points
//! and wait on the latches so that binds never overtake the open and unbinds
//! never overtake the close.

use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Default)]
struct Range {
    open: Option<u64>,
    close: Option<u64>,
}

pub struct EdgeInfo {
    range: Mutex<Range>,
    open_latch: CancellationToken,
    close_latch: CancellationToken,
}

impl Default for EdgeInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeInfo {
    pub fn new() -> Self {
        Self {
            range: Mutex::new(Range::default()),
            open_latch: CancellationToken::new(),
            close_latch: CancellationToken::new(),
        }
    }

    pub fn set_open(&self, tracking_count: u64) {
        self.range.lock().open = Some(tracking_count);
    }

    pub fn set_close(&self, tracking_count: u64) {
        self.range.lock().close = Some(tracking_count);
    }

    pub fn open_done(&self) {
        self.open_latch.cancel();
    }

    pub fn close_done(&self) {
        self.close_latch.cancel();
    }

    /// Waits for the open bookkeeping to finish; returns `false` on timeout.
    pub async fn wait_for_open(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.open_latch.cancelled())
            .await
            .is_ok()
    }

    /// Waits for the close bookkeeping to finish; returns `false` on timeout.
    pub async fn wait_for_close(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.close_latch.cancelled())
            .await
            .is_ok()
    }

    /// Marks the edge as never opened: every event is out of range and waits return at once.
    pub fn ignore(&self) {
        {
            let mut range = self.range.lock();
            range.open = Some(u64::MAX);
            range.close = Some(u64::MAX - 1);
        }
        self.open_latch.cancel();
        self.close_latch.cancel();
    }

    /// `true` once the open point is recorded.
    pub fn is_open_set(&self) -> bool {
        self.range.lock().open.is_some()
    }

    /// `true` when the event was already covered by open or comes after close.
    pub fn out_of_range(&self, tracking_count: u64) -> bool {
        let range = *self.range.lock();
        range.open.is_some_and(|open| tracking_count < open)
            || range.close.is_some_and(|close| tracking_count > close)
    }

    pub fn before_range(&self, tracking_count: u64) -> bool {
        self.range.lock().open.is_some_and(|open| tracking_count < open)
    }

    pub fn after_range(&self, tracking_count: u64) -> bool {
        self.range.lock().close.is_some_and(|close| tracking_count > close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_follow_open_and_close_points() {
        let edge = EdgeInfo::new();
        assert!(!edge.out_of_range(3));
        edge.set_open(5);
        assert!(edge.before_range(4));
        assert!(edge.out_of_range(4));
        assert!(!edge.out_of_range(5));
        edge.set_close(8);
        assert!(!edge.after_range(8));
        assert!(edge.after_range(9));
        assert!(edge.out_of_range(9));
    }

    #[tokio::test]
    async fn ignored_edge_releases_waiters() {
        let edge = EdgeInfo::new();
        assert!(!edge.wait_for_open(Duration::from_millis(10)).await);
        edge.ignore();
        assert!(edge.wait_for_open(Duration::from_millis(10)).await);
        assert!(edge.wait_for_close(Duration::from_millis(10)).await);
        assert!(edge.out_of_range(100));
    }
}
