//! Watermark over processed tracking counts.
//!
//! Every tracker change carries a tracking count. Customizers report a count as
//! processed with [`Watermark::tracked`]; a deactivating component waits with
//! [`Watermark::wait_for`] until all counts below its close point are done.
//! Counts may complete out of order: the watermark keeps the highest reported
//! count (`ceiling`) and the set of lower counts not yet reported (`missing`).

use std::collections::BTreeSet;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
struct Marks {
    floor: u64,
    ceiling: u64,
    missing: BTreeSet<u64>,
}

impl Marks {
    fn reached(&self, tracking_count: u64) -> bool {
        self.ceiling >= tracking_count
            && self
                .missing
                .first()
                .map_or(true, |&lowest| lowest >= tracking_count)
    }
}

#[derive(Default)]
pub(crate) struct Watermark {
    marks: Mutex<Marks>,
    notify: Notify,
}

impl Watermark {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn tracked(&self, tracking_count: u64) {
        {
            let mut marks = self.marks.lock();
            if tracking_count == marks.floor + 1 {
                marks.floor += 1;
                marks.missing.remove(&tracking_count);
            } else if tracking_count < marks.ceiling {
                marks.missing.remove(&tracking_count);
            }
            if tracking_count > marks.ceiling {
                let from = marks.ceiling + 1;
                marks.missing.extend(from..tracking_count);
                marks.ceiling = tracking_count;
            }
        }
        self.notify.notify_waiters();
    }

    /// `true` once every count below or equal to `tracking_count` was reported.
    pub(crate) fn is_reached(&self, tracking_count: u64) -> bool {
        self.marks.lock().reached(tracking_count)
    }

    /// Waits until `tracking_count` is reached.
    ///
    /// On timeout the gaps are forgotten so later waits do not hang on the same
    /// missing counts, and `false` is returned.
    pub(crate) async fn wait_for(&self, tracking_count: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_reached(tracking_count) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let mut marks = self.marks.lock();
                if marks.reached(tracking_count) {
                    return true;
                }
                marks.missing.clear();
                return false;
            }
        }
    }

    /// Highest reported count and the counts still missing below it.
    pub(crate) fn snapshot(&self) -> (u64, Vec<u64>) {
        let marks = self.marks.lock();
        (marks.ceiling, marks.missing.iter().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn out_of_order_reports_leave_gaps() {
        let w = Watermark::new();
        w.tracked(1);
        w.tracked(4);
        assert_eq!(w.snapshot(), (4, vec![2, 3]));
        assert!(w.is_reached(2));
        assert!(!w.is_reached(3));
        w.tracked(2);
        w.tracked(3);
        assert_eq!(w.snapshot(), (4, vec![]));
        assert!(w.is_reached(4));
        assert!(!w.is_reached(5));
    }

    #[tokio::test]
    async fn waiter_wakes_when_gap_closes() {
        let w = Arc::new(Watermark::new());
        w.tracked(3);
        let waiter = tokio::spawn({
            let w = w.clone();
            async move { w.wait_for(3, Duration::from_secs(5)).await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        w.tracked(1);
        w.tracked(2);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_forgets_missing_counts() {
        let w = Watermark::new();
        w.tracked(5);
        assert!(!w.wait_for(5, Duration::from_millis(100)).await);
        assert_eq!(w.snapshot(), (5, vec![]));
        assert!(w.wait_for(5, Duration::from_millis(100)).await);
    }
}
