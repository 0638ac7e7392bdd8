use async_trait::async_trait;

use crate::registry::ServiceReference;

/// Callbacks a [`ServiceTracker`](crate::tracker::ServiceTracker) invokes as services come and go.
///
/// All callbacks run outside the tracker's internal lock, on the task that
/// observed the change (the opener for the initial services, the tracker's
/// consumer task afterwards, or the closer for [`complete_close`]).
///
/// Every callback except `adding` receives the tracking count the change was
/// assigned; implementations are expected to report it back to whoever waits on
/// it once the change is fully processed.
///
/// [`complete_close`]: crate::tracker::ServiceTracker::complete_close
#[async_trait]
pub trait TrackerCustomizer: Send + Sync + 'static {
    /// Object stored alongside each tracked reference.
    type Item: Clone + Send + Sync + 'static;

    /// Produces the tracked object; `None` leaves the service untracked.
    async fn adding(&self, reference: &ServiceReference) -> Option<Self::Item>;

    /// The service is now tracked; `service_count` is the size after insertion.
    async fn added(
        &self,
        reference: &ServiceReference,
        item: &Self::Item,
        tracking_count: u64,
        service_count: usize,
    );

    /// A tracked service changed its properties and still matches.
    async fn modified(&self, reference: &ServiceReference, item: &Self::Item, tracking_count: u64);

    /// A tracked service is about to be announced as removed; `remaining` is the
    /// number of services still tracked.
    async fn removing(&self, _reference: &ServiceReference, _item: &Self::Item, _remaining: usize) {}

    /// The service is no longer tracked.
    async fn removed(&self, reference: &ServiceReference, item: &Self::Item, tracking_count: u64);
}
