use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use async_trait::async_trait;

use crate::component::CallbackOutcome;
use crate::dependency::{DependencyManager, RefPair};
use crate::error::ComponentError;
use crate::registry::ServiceReference;

/// What a dependency manager needs from the component that owns it.
///
/// Implemented by the component manager. Bind, updated and unbind requests are
/// routed through the owner so they reach every live instance with the right
/// edge bookkeeping.
#[async_trait]
pub(crate) trait DependencyOwner: Send + Sync + 'static {
    fn component_name(&self) -> &str;

    /// Counter shared by all of the component's trackers.
    fn tracking_count(&self) -> Arc<AtomicU64>;

    /// Reports that the change numbered `tracking_count` is fully processed.
    fn tracked(&self, tracking_count: u64);

    /// Waits until every change up to `tracking_count` is processed.
    async fn wait_for_tracked(&self, tracking_count: u64);

    async fn activate(&self);

    /// Deactivates because a reference lost its service or must rebind.
    async fn deactivate_for_reference(&self);

    async fn invoke_bind(&self, dm: &DependencyManager, pair: &Arc<RefPair>, tracking_count: u64);

    /// Returns `true` when the component asked to be reactivated.
    async fn invoke_updated(&self, dm: &DependencyManager, pair: &Arc<RefPair>, tracking_count: u64) -> bool;

    async fn invoke_unbind(&self, dm: &DependencyManager, pair: &Arc<RefPair>, tracking_count: u64);

    /// Applies properties returned from a callback.
    async fn apply_outcome(&self, outcome: CallbackOutcome);

    fn bind_failed(&self, dm: &DependencyManager, reference: &ServiceReference, error: &ComponentError);

    /// Retries a failed service retrieval once `reference` is registered again.
    fn register_missing(&self, dm: Arc<DependencyManager>, reference: &ServiceReference, tracking_count: u64);
}
