//! # Subscriber trait
//!
//! [`Subscribe`] receives the lifecycle events of every component managed by a
//! runtime. Each subscriber is driven by its own worker fed from a bounded queue
//! owned by the [`SubscriberSet`](crate::subscribers::SubscriberSet).
//!
//! ## Contract
//! - `on_event` may be slow; it never delays component managers or other
//!   subscribers.
//! - [`Subscribe::queue_capacity`] sizes the queue. Events that do not fit are
//!   dropped for this subscriber and a `SubscriberOverflow` event is published.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use dsvisor::{Event, Subscribe};
//!
//! struct Audit;
//!
//! #[async_trait]
//! impl Subscribe for Audit {
//!     async fn on_event(&self, event: &Event) {
//!         let _ = (event.kind, event.component.as_deref());
//!     }
//!     fn name(&self) -> &'static str { "audit" }
//!     fn queue_capacity(&self) -> usize { 512 }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Observer of runtime events.
///
/// Runs on a subscriber-dedicated task; avoid blocking the async runtime.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &Event);

    /// Name used in overflow and panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this subscriber's queue (min 1).
    fn queue_capacity(&self) -> usize {
        1024
    }
}
