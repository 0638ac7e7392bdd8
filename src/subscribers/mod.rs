//! # Event subscribers.
//!
//! [`Subscribe`] is the extension point for observing lifecycle events published
//! on the runtime's [`Bus`](crate::events::Bus). The runtime listener hands every
//! event to a [`SubscriberSet`], which feeds each subscriber through its own
//! bounded queue and worker.
//!
//! ```text
//! ComponentManager ── publish(Event) ──► Bus ──► runtime listener ──► SubscriberSet
//!                                                                   ┌──────┼──────┐
//!                                                                   ▼      ▼      ▼
//!                                                              LogWriter Metrics Custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use async_trait::async_trait;
//! use dsvisor::{Event, EventKind, Subscribe};
//!
//! struct FailureCounter;
//!
//! #[async_trait]
//! impl Subscribe for FailureCounter {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::ActivationFailed {
//!             // increment a counter
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "failure-counter"
//!     }
//! }
//! ```

#[cfg(feature = "logging")]
mod embedded;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
