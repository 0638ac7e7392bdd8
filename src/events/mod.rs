//! Lifecycle events and the bus that carries them.
//!
//! Component managers publish an [`Event`] for every state change, service
//! registration and lock timeout. Subscriber workers publish overflow and
//! panic reports. The runtime listener forwards everything to its
//! `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
