//! # Lifecycle events emitted by component managers and the runtime.
//!
//! The [`EventKind`] enum classifies events across three categories:
//! - **Lifecycle events**: enable, disable, state changes, activation and deactivation
//! - **Registration events**: the component's service appearing and disappearing
//! - **Diagnostics**: lock, tracked-wait and registration timeouts, subscriber trouble
//!
//! The [`Event`] struct carries the component, dependency, service and reason
//! metadata relevant to the kind.
//!
//! ## Ordering
//! `seq` is taken from one process-wide counter, so sorting by it recovers
//! publish order across runtimes and subscriber queues.
//!
//! ## Example
//! ```rust
//! use dsvisor::{Event, EventKind, State};
//!
//! let ev = Event::new(EventKind::StateChanged)
//!     .with_component("greeter", Some(3))
//!     .with_state(State::Active);
//!
//! assert_eq!(ev.kind, EventKind::StateChanged);
//! assert_eq!(ev.component.as_deref(), Some("greeter"));
//! assert_eq!(ev.state, Some(State::Active));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::component::State;

/// Source of [`Event::seq`].
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// What happened to a component, its service or a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Lifecycle ===
    /// Component enabled and assigned an id.
    ///
    /// Sets: `component`, `component_id`
    ComponentEnabled,

    /// Component disabled; its id is released.
    ///
    /// Sets: `component`, `component_id`
    ComponentDisabled,

    /// Component disposed (terminal).
    ///
    /// Sets: `component`, `reason`
    ComponentDisposed,

    /// Component entered a new lifecycle state.
    ///
    /// Sets: `component`, `component_id`, `state`
    StateChanged,

    /// An implementation instance was created and activated.
    ///
    /// Sets: `component`, `component_id`
    ComponentActivated,

    /// An implementation instance was deactivated and dropped.
    ///
    /// Sets: `component`, `component_id`, `reason` (deactivation reason)
    ComponentDeactivated,

    /// Instance creation or the activate callback failed.
    ///
    /// Sets: `component`, `component_id`, `reason`
    ActivationFailed,

    /// A bind callback failed.
    ///
    /// Sets: `component`, `reference`, `service_id`, `reason`
    BindFailed,

    /// New configuration was applied.
    ///
    /// Sets: `component`, `component_id`, `reason` (`modified`, `reactivated` or `deleted`)
    ComponentReconfigured,

    // === Registration ===
    /// The component's service was registered.
    ///
    /// Sets: `component`, `component_id`, `service_id`
    ServiceRegistered,

    /// The component's service was unregistered.
    ///
    /// Sets: `component`, `component_id`, `service_id`
    ServiceUnregistered,

    // === Diagnostics ===
    /// A component lock could not be acquired in time.
    ///
    /// Sets: `component`, `reason` (lock name), `timeout_ms`
    LockTimeout,

    /// Waiting for tracked service changes timed out.
    ///
    /// Sets: `component`, `reason` (tracking count), `timeout_ms`
    TrackedTimeout,

    /// A queued registration change did not complete in time.
    ///
    /// Sets: `component`, `reason` (desired state), `timeout_ms`
    RegistrationTimeout,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `component` (subscriber name), `reason` (panic message)
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `component` (subscriber name), `reason`
    SubscriberOverflow,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ComponentEnabled => "component_enabled",
            EventKind::ComponentDisabled => "component_disabled",
            EventKind::ComponentDisposed => "component_disposed",
            EventKind::StateChanged => "state_changed",
            EventKind::ComponentActivated => "component_activated",
            EventKind::ComponentDeactivated => "component_deactivated",
            EventKind::ActivationFailed => "activation_failed",
            EventKind::BindFailed => "bind_failed",
            EventKind::ComponentReconfigured => "component_reconfigured",
            EventKind::ServiceRegistered => "service_registered",
            EventKind::ServiceUnregistered => "service_unregistered",
            EventKind::LockTimeout => "lock_timeout",
            EventKind::TrackedTimeout => "tracked_timeout",
            EventKind::RegistrationTimeout => "registration_timeout",
            EventKind::SubscriberPanicked => "subscriber_panicked",
            EventKind::SubscriberOverflow => "subscriber_overflow",
        }
    }
}

/// One lifecycle notification.
///
/// Which optional fields are filled depends on [`EventKind`]; see each variant.
#[derive(Clone, Debug)]
pub struct Event {
    /// Publish order.
    pub seq: u64,
    /// Creation time.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Component name (subscriber name for subscriber events).
    pub component: Option<Arc<str>>,
    pub component_id: Option<u64>,
    /// Reference (dependency) name.
    pub reference: Option<Arc<str>>,
    pub service_id: Option<u64>,
    /// State entered, for [`EventKind::StateChanged`].
    pub state: Option<State>,
    /// Human-readable reason (errors, deactivation reasons, overflow details).
    pub reason: Option<Arc<str>>,
    /// Timeout that expired, in milliseconds.
    pub timeout_ms: Option<u32>,
}

impl Event {
    /// Stamps `seq` and `at`; every other field starts empty.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            component: None,
            component_id: None,
            reference: None,
            service_id: None,
            state: None,
            reason: None,
            timeout_ms: None,
        }
    }

    /// Attaches the component name and, when assigned, its id.
    #[inline]
    pub fn with_component(mut self, name: impl Into<Arc<str>>, id: Option<u64>) -> Self {
        self.component = Some(name.into());
        self.component_id = id;
        self
    }

    #[inline]
    pub fn with_reference(mut self, reference: impl Into<Arc<str>>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    #[inline]
    pub fn with_service_id(mut self, service_id: u64) -> Self {
        self.service_id = Some(service_id);
        self
    }

    #[inline]
    pub fn with_state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Saturates at `u32::MAX` milliseconds.
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// An event that did not fit in `subscriber`'s queue.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_component(subscriber, None)
            .with_reason(reason)
    }

    /// `subscriber` panicked inside `on_event`.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_component(subscriber, None)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::new(EventKind::ComponentEnabled);
        let b = Event::new(EventKind::ComponentDisabled);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn subscriber_events_are_recognized() {
        let ev = Event::subscriber_overflow("log", "full");
        assert!(ev.is_subscriber_overflow());
        assert_eq!(ev.component.as_deref(), Some("log"));
        assert_eq!(ev.component_id, None);
        assert!(Event::subscriber_panicked("log", "boom".into()).is_subscriber_panic());
    }

    #[test]
    fn timeout_is_stored_in_millis() {
        let ev = Event::new(EventKind::LockTimeout).with_timeout(Duration::from_secs(5));
        assert_eq!(ev.timeout_ms, Some(5000));
    }
}
