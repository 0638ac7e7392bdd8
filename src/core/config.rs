//! # Global runtime configuration.
//!
//! Provides [`RuntimeConfig`], the settings shared by every component manager of
//! a [`Runtime`](crate::Runtime).
//!
//! Every blocking point of the lifecycle engine is bounded by one of these
//! timeouts. A zero duration is clamped to one millisecond so a wait can never
//! be configured to block forever or to fail before it starts.

use std::time::Duration;

/// Global configuration for the component runtime.
///
/// ## Field semantics
/// - `lock_timeout`: bound on acquiring a component's activation and state locks
/// - `tracked_timeout`: bound on waiting for in-flight tracker changes
/// - `registration_timeout`: bound on waiting for a queued registration change
/// - `latch_timeout`: bound on waiting for a dependency's open/close bookkeeping
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
///
/// ## Notes
/// All fields are public. Prefer the accessors, which apply the clamping.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Maximum wait for a component lock.
    ///
    /// Expiry is a fatal condition: the call returns
    /// [`RuntimeError::LockTimeout`](crate::RuntimeError::LockTimeout) and a
    /// `LockTimeout` event is published.
    pub lock_timeout: Duration,

    /// Maximum wait for tracker changes below a tracking count to be processed.
    ///
    /// Expiry is logged, published as `TrackedTimeout`, and the wait is abandoned.
    pub tracked_timeout: Duration,

    /// Maximum wait of a queued registration request.
    ///
    /// Expiry is logged and published as `RegistrationTimeout`; the queue keeps going.
    pub registration_timeout: Duration,

    /// Maximum wait of a bind or unbind for the instance's open or close to finish.
    pub latch_timeout: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,
}

fn at_least_one_ms(d: Duration) -> Duration {
    d.max(Duration::from_millis(1))
}

impl RuntimeConfig {
    #[inline]
    pub fn lock_timeout(&self) -> Duration {
        at_least_one_ms(self.lock_timeout)
    }

    #[inline]
    pub fn tracked_timeout(&self) -> Duration {
        at_least_one_ms(self.tracked_timeout)
    }

    #[inline]
    pub fn registration_timeout(&self) -> Duration {
        at_least_one_ms(self.registration_timeout)
    }

    #[inline]
    pub fn latch_timeout(&self) -> Duration {
        at_least_one_ms(self.latch_timeout)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for RuntimeConfig {
    /// Default configuration:
    ///
    /// - all timeouts `5s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            tracked_timeout: Duration::from_secs(5),
            registration_timeout: Duration::from_secs(5),
            latch_timeout: Duration::from_secs(5),
            bus_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_are_clamped() {
        let cfg = RuntimeConfig {
            lock_timeout: Duration::ZERO,
            bus_capacity: 0,
            ..RuntimeConfig::default()
        };
        assert_eq!(cfg.lock_timeout(), Duration::from_millis(1));
        assert_eq!(cfg.bus_capacity_clamped(), 1);
        assert_eq!(cfg.tracked_timeout(), Duration::from_secs(5));
    }
}
