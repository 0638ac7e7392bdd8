//! Error types used by the dsvisor runtime, the service registry and components.
//!
//! This module defines the error enums surfaced by the crate:
//!
//! - [`RuntimeError`]: errors raised by the lifecycle runtime itself.
//! - [`RegistryError`]: errors raised by the in-process service registry.
//! - [`FilterError`]: syntax errors in LDAP-style filter strings.
//! - [`ComponentError`]: errors returned by component callbacks.
//!
//! Activation failures never travel as errors. They are logged, published on the
//! event bus and leave the component `Unsatisfied`. The only conditions returned
//! to callers are the fail-fast ones: lock timeouts and use of a disposed component.
//!
//! All types provide helper methods (`as_label`, `as_message`) for logging/metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the lifecycle runtime.
///
/// Two variants are fatal by construction ([`RuntimeError::is_fatal`]): a lock
/// that could not be obtained within the configured timeout indicates a deadlock
/// bug, and any state-changing call on a disposed component is a programming error.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The component activation or state lock could not be acquired in time.
    #[error("could not obtain {lock} lock for component {component} within {timeout:?}")]
    LockTimeout {
        /// Component name.
        component: String,
        /// Which lock was requested (`activation`, `state`).
        lock: &'static str,
        /// The configured lock timeout.
        timeout: Duration,
    },

    /// A state-changing operation was invoked on a disposed component.
    #[error("{operation} called on disposed component {component}")]
    Disposed {
        /// Component name.
        component: String,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// Component metadata is inconsistent and cannot be managed.
    #[error("invalid metadata for component {component}: {reason}")]
    InvalidMetadata {
        /// Component name.
        component: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A component with the same name is already managed by the runtime.
    #[error("component {name} is already declared")]
    DuplicateComponent {
        /// Component name.
        name: String,
    },

    /// The component is not a component factory.
    #[error("component {component} is not a component factory")]
    NotAFactory {
        /// Component name.
        component: String,
    },

    /// A component factory could not produce an instance.
    #[error("component factory {component} failed to create an instance: {reason}")]
    InstanceCreation {
        /// Factory component name.
        component: String,
        /// Why creation failed.
        reason: String,
    },

    /// The runtime has been shut down.
    #[error("runtime is not active")]
    Inactive,

    /// Registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use dsvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::LockTimeout {
    ///     component: "greeter".into(),
    ///     lock: "activation",
    ///     timeout: Duration::from_secs(5),
    /// };
    /// assert_eq!(err.as_label(), "runtime_lock_timeout");
    /// assert!(err.is_fatal());
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::LockTimeout { .. } => "runtime_lock_timeout",
            RuntimeError::Disposed { .. } => "runtime_disposed",
            RuntimeError::InvalidMetadata { .. } => "runtime_invalid_metadata",
            RuntimeError::DuplicateComponent { .. } => "runtime_duplicate_component",
            RuntimeError::NotAFactory { .. } => "runtime_not_a_factory",
            RuntimeError::InstanceCreation { .. } => "runtime_instance_creation",
            RuntimeError::Inactive => "runtime_inactive",
            RuntimeError::Registry(e) => e.as_label(),
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::LockTimeout {
                component,
                lock,
                timeout,
            } => format!("{lock} lock timeout after {timeout:?}; component={component}"),
            RuntimeError::Disposed {
                component,
                operation,
            } => format!("disposed; component={component} operation={operation}"),
            RuntimeError::InvalidMetadata { component, reason } => {
                format!("invalid metadata; component={component} reason={reason}")
            }
            RuntimeError::DuplicateComponent { name } => format!("duplicate component={name}"),
            RuntimeError::NotAFactory { component } => format!("not a factory; component={component}"),
            RuntimeError::InstanceCreation { component, reason } => {
                format!("instance creation failed; factory={component} reason={reason}")
            }
            RuntimeError::Inactive => "runtime inactive".to_string(),
            RuntimeError::Registry(e) => e.as_message(),
        }
    }

    /// Indicates a programming or deadlock bug rather than a recoverable condition.
    ///
    /// Returns `true` for [`RuntimeError::LockTimeout`] and [`RuntimeError::Disposed`].
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RuntimeError::LockTimeout { .. } | RuntimeError::Disposed { .. }
        )
    }
}

/// # Errors produced by the service registry.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// A registration must name at least one interface.
    #[error("a service must be registered under at least one interface")]
    NoInterfaces,

    /// The registration was already unregistered.
    #[error("service {service_id} is already unregistered")]
    AlreadyUnregistered {
        /// Id of the unregistered service.
        service_id: u64,
    },

    /// A filter string could not be parsed.
    #[error(transparent)]
    InvalidFilter(#[from] FilterError),
}

impl RegistryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::NoInterfaces => "registry_no_interfaces",
            RegistryError::AlreadyUnregistered { .. } => "registry_already_unregistered",
            RegistryError::InvalidFilter(_) => "registry_invalid_filter",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RegistryError::NoInterfaces => "no interfaces".to_string(),
            RegistryError::AlreadyUnregistered { service_id } => {
                format!("already unregistered; service_id={service_id}")
            }
            RegistryError::InvalidFilter(e) => format!("invalid filter: {e}"),
        }
    }
}

/// Syntax error in an LDAP-style filter string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid filter {filter:?} at offset {offset}: {reason}")]
pub struct FilterError {
    /// The filter text that failed to parse.
    pub filter: String,
    /// Byte offset where parsing stopped.
    pub offset: usize,
    /// What the parser expected.
    pub reason: &'static str,
}

/// # Errors returned by component callbacks.
///
/// The runtime never propagates these: a failing `activate` leaves the component
/// unsatisfied, a failing `bind` is reported as a bind failure, and failures in
/// `deactivate`/`unbind` are logged and ignored.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComponentError {
    /// The callback failed.
    #[error("callback failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The implementation object could not be constructed.
    #[error("construction failed: {error}")]
    Construction {
        /// The underlying error message.
        error: String,
    },
}

impl ComponentError {
    /// Shorthand for [`ComponentError::Fail`].
    ///
    /// # Example
    /// ```
    /// use dsvisor::ComponentError;
    ///
    /// let err = ComponentError::fail("database unreachable");
    /// assert_eq!(err.as_label(), "component_failed");
    /// ```
    pub fn fail(error: impl Into<String>) -> Self {
        ComponentError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ComponentError::Fail { .. } => "component_failed",
            ComponentError::Construction { .. } => "component_construction_failed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ComponentError::Fail { error } => format!("error: {error}"),
            ComponentError::Construction { error } => format!("construction: {error}"),
        }
    }
}
