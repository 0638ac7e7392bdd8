//! The component implementation contract.
//!
//! A component implementation is any `Send + Sync` type implementing [`Component`].
//! Every callback has a no-op default, so implementations override only what
//! they use. Constructors are registered by implementation name with an
//! [`ImplementationLoader`], usually the [`Implementations`] table.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::component::context::ComponentContext;
use crate::dependency::EdgeInfo;
use crate::error::ComponentError;
use crate::registry::{downcast, Properties, ServiceObject, ServiceReference};

/// Why a component instance is being deactivated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeactivationReason {
    Unspecified,
    Disabled,
    /// A static or mandatory reference lost its service.
    ReferenceBroken,
    ConfigurationDeleted,
    ConfigurationModified,
    Disposed,
    /// The owning runtime is shutting down.
    BundleStopped,
}

impl DeactivationReason {
    /// Numeric code as used by declarative services.
    pub fn code(self) -> i32 {
        match self {
            DeactivationReason::Unspecified => 0,
            DeactivationReason::Disabled => 1,
            DeactivationReason::ReferenceBroken => 2,
            DeactivationReason::ConfigurationModified => 3,
            DeactivationReason::ConfigurationDeleted => 4,
            DeactivationReason::Disposed => 5,
            DeactivationReason::BundleStopped => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeactivationReason::Unspecified => "unspecified",
            DeactivationReason::Disabled => "disabled",
            DeactivationReason::ReferenceBroken => "reference_broken",
            DeactivationReason::ConfigurationDeleted => "configuration_deleted",
            DeactivationReason::ConfigurationModified => "configuration_modified",
            DeactivationReason::Disposed => "disposed",
            DeactivationReason::BundleStopped => "bundle_stopped",
        }
    }
}

impl fmt::Display for DeactivationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a callback asks the runtime to do next.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum CallbackOutcome {
    #[default]
    Done,
    /// Replace the published service properties.
    Properties(Properties),
    /// Deactivate and reactivate the component (only honored for `updated`).
    Reactivate,
}

/// A service handed to a bind, updated or unbind callback.
#[derive(Clone)]
pub struct BoundService {
    /// Name of the reference the service is bound to.
    pub name: Arc<str>,
    pub reference: ServiceReference,
    pub service: ServiceObject,
}

impl BoundService {
    pub fn downcast<T: std::any::Any + Send + Sync>(&self) -> Option<Arc<T>> {
        downcast(&self.service)
    }
}

impl fmt::Debug for BoundService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundService")
            .field("name", &self.name)
            .field("service_id", &self.reference.id())
            .finish()
    }
}

/// Lifecycle callbacks of a component implementation.
///
/// Errors are never propagated: a failing `activate` leaves the component
/// unsatisfied, a failing `bind` marks the binding as failed, and failures of
/// the other callbacks are logged.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    async fn activate(&self, _ctx: &ComponentContext) -> Result<CallbackOutcome, ComponentError> {
        Ok(CallbackOutcome::Done)
    }

    async fn deactivate(
        &self,
        _ctx: &ComponentContext,
        _reason: DeactivationReason,
    ) -> Result<CallbackOutcome, ComponentError> {
        Ok(CallbackOutcome::Done)
    }

    /// Configuration changed; called only when the metadata declares `modified`.
    async fn modified(&self, _ctx: &ComponentContext) -> Result<CallbackOutcome, ComponentError> {
        Ok(CallbackOutcome::Done)
    }

    async fn bind(&self, _service: &BoundService) -> Result<CallbackOutcome, ComponentError> {
        Ok(CallbackOutcome::Done)
    }

    /// A bound service changed its properties.
    async fn updated(&self, _service: &BoundService) -> Result<CallbackOutcome, ComponentError> {
        Ok(CallbackOutcome::Done)
    }

    async fn unbind(&self, _service: &BoundService) -> Result<CallbackOutcome, ComponentError> {
        Ok(CallbackOutcome::Done)
    }
}

/// A constructed implementation: the callback target plus the object published
/// as the component's service.
#[derive(Clone)]
pub struct ComponentInstance {
    pub(crate) component: Arc<dyn Component>,
    pub(crate) service: ServiceObject,
}

impl ComponentInstance {
    /// Uses the implementation itself as the service object.
    pub fn new<C: Component>(component: C) -> Self {
        Self::from_arc(Arc::new(component))
    }

    pub fn from_arc<C: Component>(component: Arc<C>) -> Self {
        Self {
            component: component.clone(),
            service: component,
        }
    }

    /// Publishes `service` while callbacks go to `component`.
    pub fn with_service(component: Arc<dyn Component>, service: ServiceObject) -> Self {
        Self { component, service }
    }

    pub fn service(&self) -> &ServiceObject {
        &self.service
    }
}

/// Builds an implementation object for a component context.
pub type Constructor =
    Arc<dyn Fn(&ComponentContext) -> Result<ComponentInstance, ComponentError> + Send + Sync>;

/// Resolves implementation names to constructors.
pub trait ImplementationLoader: Send + Sync + 'static {
    fn load(&self, implementation: &str) -> Option<Constructor>;
}

/// Table of constructors keyed by implementation name.
#[derive(Clone, Default)]
pub struct Implementations {
    table: HashMap<String, Constructor>,
}

impl Implementations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, implementation: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&ComponentContext) -> Result<ComponentInstance, ComponentError> + Send + Sync + 'static,
    {
        self.table.insert(implementation.into(), Arc::new(constructor));
        self
    }
}

impl ImplementationLoader for Implementations {
    fn load(&self, implementation: &str) -> Option<Constructor> {
        self.table.get(implementation).cloned()
    }
}

/// A live implementation object with its per-dependency edges.
pub(crate) struct InstanceContext {
    pub(crate) key: u64,
    pub(crate) instance: ComponentInstance,
    pub(crate) context: ComponentContext,
    pub(crate) edges: Vec<EdgeInfo>,
    accessible: AtomicBool,
}

impl InstanceContext {
    pub(crate) fn new(
        key: u64,
        instance: ComponentInstance,
        context: ComponentContext,
        dependencies: usize,
    ) -> Self {
        Self {
            key,
            instance,
            context,
            edges: (0..dependencies).map(|_| EdgeInfo::new()).collect(),
            accessible: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn component(&self) -> &dyn Component {
        &*self.instance.component
    }

    pub(crate) fn edge(&self, index: usize) -> Option<&EdgeInfo> {
        self.edges.get(index)
    }

    /// Activated and not yet being destroyed.
    pub(crate) fn is_accessible(&self) -> bool {
        self.accessible.load(Ordering::SeqCst)
    }

    pub(crate) fn set_accessible(&self, accessible: bool) {
        self.accessible.store(accessible, Ordering::SeqCst);
    }
}
