use std::sync::Arc;

use crate::component::{ImplementationLoader, Implementations};
use crate::core::runtime::{Runtime, RuntimeParts};
use crate::core::{RuntimeConfig, Scheduler, TokioScheduler};
use crate::events::Bus;
use crate::registry::{AllowAll, PermissionChecker, ServiceRegistry};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for a [`Runtime`] with optional collaborators.
///
/// Every collaborator has a default: a fresh registry, the tokio scheduler,
/// permissions granting everything and an empty implementation table.
pub struct RuntimeBuilder {
    cfg: RuntimeConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    permissions: Option<Arc<dyn PermissionChecker>>,
    registry: Option<Arc<ServiceRegistry>>,
    loader: Option<Arc<dyn ImplementationLoader>>,
}

impl RuntimeBuilder {
    pub fn new(cfg: RuntimeConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            scheduler: None,
            permissions: None,
            registry: None,
            loader: None,
        }
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive lifecycle events through dedicated workers with
    /// bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Runs asynchronous enable/disable requests and late binds.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Shares an existing registry, e.g. with services registered outside the runtime.
    pub fn with_registry(mut self, registry: Arc<ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Resolves component implementation names to constructors.
    pub fn with_loader(mut self, loader: Arc<dyn ImplementationLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Builds the runtime and starts its event listener.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> Arc<Runtime> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subscribers = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));

        Runtime::new_internal(RuntimeParts {
            config: self.cfg,
            registry: self.registry.unwrap_or_else(ServiceRegistry::new),
            bus,
            subscribers,
            scheduler: self
                .scheduler
                .unwrap_or_else(|| Arc::new(TokioScheduler::new())),
            permissions: self.permissions.unwrap_or_else(|| Arc::new(AllowAll)),
            loader: self
                .loader
                .unwrap_or_else(|| Arc::new(Implementations::new())),
        })
    }
}
