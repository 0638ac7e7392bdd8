use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::component::manager::ComponentManager;
use crate::registry::{ConsumerId, Properties, ServiceObject, ServiceReference};

/// What an implementation sees of its component: identity, configuration and
/// access to the services bound to its references.
#[derive(Clone)]
pub struct ComponentContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    name: String,
    component_id: u64,
    properties: RwLock<Properties>,
    key: u64,
    consumer: Option<ConsumerId>,
    manager: Weak<ComponentManager>,
}

impl ComponentContext {
    pub(crate) fn new(
        manager: Weak<ComponentManager>,
        name: String,
        component_id: u64,
        properties: Properties,
        key: u64,
        consumer: Option<ConsumerId>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                name,
                component_id,
                properties: RwLock::new(properties),
                key,
                consumer,
                manager,
            }),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[inline]
    pub fn component_id(&self) -> u64 {
        self.inner.component_id
    }

    /// Current component properties, including applied configuration.
    pub fn properties(&self) -> Properties {
        self.inner.properties.read().clone()
    }

    pub(crate) fn set_properties(&self, properties: Properties) {
        *self.inner.properties.write() = properties;
    }

    /// Consumer this instance was created for, for bundle and prototype scoped components.
    #[inline]
    pub fn using_consumer(&self) -> Option<ConsumerId> {
        self.inner.consumer
    }

    /// Best service bound to the reference `name`.
    pub async fn locate_service(&self, name: &str) -> Option<ServiceObject> {
        let manager = self.inner.manager.upgrade()?;
        manager.locate_service(name, self.inner.key).await
    }

    /// All services bound to the reference `name`, best first.
    pub async fn locate_services(&self, name: &str) -> Vec<ServiceObject> {
        match self.inner.manager.upgrade() {
            Some(manager) => manager.locate_services(name, self.inner.key).await,
            None => Vec::new(),
        }
    }

    /// Reference of the service this component provides, while registered.
    pub fn service_reference(&self) -> Option<ServiceReference> {
        self.inner.manager.upgrade()?.service_reference()
    }
}

impl fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentContext")
            .field("name", &self.inner.name)
            .field("component_id", &self.inner.component_id)
            .field("instance", &self.inner.key)
            .finish()
    }
}
