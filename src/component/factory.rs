//! Service object published by a satisfied component factory.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::component::manager::ComponentManager;
use crate::error::RuntimeError;
use crate::registry::Properties;

/// Interface a component factory registers its [`ComponentFactoryHandle`] under.
pub const COMPONENT_FACTORY_SERVICE: &str = "ComponentFactory";

/// Creates instances of a component factory.
///
/// Obtained from the registry under [`COMPONENT_FACTORY_SERVICE`], filtered by
/// `component.factory`.
#[derive(Clone)]
pub struct ComponentFactoryHandle {
    manager: Weak<ComponentManager>,
}

impl ComponentFactoryHandle {
    pub(crate) fn new(manager: Weak<ComponentManager>) -> Self {
        Self { manager }
    }

    /// Factory identifier from the component metadata.
    pub fn factory_id(&self) -> Option<String> {
        self.manager.upgrade()?.metadata().factory.clone()
    }

    /// Creates, enables and activates a new component instance configured with
    /// `properties`.
    ///
    /// Dispose the returned manager to release the instance.
    pub async fn new_instance(&self, properties: Properties) -> Result<Arc<ComponentManager>, RuntimeError> {
        let manager = self.manager.upgrade().ok_or(RuntimeError::Inactive)?;
        manager.new_instance(properties).await
    }
}

impl fmt::Debug for ComponentFactoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentFactoryHandle")
            .field("factory", &self.factory_id())
            .finish()
    }
}
