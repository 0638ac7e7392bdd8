//! Service objects, scopes and factories.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::registry::reference::ServiceReference;

/// Type-erased service object shared between provider and consumers.
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

/// Downcasts a service object to its concrete type.
pub fn downcast<T: Any + Send + Sync>(object: &ServiceObject) -> Option<Arc<T>> {
    object.clone().downcast::<T>().ok()
}

/// Identifies who obtained a service, for use counting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// How service objects are shared between consumers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ServiceScope {
    /// One object for everybody.
    #[default]
    Singleton,
    /// One object per consumer.
    Bundle,
    /// A fresh object per request through [`ServiceObjects`](crate::registry::ServiceObjects).
    Prototype,
}

impl ServiceScope {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceScope::Singleton => "singleton",
            ServiceScope::Bundle => "bundle",
            ServiceScope::Prototype => "prototype",
        }
    }
}

/// Produces service objects on demand.
///
/// The registry calls `get_service` at most once per consumer for bundle-scoped
/// factories and once per request for prototype-scoped ones; every object handed
/// out is eventually returned through `unget_service`.
#[async_trait]
pub trait ServiceFactory: Send + Sync + 'static {
    async fn get_service(
        &self,
        consumer: ConsumerId,
        reference: &ServiceReference,
    ) -> Option<ServiceObject>;

    async fn unget_service(
        &self,
        consumer: ConsumerId,
        reference: &ServiceReference,
        service: ServiceObject,
    );

    /// Scope the factory is registered with.
    fn scope(&self) -> ServiceScope {
        ServiceScope::Bundle
    }
}

/// What backs a registration.
#[derive(Clone)]
pub enum ServiceSource {
    Object(ServiceObject),
    Factory(Arc<dyn ServiceFactory>),
}

impl ServiceSource {
    /// Wraps a concrete value as a singleton service.
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        ServiceSource::Object(Arc::new(value))
    }

    pub(crate) fn scope(&self) -> ServiceScope {
        match self {
            ServiceSource::Object(_) => ServiceScope::Singleton,
            ServiceSource::Factory(f) => f.scope(),
        }
    }
}

impl fmt::Debug for ServiceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceSource::Object(_) => f.write_str("ServiceSource::Object"),
            ServiceSource::Factory(_) => f.write_str("ServiceSource::Factory"),
        }
    }
}
