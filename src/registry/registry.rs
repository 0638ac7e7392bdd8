//! # In-process service registry.
//!
//! [`ServiceRegistry`] keeps registered services, their reference properties and
//! per-consumer use counts, and notifies listeners through unbounded channels.
//!
//! ```text
//! register() ──► ServiceEntry ──► dispatch(Registered) ──► listener mpsc ──► tracker consumer
//! set_properties() ─────────────► dispatch(Modified | ModifiedEndMatch)
//! unregister() ─────────────────► dispatch(Unregistering) ──► factory.unget for outstanding uses
//! ```
//!
//! Events are sent while the registry lock is held, so every listener observes
//! registry changes in one global order, and [`ServiceRegistry::add_listener`]
//! returns the initial snapshot atomically with the subscription: no change can
//! fall between the snapshot and the first queued event.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::RegistryError;
use crate::registry::event::{ServiceEvent, ServiceEventKind};
use crate::registry::filter::Filter;
use crate::registry::properties::{Properties, OBJECT_CLASS, SERVICE_ID, SERVICE_SCOPE};
use crate::registry::reference::{sort_best_first, ServiceReference};
use crate::registry::service::{ConsumerId, ServiceFactory, ServiceObject, ServiceScope, ServiceSource};

/// Identifies a registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Usage {
    count: usize,
    object: Option<ServiceObject>,
}

struct ServiceEntry {
    reference: ServiceReference,
    source: ServiceSource,
    uses: HashMap<ConsumerId, Usage>,
    prototypes: HashMap<ConsumerId, usize>,
}

struct Listener {
    id: ListenerId,
    filter: Option<Filter>,
    tx: mpsc::UnboundedSender<ServiceEvent>,
}

#[derive(Default)]
struct RegistryState {
    services: BTreeMap<u64, ServiceEntry>,
    listeners: Vec<Listener>,
}

impl RegistryState {
    /// Sends `kind` to every listener whose filter accepts `props`.
    ///
    /// With `previous` set (property modification), listeners that matched the old
    /// properties but not the new ones receive `ModifiedEndMatch` instead.
    fn dispatch(
        &mut self,
        kind: ServiceEventKind,
        reference: &ServiceReference,
        props: &Properties,
        previous: Option<&Properties>,
    ) {
        self.listeners.retain(|l| {
            let matches = l.filter.as_ref().map_or(true, |f| f.matches(props));
            let kind = match (matches, previous) {
                (true, _) => kind,
                (false, Some(old)) if l.filter.as_ref().is_some_and(|f| f.matches(old)) => {
                    ServiceEventKind::ModifiedEndMatch
                }
                _ => return true,
            };
            l.tx.send(ServiceEvent {
                kind,
                reference: reference.clone(),
            })
            .is_ok()
        });
    }
}

/// Registry of services shared by a runtime and anything else in-process.
pub struct ServiceRegistry {
    state: Mutex<RegistryState>,
    next_service_id: AtomicU64,
    next_listener_id: AtomicU64,
}

impl ServiceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RegistryState::default()),
            next_service_id: AtomicU64::new(1),
            next_listener_id: AtomicU64::new(1),
        })
    }

    /// Registers a service under `interfaces`.
    ///
    /// `objectClass`, `service.id` and `service.scope` are set by the registry and
    /// override caller-supplied values.
    pub fn register(
        self: &Arc<Self>,
        interfaces: &[&str],
        source: ServiceSource,
        properties: Properties,
    ) -> Result<ServiceRegistration, RegistryError> {
        if interfaces.is_empty() {
            return Err(RegistryError::NoInterfaces);
        }
        let id = self.next_service_id.fetch_add(1, Ordering::Relaxed);
        let scope = source.scope();

        let mut props = properties;
        props.insert(OBJECT_CLASS, interfaces.to_vec());
        props.insert(SERVICE_ID, id);
        props.insert(SERVICE_SCOPE, scope.as_str());
        let reference = ServiceReference::new(id, scope, props.clone());

        {
            let mut state = self.state.lock();
            state.services.insert(
                id,
                ServiceEntry {
                    reference: reference.clone(),
                    source,
                    uses: HashMap::new(),
                    prototypes: HashMap::new(),
                },
            );
            state.dispatch(ServiceEventKind::Registered, &reference, &props, None);
        }
        tracing::debug!(service_id = id, ?interfaces, "service registered");

        Ok(ServiceRegistration {
            registry: Arc::downgrade(self),
            reference,
        })
    }

    /// Subscribes to changes of services accepted by `filter`.
    ///
    /// Returns the listener id, the event receiver and the services that match
    /// right now (best-first).
    pub fn add_listener(
        &self,
        filter: Option<Filter>,
    ) -> (ListenerId, mpsc::UnboundedReceiver<ServiceEvent>, Vec<ServiceReference>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));

        let mut state = self.state.lock();
        let mut initial: Vec<ServiceReference> = state
            .services
            .values()
            .filter(|e| filter.as_ref().map_or(true, |f| f.matches(&e.reference.properties())))
            .map(|e| e.reference.clone())
            .collect();
        state.listeners.push(Listener { id, filter, tx });
        drop(state);

        sort_best_first(&mut initial);
        (id, rx, initial)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.state.lock().listeners.retain(|l| l.id != id);
    }

    /// Currently registered services accepted by `filter`, best-first.
    pub fn get_service_references(&self, filter: Option<&Filter>) -> Vec<ServiceReference> {
        let mut refs: Vec<ServiceReference> = self
            .state
            .lock()
            .services
            .values()
            .filter(|e| filter.map_or(true, |f| f.matches(&e.reference.properties())))
            .map(|e| e.reference.clone())
            .collect();
        sort_best_first(&mut refs);
        refs
    }

    /// Returns `true` while the service is registered.
    pub fn is_registered(&self, reference: &ServiceReference) -> bool {
        self.state.lock().services.contains_key(&reference.id())
    }

    /// Obtains the service object for `consumer`, incrementing its use count.
    ///
    /// Returns `None` when the service is gone or its factory produced nothing.
    pub async fn get_service(
        &self,
        consumer: ConsumerId,
        reference: &ServiceReference,
    ) -> Option<ServiceObject> {
        let id = reference.id();
        let factory: Arc<dyn ServiceFactory> = {
            let mut state = self.state.lock();
            let entry = state.services.get_mut(&id)?;
            match &entry.source {
                ServiceSource::Object(obj) => {
                    let obj = obj.clone();
                    entry.uses.entry(consumer).or_default().count += 1;
                    return Some(obj);
                }
                ServiceSource::Factory(f) => {
                    if let Some(usage) = entry.uses.get_mut(&consumer) {
                        if let Some(obj) = &usage.object {
                            usage.count += 1;
                            return Some(obj.clone());
                        }
                    }
                    f.clone()
                }
            }
        };

        let Some(object) = factory.get_service(consumer, reference).await else {
            tracing::warn!(service_id = id, %consumer, "service factory returned no object");
            return None;
        };

        let (result, surplus) = {
            let mut state = self.state.lock();
            match state.services.get_mut(&id) {
                None => (None, Some(object)),
                Some(entry) => {
                    let usage = entry.uses.entry(consumer).or_default();
                    usage.count += 1;
                    match &usage.object {
                        Some(existing) => (Some(existing.clone()), Some(object)),
                        None => {
                            usage.object = Some(object.clone());
                            (Some(object), None)
                        }
                    }
                }
            }
        };
        if let Some(surplus) = surplus {
            factory.unget_service(consumer, reference, surplus).await;
        }
        result
    }

    /// Releases one use of the service by `consumer`.
    ///
    /// Returns `false` when the consumer held no use of a registered service.
    pub async fn unget_service(&self, consumer: ConsumerId, reference: &ServiceReference) -> bool {
        let released = {
            let mut state = self.state.lock();
            let Some(entry) = state.services.get_mut(&reference.id()) else {
                return false;
            };
            let Some(usage) = entry.uses.get_mut(&consumer) else {
                return false;
            };
            usage.count = usage.count.saturating_sub(1);
            if usage.count > 0 {
                return true;
            }
            let object = entry.uses.remove(&consumer).and_then(|u| u.object);
            match (&entry.source, object) {
                (ServiceSource::Factory(f), Some(obj)) => Some((f.clone(), obj)),
                _ => None,
            }
        };
        if let Some((factory, object)) = released {
            factory.unget_service(consumer, reference, object).await;
        }
        true
    }

    /// Per-request access to a service, honoring prototype scope.
    pub fn service_objects(
        self: &Arc<Self>,
        consumer: ConsumerId,
        reference: &ServiceReference,
    ) -> Option<ServiceObjects> {
        let state = self.state.lock();
        let entry = state.services.get(&reference.id())?;
        Some(ServiceObjects {
            registry: self.clone(),
            consumer,
            reference: reference.clone(),
            source: entry.source.clone(),
        })
    }

    /// Outstanding objects `consumer` holds for the service.
    pub fn usage_count(&self, consumer: ConsumerId, reference: &ServiceReference) -> usize {
        let state = self.state.lock();
        state.services.get(&reference.id()).map_or(0, |e| {
            e.uses.get(&consumer).map_or(0, |u| u.count)
                + e.prototypes.get(&consumer).copied().unwrap_or(0)
        })
    }

    fn modify(&self, reference: &ServiceReference, properties: Properties) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        if !state.services.contains_key(&reference.id()) {
            return Err(RegistryError::AlreadyUnregistered {
                service_id: reference.id(),
            });
        }
        let old = reference.properties();
        let mut props = properties;
        for key in [OBJECT_CLASS, SERVICE_ID, SERVICE_SCOPE] {
            if let Some(v) = old.get(key) {
                props.insert(key, v.clone());
            }
        }
        reference.set_properties(props.clone());
        state.dispatch(ServiceEventKind::Modified, reference, &props, Some(&old));
        Ok(())
    }

    async fn unregister(&self, reference: &ServiceReference) -> Result<(), RegistryError> {
        let (source, outstanding) = {
            let mut state = self.state.lock();
            let Some(entry) = state.services.remove(&reference.id()) else {
                return Err(RegistryError::AlreadyUnregistered {
                    service_id: reference.id(),
                });
            };
            let props = entry.reference.properties();
            state.dispatch(ServiceEventKind::Unregistering, reference, &props, None);
            let outstanding: Vec<(ConsumerId, ServiceObject)> = entry
                .uses
                .into_iter()
                .filter_map(|(c, u)| u.object.map(|o| (c, o)))
                .collect();
            (entry.source, outstanding)
        };
        tracing::debug!(service_id = reference.id(), "service unregistered");

        if let ServiceSource::Factory(factory) = source {
            for (consumer, object) in outstanding {
                factory.unget_service(consumer, reference, object).await;
            }
        }
        Ok(())
    }

    fn prototype_delta(&self, consumer: ConsumerId, reference: &ServiceReference, delta: isize) {
        let mut state = self.state.lock();
        if let Some(entry) = state.services.get_mut(&reference.id()) {
            let n = entry.prototypes.entry(consumer).or_insert(0);
            *n = n.saturating_add_signed(delta);
        }
    }
}

/// Handle returned by [`ServiceRegistry::register`].
#[derive(Clone)]
pub struct ServiceRegistration {
    registry: Weak<ServiceRegistry>,
    reference: ServiceReference,
}

impl ServiceRegistration {
    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    /// Replaces the service properties (registry-owned keys are preserved).
    pub fn set_properties(&self, properties: Properties) -> Result<(), RegistryError> {
        match self.registry.upgrade() {
            Some(registry) => registry.modify(&self.reference, properties),
            None => Err(RegistryError::AlreadyUnregistered {
                service_id: self.reference.id(),
            }),
        }
    }

    pub async fn unregister(&self) -> Result<(), RegistryError> {
        match self.registry.upgrade() {
            Some(registry) => registry.unregister(&self.reference).await,
            None => Err(RegistryError::AlreadyUnregistered {
                service_id: self.reference.id(),
            }),
        }
    }
}

impl std::fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("service_id", &self.reference.id())
            .finish()
    }
}

/// Obtains objects for one service on behalf of one consumer.
///
/// Prototype-scoped factories produce a fresh object per `get_service`; every
/// other source falls back to the use-counted registry path.
#[derive(Clone)]
pub struct ServiceObjects {
    registry: Arc<ServiceRegistry>,
    consumer: ConsumerId,
    reference: ServiceReference,
    source: ServiceSource,
}

impl ServiceObjects {
    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    pub async fn get_service(&self) -> Option<ServiceObject> {
        match &self.source {
            ServiceSource::Factory(f) if f.scope() == ServiceScope::Prototype => {
                if !self.registry.is_registered(&self.reference) {
                    return None;
                }
                let object = f.get_service(self.consumer, &self.reference).await?;
                self.registry.prototype_delta(self.consumer, &self.reference, 1);
                Some(object)
            }
            _ => self.registry.get_service(self.consumer, &self.reference).await,
        }
    }

    pub async fn unget_service(&self, object: ServiceObject) {
        match &self.source {
            ServiceSource::Factory(f) if f.scope() == ServiceScope::Prototype => {
                f.unget_service(self.consumer, &self.reference, object).await;
                self.registry.prototype_delta(self.consumer, &self.reference, -1);
            }
            _ => {
                self.registry.unget_service(self.consumer, &self.reference).await;
            }
        }
    }
}

/// Filter clause selecting services registered under `interface`.
pub fn object_class_filter(interface: &str) -> String {
    format!("({OBJECT_CLASS}={interface})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::properties::SERVICE_RANKING;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    const CONSUMER: ConsumerId = ConsumerId(1);

    #[derive(Default)]
    struct CountingFactory {
        gets: AtomicUsize,
        ungets: AtomicUsize,
        scope: ServiceScope,
    }

    #[async_trait]
    impl ServiceFactory for CountingFactory {
        async fn get_service(&self, _: ConsumerId, _: &ServiceReference) -> Option<ServiceObject> {
            let n = self.gets.fetch_add(1, Ordering::SeqCst);
            Some(Arc::new(n))
        }

        async fn unget_service(&self, _: ConsumerId, _: &ServiceReference, _: ServiceObject) {
            self.ungets.fetch_add(1, Ordering::SeqCst);
        }

        fn scope(&self) -> ServiceScope {
            self.scope
        }
    }

    #[tokio::test]
    async fn listener_sees_registered_modified_and_endmatch() {
        let registry = ServiceRegistry::new();
        let filter = Filter::parse("(&(objectClass=Greeter)(lang=en))").unwrap();
        let (_, mut rx, initial) = registry.add_listener(Some(filter));
        assert!(initial.is_empty());

        let reg = registry
            .register(&["Greeter"], ServiceSource::object(1u8), Properties::new().with("lang", "en"))
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, ServiceEventKind::Registered);

        reg.set_properties(Properties::new().with("lang", "en").with(SERVICE_RANKING, 3))
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, ServiceEventKind::Modified);
        assert_eq!(reg.reference().ranking(), 3);

        reg.set_properties(Properties::new().with("lang", "de")).unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, ServiceEventKind::ModifiedEndMatch);
        assert_eq!(reg.reference().interfaces(), vec!["Greeter".to_string()]);

        reg.unregister().await.unwrap();
        assert!(rx.try_recv().is_err(), "non-matching unregister must not be delivered");
        assert!(matches!(
            reg.unregister().await,
            Err(RegistryError::AlreadyUnregistered { .. })
        ));
    }

    #[tokio::test]
    async fn snapshot_is_best_first() {
        let registry = ServiceRegistry::new();
        for rank in [0, 10, 5] {
            registry
                .register(&["S"], ServiceSource::object(()), Properties::new().with(SERVICE_RANKING, rank))
                .unwrap();
        }
        let (_, _rx, initial) = registry.add_listener(Some(Filter::parse("(objectClass=S)").unwrap()));
        let ranks: Vec<i64> = initial.iter().map(ServiceReference::ranking).collect();
        assert_eq!(ranks, vec![10, 5, 0]);
    }

    #[tokio::test]
    async fn bundle_factory_is_called_once_per_consumer() {
        let registry = ServiceRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let reg = registry
            .register(&["S"], ServiceSource::Factory(factory.clone()), Properties::new())
            .unwrap();
        let r = reg.reference().clone();

        assert!(registry.get_service(CONSUMER, &r).await.is_some());
        assert!(registry.get_service(CONSUMER, &r).await.is_some());
        assert_eq!(factory.gets.load(Ordering::SeqCst), 1);
        assert_eq!(registry.usage_count(CONSUMER, &r), 2);

        assert!(registry.unget_service(CONSUMER, &r).await);
        assert_eq!(factory.ungets.load(Ordering::SeqCst), 0);
        assert!(registry.unget_service(CONSUMER, &r).await);
        assert_eq!(factory.ungets.load(Ordering::SeqCst), 1);
        assert!(!registry.unget_service(CONSUMER, &r).await);
    }

    #[tokio::test]
    async fn unregister_releases_outstanding_factory_objects() {
        let registry = ServiceRegistry::new();
        let factory = Arc::new(CountingFactory::default());
        let reg = registry
            .register(&["S"], ServiceSource::Factory(factory.clone()), Properties::new())
            .unwrap();
        registry.get_service(CONSUMER, reg.reference()).await.unwrap();
        reg.unregister().await.unwrap();
        assert_eq!(factory.ungets.load(Ordering::SeqCst), 1);
        assert!(registry.get_service(CONSUMER, reg.reference()).await.is_none());
    }

    #[tokio::test]
    async fn prototype_objects_are_fresh_per_request() {
        let registry = ServiceRegistry::new();
        let factory = Arc::new(CountingFactory {
            scope: ServiceScope::Prototype,
            ..Default::default()
        });
        let reg = registry
            .register(&["S"], ServiceSource::Factory(factory.clone()), Properties::new())
            .unwrap();
        assert_eq!(reg.reference().scope(), ServiceScope::Prototype);

        let objects = registry.service_objects(CONSUMER, reg.reference()).unwrap();
        let a = objects.get_service().await.unwrap();
        let b = objects.get_service().await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.usage_count(CONSUMER, reg.reference()), 2);

        objects.unget_service(a).await;
        objects.unget_service(b).await;
        assert_eq!(factory.ungets.load(Ordering::SeqCst), 2);
        assert_eq!(registry.usage_count(CONSUMER, reg.reference()), 0);
    }

    #[test]
    fn register_requires_an_interface() {
        let registry = ServiceRegistry::new();
        assert_eq!(
            registry
                .register(&[], ServiceSource::object(()), Properties::new())
                .unwrap_err(),
            RegistryError::NoInterfaces
        );
    }
}
