//! Pairing of a tracked reference with the service object(s) obtained for it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::registry::{ConsumerId, ServiceObject, ServiceObjects, ServiceReference, ServiceRegistry};

/// How service objects are obtained for a reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefPairKind {
    /// One use-counted object from the registry.
    Single,
    /// One object from the service's `ServiceObjects`, shared by the single instance.
    SinglePrototype,
    /// One object from `ServiceObjects` per component instance.
    MultiplePrototype,
}

enum Objects {
    Single(Mutex<Option<ServiceObject>>),
    SinglePrototype(Mutex<Option<(ServiceObjects, ServiceObject)>>),
    MultiplePrototype(Mutex<HashMap<u64, (ServiceObjects, ServiceObject)>>),
}

pub struct RefPair {
    reference: ServiceReference,
    objects: Objects,
    failed: AtomicBool,
    deleted: AtomicBool,
}

impl RefPair {
    pub fn new(reference: ServiceReference, kind: RefPairKind) -> Self {
        let objects = match kind {
            RefPairKind::Single => Objects::Single(Mutex::new(None)),
            RefPairKind::SinglePrototype => Objects::SinglePrototype(Mutex::new(None)),
            RefPairKind::MultiplePrototype => Objects::MultiplePrototype(Mutex::new(HashMap::new())),
        };
        Self {
            reference,
            objects,
            failed: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    /// Object held for the instance identified by `key`.
    pub fn service_object(&self, key: u64) -> Option<ServiceObject> {
        match &self.objects {
            Objects::Single(cell) => cell.lock().clone(),
            Objects::SinglePrototype(cell) => cell.lock().as_ref().map(|(_, o)| o.clone()),
            Objects::MultiplePrototype(map) => map.lock().get(&key).map(|(_, o)| o.clone()),
        }
    }

    /// Obtains the object for `key` unless already held.
    ///
    /// Concurrent callers race on the cell; the loser returns its object. On
    /// failure the pair is marked failed and `false` returned.
    pub async fn get_service_object(
        &self,
        key: u64,
        registry: &Arc<ServiceRegistry>,
        consumer: ConsumerId,
    ) -> bool {
        if self.service_object(key).is_some() {
            return true;
        }
        let obtained = match &self.objects {
            Objects::Single(cell) => match registry.get_service(consumer, &self.reference).await {
                None => false,
                Some(object) => {
                    let won = {
                        let mut cell = cell.lock();
                        if cell.is_none() {
                            *cell = Some(object);
                            true
                        } else {
                            false
                        }
                    };
                    if !won {
                        registry.unget_service(consumer, &self.reference).await;
                    }
                    true
                }
            },
            Objects::SinglePrototype(_) | Objects::MultiplePrototype(_) => {
                self.get_prototype_object(key, registry, consumer).await
            }
        };
        if !obtained {
            self.set_failed();
            tracing::warn!(
                service_id = self.reference.id(),
                "could not get service object"
            );
            return false;
        }
        self.failed.store(false, Ordering::SeqCst);
        true
    }

    async fn get_prototype_object(
        &self,
        key: u64,
        registry: &Arc<ServiceRegistry>,
        consumer: ConsumerId,
    ) -> bool {
        let Some(objects) = registry.service_objects(consumer, &self.reference) else {
            return false;
        };
        let Some(object) = objects.get_service().await else {
            return false;
        };
        let loser = match &self.objects {
            Objects::SinglePrototype(cell) => {
                let mut cell = cell.lock();
                match cell.as_ref() {
                    Some(_) => Some(object),
                    None => {
                        *cell = Some((objects.clone(), object));
                        None
                    }
                }
            }
            Objects::MultiplePrototype(map) => {
                let mut map = map.lock();
                match map.get(&key) {
                    Some(_) => Some(object),
                    None => {
                        map.insert(key, (objects.clone(), object));
                        None
                    }
                }
            }
            Objects::Single(_) => Some(object),
        };
        if let Some(object) = loser {
            objects.unget_service(object).await;
        }
        true
    }

    /// Releases held objects: the one for `key`, or all of them with `None`.
    pub async fn unget(&self, key: Option<u64>, registry: &ServiceRegistry, consumer: ConsumerId) {
        match &self.objects {
            Objects::Single(cell) => {
                let taken = cell.lock().take();
                if taken.is_some() {
                    registry.unget_service(consumer, &self.reference).await;
                }
            }
            Objects::SinglePrototype(cell) => {
                let taken = cell.lock().take();
                if let Some((objects, object)) = taken {
                    objects.unget_service(object).await;
                }
            }
            Objects::MultiplePrototype(map) => {
                let taken: Vec<(ServiceObjects, ServiceObject)> = {
                    let mut map = map.lock();
                    match key {
                        Some(k) => map.remove(&k).into_iter().collect(),
                        None => map.drain().map(|(_, v)| v).collect(),
                    }
                };
                for (objects, object) in taken {
                    objects.unget_service(object).await;
                }
            }
        }
    }

    /// `true` for the per-instance kind, whose objects are released per instance.
    pub fn is_per_instance(&self) -> bool {
        matches!(self.objects, Objects::MultiplePrototype(_))
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn set_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for RefPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefPair")
            .field("service_id", &self.reference.id())
            .field("failed", &self.is_failed())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Properties, ServiceFactory, ServiceScope, ServiceSource};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    const CONSUMER: ConsumerId = ConsumerId(9);

    #[derive(Default)]
    struct Prototypes {
        live: AtomicUsize,
    }

    #[async_trait]
    impl ServiceFactory for Prototypes {
        async fn get_service(&self, _: ConsumerId, _: &ServiceReference) -> Option<ServiceObject> {
            self.live.fetch_add(1, Ordering::SeqCst);
            Some(Arc::new(()))
        }

        async fn unget_service(&self, _: ConsumerId, _: &ServiceReference, _: ServiceObject) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }

        fn scope(&self) -> ServiceScope {
            ServiceScope::Prototype
        }
    }

    #[tokio::test]
    async fn single_obtains_once_and_ungets_once() {
        let registry = ServiceRegistry::new();
        let reg = registry
            .register(&["S"], ServiceSource::object(5u32), Properties::new())
            .unwrap();
        let pair = RefPair::new(reg.reference().clone(), RefPairKind::Single);

        assert!(pair.get_service_object(0, &registry, CONSUMER).await);
        assert!(pair.get_service_object(0, &registry, CONSUMER).await);
        assert_eq!(registry.usage_count(CONSUMER, reg.reference()), 1);

        pair.unget(None, &registry, CONSUMER).await;
        pair.unget(None, &registry, CONSUMER).await;
        assert_eq!(registry.usage_count(CONSUMER, reg.reference()), 0);
        assert!(pair.service_object(0).is_none());
    }

    #[tokio::test]
    async fn concurrent_obtain_keeps_one_object() {
        let registry = ServiceRegistry::new();
        let factory = Arc::new(Prototypes::default());
        let reg = registry
            .register(&["S"], ServiceSource::Factory(factory.clone()), Properties::new())
            .unwrap();
        let pair = Arc::new(RefPair::new(reg.reference().clone(), RefPairKind::SinglePrototype));

        let (a, b) = tokio::join!(
            pair.get_service_object(0, &registry, CONSUMER),
            pair.get_service_object(0, &registry, CONSUMER)
        );
        assert!(a && b);
        assert_eq!(factory.live.load(Ordering::SeqCst), 1);

        pair.unget(None, &registry, CONSUMER).await;
        assert_eq!(factory.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn per_instance_objects_are_released_per_key() {
        let registry = ServiceRegistry::new();
        let factory = Arc::new(Prototypes::default());
        let reg = registry
            .register(&["S"], ServiceSource::Factory(factory.clone()), Properties::new())
            .unwrap();
        let pair = RefPair::new(reg.reference().clone(), RefPairKind::MultiplePrototype);

        assert!(pair.get_service_object(1, &registry, CONSUMER).await);
        assert!(pair.get_service_object(2, &registry, CONSUMER).await);
        assert_eq!(factory.live.load(Ordering::SeqCst), 2);

        pair.unget(Some(1), &registry, CONSUMER).await;
        assert!(pair.service_object(1).is_none());
        assert!(pair.service_object(2).is_some());
        pair.unget(None, &registry, CONSUMER).await;
        assert_eq!(factory.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn vanished_service_marks_failed() {
        let registry = ServiceRegistry::new();
        let reg = registry
            .register(&["S"], ServiceSource::object(()), Properties::new())
            .unwrap();
        reg.unregister().await.unwrap();
        let pair = RefPair::new(reg.reference().clone(), RefPairKind::Single);
        assert!(!pair.get_service_object(0, &registry, CONSUMER).await);
        assert!(pair.is_failed());
    }
}
