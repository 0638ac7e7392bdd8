//! # Runtime: owner of the managed components.
//!
//! The [`Runtime`] plays the role of a component activator: it validates and
//! adds component descriptions, hands out component ids, keeps the table of
//! missing dependencies for late binding and shuts everything down in order.
//!
//! ```text
//!   add_component(meta) ──► ComponentManager ──► enable(false)
//!                                   │
//!                                   ├── publish(Event) ──► Bus ──► listener ──► SubscriberSet
//!                                   └── schedule(job)  ──► Scheduler
//!
//!   shutdown():
//!     active = false
//!       └─► dispose components (reverse order, BundleStopped)
//!             └─► Scheduler::drain()
//!                   └─► listener drains the bus ──► SubscriberSet::shutdown()
//! ```
//!
//! ## Example
//! ```no_run
//! use dsvisor::{ComponentInstance, ComponentMetadata, Component, Implementations, RuntimeBuilder, RuntimeConfig};
//! use std::sync::Arc;
//!
//! struct Greeter;
//! impl Component for Greeter {}
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dsvisor::RuntimeError> {
//!     let loader = Implementations::new().with("demo.Greeter", |_| Ok(ComponentInstance::new(Greeter)));
//!     let runtime = RuntimeBuilder::new(RuntimeConfig::default())
//!         .with_loader(Arc::new(loader))
//!         .build();
//!
//!     let greeter = runtime
//!         .add_component(ComponentMetadata::new("greeter", "demo.Greeter").provides("Greeter"))
//!         .await?;
//!     assert!(greeter.state().is_satisfied());
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::component::{ComponentKind, ComponentManager, ComponentMetadata, DeactivationReason, ImplementationLoader};
use crate::core::{RuntimeConfig, Scheduler};
use crate::dependency::DependencyManager;
use crate::error::RuntimeError;
use crate::events::{Bus, Event};
use crate::registry::{
    ConsumerId, Filter, ListenerId, PermissionChecker, ServiceEventKind, ServiceReference, ServiceRegistry,
    COMPONENT_ID, COMPONENT_NAME,
};
use crate::subscribers::SubscriberSet;

/// Consumer ids are unique across runtimes sharing one registry.
static NEXT_CONSUMER: AtomicU64 = AtomicU64::new(1);

/// A dependency waiting for a service object it could not obtain.
struct Missing {
    dm: Weak<DependencyManager>,
    tracking_count: u64,
}

/// Declarative component runtime.
///
/// Built by [`RuntimeBuilder`](crate::RuntimeBuilder); always handled as `Arc<Runtime>`.
pub struct Runtime {
    me: Weak<Runtime>,
    config: RuntimeConfig,
    registry: Arc<ServiceRegistry>,
    bus: Bus,
    subscribers: Arc<SubscriberSet>,
    scheduler: Arc<dyn Scheduler>,
    permissions: Arc<dyn PermissionChecker>,
    loader: Arc<dyn ImplementationLoader>,
    consumer: ConsumerId,

    active: AtomicBool,
    next_component_id: AtomicU64,
    components: Mutex<Vec<Arc<ComponentManager>>>,
    missing: Mutex<HashMap<u64, Vec<Missing>>>,
    /// Registry listener that drops missing entries of unregistered services.
    missing_listener: Mutex<Option<(ListenerId, JoinHandle<()>)>>,

    listener_token: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct RuntimeParts {
    pub(crate) config: RuntimeConfig,
    pub(crate) registry: Arc<ServiceRegistry>,
    pub(crate) bus: Bus,
    pub(crate) subscribers: Arc<SubscriberSet>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) permissions: Arc<dyn PermissionChecker>,
    pub(crate) loader: Arc<dyn ImplementationLoader>,
}

impl Runtime {
    pub(crate) fn new_internal(parts: RuntimeParts) -> Arc<Self> {
        let runtime = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config: parts.config,
            registry: parts.registry,
            bus: parts.bus,
            subscribers: parts.subscribers,
            scheduler: parts.scheduler,
            permissions: parts.permissions,
            loader: parts.loader,
            consumer: ConsumerId(NEXT_CONSUMER.fetch_add(1, Ordering::Relaxed)),
            active: AtomicBool::new(true),
            next_component_id: AtomicU64::new(0),
            components: Mutex::new(Vec::new()),
            missing: Mutex::new(HashMap::new()),
            missing_listener: Mutex::new(None),
            listener_token: CancellationToken::new(),
            listener: Mutex::new(None),
        });
        runtime.subscriber_listener();
        runtime.missing_listener();
        runtime
    }

    /// Subscribes to the bus and forwards events to the subscriber set.
    ///
    /// On shutdown the listener forwards what is still buffered, then exits.
    fn subscriber_listener(&self) {
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subscribers);
        let token = self.listener_token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "event listener lagged behind the bus");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = token.cancelled() => {
                        while let Ok(ev) = rx.try_recv() {
                            set.emit(&ev);
                        }
                        break;
                    }
                }
            }
        });
        *self.listener.lock() = Some(handle);
    }

    // ---------------------------------------------------------------------
    // Components
    // ---------------------------------------------------------------------

    /// Validates `metadata`, creates its manager and enables it when the
    /// metadata says so.
    pub async fn add_component(&self, metadata: ComponentMetadata) -> Result<Arc<ComponentManager>, RuntimeError> {
        if !self.is_active() {
            return Err(RuntimeError::Inactive);
        }
        metadata.validate()?;
        let me = self.me.upgrade().ok_or(RuntimeError::Inactive)?;

        let kind = if metadata.is_factory() {
            ComponentKind::Factory
        } else if metadata.is_immediate() {
            ComponentKind::Immediate
        } else {
            ComponentKind::Delayed
        };
        let enabled = metadata.enabled;
        let manager = ComponentManager::new(&me, metadata, kind, None, None);
        {
            let mut components = self.components.lock();
            if components.iter().any(|c| c.name() == manager.name()) {
                return Err(RuntimeError::DuplicateComponent {
                    name: manager.name().to_string(),
                });
            }
            components.push(manager.clone());
        }
        tracing::debug!(component = %manager.name(), ?kind, "component added");

        if enabled {
            manager.enable(false).await?;
        }
        Ok(manager)
    }

    pub fn component(&self, name: &str) -> Option<Arc<ComponentManager>> {
        self.components.lock().iter().find(|c| c.name() == name).cloned()
    }

    /// Managed components in the order they were added.
    pub fn components(&self) -> Vec<Arc<ComponentManager>> {
        self.components.lock().clone()
    }

    /// Disposes the named component and forgets it.
    pub async fn remove_component(&self, name: &str) -> Result<(), RuntimeError> {
        let Some(manager) = self.component(name) else {
            return Ok(());
        };
        manager.dispose(DeactivationReason::Disposed).await?;
        self.components.lock().retain(|c| !Arc::ptr_eq(c, &manager));
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[inline]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    #[inline]
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Receiver of every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// `false` once [`shutdown`](Self::shutdown) started.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Consumer identity used for every service the runtime's components get.
    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    pub(crate) fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.scheduler.clone()
    }

    pub(crate) fn permissions(&self) -> Arc<dyn PermissionChecker> {
        self.permissions.clone()
    }

    pub(crate) fn loader(&self) -> Arc<dyn ImplementationLoader> {
        self.loader.clone()
    }

    pub(crate) fn allocate_component_id(&self) -> u64 {
        self.next_component_id.fetch_add(1, Ordering::Relaxed)
    }

    // ---------------------------------------------------------------------
    // Missing dependencies
    // ---------------------------------------------------------------------

    /// Remembers that `dm` could not obtain the service of `reference`.
    ///
    /// Only services provided by managed components are recorded; those become
    /// obtainable once the providing component finishes creating its instance.
    pub(crate) fn register_missing(&self, dm: Arc<DependencyManager>, reference: &ServiceReference, tracking_count: u64) {
        if reference.property(COMPONENT_NAME).is_none() || reference.property(COMPONENT_ID).is_none() {
            return;
        }
        tracing::debug!(
            reference = %dm.name(),
            service_id = reference.id(),
            tracking_count,
            "recording missing dependency"
        );
        self.missing
            .lock()
            .entry(reference.id())
            .or_default()
            .push(Missing {
                dm: Arc::downgrade(&dm),
                tracking_count,
            });
        // The service may have left before the entry was recorded.
        if !self.registry.is_registered(reference) {
            self.forget_missing(reference.id());
        }
    }

    /// Watches component services leaving the registry.
    fn missing_listener(&self) {
        let filter = Filter::Present(COMPONENT_ID.to_string());
        let (id, mut rx, _) = self.registry.add_listener(Some(filter));
        let me = self.me.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if event.kind != ServiceEventKind::Unregistering {
                    continue;
                }
                let Some(runtime) = me.upgrade() else {
                    break;
                };
                runtime.forget_missing(event.reference.id());
            }
        });
        *self.missing_listener.lock() = Some((id, handle));
    }

    fn forget_missing(&self, service_id: u64) {
        if let Some(waiting) = self.missing.lock().remove(&service_id) {
            tracing::debug!(service_id, waiting = waiting.len(), "service unregistered, dropping missing dependencies");
        }
    }

    pub(crate) fn missing_count(&self) -> usize {
        self.missing.lock().values().map(Vec::len).sum()
    }

    /// Schedules the late binds waiting for `reference`.
    pub(crate) fn missing_service_present(&self, reference: &ServiceReference) {
        let Some(waiting) = self.missing.lock().remove(&reference.id()) else {
            return;
        };
        let reference = reference.clone();
        self.scheduler.schedule(
            async move {
                for missing in waiting {
                    if let Some(dm) = missing.dm.upgrade() {
                        dm.invoke_bind_method_late(&reference, missing.tracking_count).await;
                    }
                }
            }
            .boxed(),
        );
    }

    // ---------------------------------------------------------------------
    // Shutdown
    // ---------------------------------------------------------------------

    /// Disposes every component (most recently added first), waits for
    /// scheduled work and stops event delivery. Calling it twice is a no-op.
    pub async fn shutdown(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("runtime shutting down");

        let components: Vec<_> = std::mem::take(&mut *self.components.lock());
        for manager in components.iter().rev() {
            if let Err(err) = manager.dispose(DeactivationReason::BundleStopped).await {
                tracing::error!(component = %manager.name(), error = %err, "failed to dispose component");
            }
        }
        self.scheduler.drain().await;
        self.missing.lock().clear();
        let missing_listener = self.missing_listener.lock().take();
        if let Some((id, handle)) = missing_listener {
            // Dropping the listener's sender ends the task.
            self.registry.remove_listener(id);
            let _ = handle.await;
        }

        self.listener_token.cancel();
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
        self.subscribers.shutdown().await;
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("active", &self.is_active())
            .field("components", &self.components.lock().len())
            .field("consumer", &self.consumer)
            .finish()
    }
}
