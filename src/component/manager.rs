//! # Component manager.
//!
//! A [`ComponentManager`] drives one declared component through its lifecycle:
//! it owns the component's dependency managers, its service registration and
//! its live implementation instances.
//!
//! ```text
//!              enable / disable / dispose / reconfigure
//!                              │
//!                              ▼
//!   ┌──────────────────── ComponentManager ─────────────────────┐
//!   │ latch (enable, disable, reconfigure requests in order)    │
//!   │ activation lock (read: activate/deactivate, write: cfg)   │
//!   │ state lock ──► plan(kind, state, trigger) ──► commands    │
//!   └────┬───────────────────┬───────────────────────┬─────────┘
//!        │                   │                       │
//!  DependencyManager   RegistrationManager     InstanceContext
//!  (trackers, binds)   (service registration)  (implementation)
//! ```
//!
//! ## Rules
//! - Every state change runs under the state lock, executing the commands the
//!   transition table returns for the current state.
//! - Lock acquisition is bounded by the runtime's `lock_timeout`; expiry fails the
//!   call with [`RuntimeError::LockTimeout`] and publishes a `LockTimeout` event.
//! - Activation problems (unsatisfied references, failing callbacks) are logged
//!   and published, never returned.
//! - A service request that would recreate a component already being created on
//!   the same task is refused, which breaks circular references.
//! - Activation and deactivation requested from the task that holds the
//!   activation write lock (reconfiguration retargeting a tracker) run without
//!   taking the read lock.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::component::context::ComponentContext;
use crate::component::factory::{ComponentFactoryHandle, COMPONENT_FACTORY_SERVICE};
use crate::component::latch::{Completion, EnableLatch};
use crate::component::registration::{RegState, Registrar, RegistrationManager};
use crate::component::state::{plan, Command, ComponentKind, Plan, State, Trigger};
use crate::component::watermark::Watermark;
use crate::component::{
    CallbackOutcome, ComponentInstance, ComponentMetadata, ConfigurationPolicy, DeactivationReason,
    ImplementationLoader, InstanceContext,
};
use crate::core::{Runtime, RuntimeConfig, Scheduler};
use crate::dependency::{BindingPolicy, DependencyManager, DependencyOwner, RefPair, RefPairKind};
use crate::error::{ComponentError, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::registry::{
    ConsumerId, PermissionChecker, Properties, ServiceFactory, ServiceObject, ServiceReference,
    ServiceRegistration, ServiceRegistry, ServiceScope, ServiceSource, COMPONENT_FACTORY,
    COMPONENT_ID, COMPONENT_NAME,
};

tokio::task_local! {
    /// Components whose instance is being created on the current task.
    static CREATION_STACK: Vec<u64>;
    /// Managers whose activation write lock is held by the current task.
    static ACTIVATION_WRITERS: Vec<usize>;
}

/// Lifecycle engine of one component.
pub struct ComponentManager {
    me: Weak<ComponentManager>,
    runtime: Weak<Runtime>,
    metadata: ComponentMetadata,
    kind: ComponentKind,
    parent: Option<Weak<ComponentManager>>,
    /// Properties passed to `new_instance`, for factory instances.
    factory_properties: Option<Properties>,

    config: RuntimeConfig,
    registry: Arc<ServiceRegistry>,
    bus: Bus,
    scheduler: Arc<dyn Scheduler>,
    permissions: Arc<dyn PermissionChecker>,
    loader: Arc<dyn ImplementationLoader>,

    state: Mutex<State>,
    id: Mutex<Option<u64>>,
    configuration: Mutex<Option<Properties>>,
    /// Service properties returned by a callback; replace the computed ones.
    service_properties: Mutex<Option<Properties>>,
    dependencies: Vec<Arc<DependencyManager>>,
    instances: Mutex<Vec<Arc<InstanceContext>>>,
    factory_instances: Mutex<Vec<Arc<ComponentManager>>>,
    next_key: AtomicU64,
    /// Outstanding gets of the singleton instance.
    uses: AtomicUsize,

    tracking_count: Arc<AtomicU64>,
    watermark: Watermark,
    latch: EnableLatch,
    activation: RwLock<()>,
    state_lock: tokio::sync::Mutex<()>,
    registration: RegistrationManager<ServiceRegistration>,
}

impl ComponentManager {
    pub(crate) fn new(
        runtime: &Arc<Runtime>,
        metadata: ComponentMetadata,
        kind: ComponentKind,
        parent: Option<Weak<ComponentManager>>,
        factory_properties: Option<Properties>,
    ) -> Arc<Self> {
        let config = runtime.config().clone();
        let registry = runtime.registry().clone();
        let permissions = runtime.permissions();
        let consumer = runtime.consumer();

        Arc::new_cyclic(|me: &Weak<ComponentManager>| {
            let owner: Weak<dyn DependencyOwner> = me.clone();
            let dependencies = metadata
                .references
                .iter()
                .enumerate()
                .map(|(index, reference)| {
                    let policy = BindingPolicy::select(
                        reference,
                        kind == ComponentKind::Factory,
                        permissions.can_get(&reference.interface),
                    );
                    DependencyManager::new(
                        owner.clone(),
                        registry.clone(),
                        reference.clone(),
                        index,
                        policy,
                        RefPairKind::select(reference.scope, metadata.service_scope),
                        consumer,
                        config.latch_timeout(),
                    )
                })
                .collect();

            Self {
                me: me.clone(),
                runtime: Arc::downgrade(runtime),
                kind,
                parent,
                factory_properties,
                registry,
                bus: runtime.bus().clone(),
                scheduler: runtime.scheduler(),
                permissions,
                loader: runtime.loader(),
                state: Mutex::new(State::Disabled),
                id: Mutex::new(None),
                configuration: Mutex::new(None),
                service_properties: Mutex::new(None),
                dependencies,
                instances: Mutex::new(Vec::new()),
                factory_instances: Mutex::new(Vec::new()),
                next_key: AtomicU64::new(1),
                uses: AtomicUsize::new(0),
                tracking_count: Arc::new(AtomicU64::new(0)),
                watermark: Watermark::new(),
                latch: EnableLatch::new(),
                activation: RwLock::new(()),
                state_lock: tokio::sync::Mutex::new(()),
                registration: RegistrationManager::new(config.registration_timeout()),
                config,
                metadata,
            }
        })
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    #[inline]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[inline]
    pub fn metadata(&self) -> &ComponentMetadata {
        &self.metadata
    }

    pub fn state(&self) -> State {
        *self.state.lock()
    }

    /// Component id, assigned while the component is enabled.
    pub fn id(&self) -> Option<u64> {
        *self.id.lock()
    }

    pub fn dependencies(&self) -> &[Arc<DependencyManager>] {
        &self.dependencies
    }

    /// Configuration last passed to [`reconfigure`](Self::reconfigure).
    pub fn configuration(&self) -> Option<Properties> {
        self.configuration.lock().clone()
    }

    /// Component properties: declared properties overlaid with configuration,
    /// factory instance properties, `component.name` and `component.id`.
    pub fn properties(&self) -> Properties {
        let mut props = self.metadata.properties.clone();
        if self.metadata.configuration_policy != ConfigurationPolicy::Ignore {
            if let Some(configuration) = &*self.configuration.lock() {
                props.merge(configuration);
            }
        }
        if let Some(extra) = &self.factory_properties {
            props.merge(extra);
        }
        props.insert(COMPONENT_NAME, self.name());
        if let Some(id) = self.id() {
            props.insert(COMPONENT_ID, id);
        }
        props
    }

    /// The first activated implementation instance.
    pub fn component_instance(&self) -> Option<ComponentInstance> {
        self.instances
            .lock()
            .iter()
            .find(|ctx| ctx.is_accessible())
            .map(|ctx| ctx.instance.clone())
    }

    /// Number of live implementation instances.
    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }

    /// Reference of the component's service while it is registered.
    pub fn service_reference(&self) -> Option<ServiceReference> {
        self.registration
            .registration()
            .map(|registration| registration.reference().clone())
    }

    /// Instances created by this component factory that are not disposed.
    pub fn factory_instances(&self) -> Vec<Arc<ComponentManager>> {
        self.factory_instances.lock().clone()
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind).with_component(self.name(), self.id())
    }

    fn publish(&self, event: Event) {
        self.bus.publish(event);
    }

    fn runtime_active(&self) -> bool {
        self.runtime.upgrade().is_some_and(|rt| rt.is_active())
    }

    // ---------------------------------------------------------------------
    // Locks
    // ---------------------------------------------------------------------

    fn lock_timed_out(&self, lock: &'static str) -> RuntimeError {
        let timeout = self.config.lock_timeout();
        tracing::error!(component = %self.name(), lock, ?timeout, "could not obtain component lock");
        self.publish(
            self.event(EventKind::LockTimeout)
                .with_reason(lock)
                .with_timeout(timeout),
        );
        RuntimeError::LockTimeout {
            component: self.name().to_string(),
            lock,
            timeout,
        }
    }

    async fn read_activation(&self) -> Result<RwLockReadGuard<'_, ()>, RuntimeError> {
        tokio::time::timeout(self.config.lock_timeout(), self.activation.read())
            .await
            .map_err(|_| self.lock_timed_out("activation"))
    }

    async fn write_activation(&self) -> Result<RwLockWriteGuard<'_, ()>, RuntimeError> {
        tokio::time::timeout(self.config.lock_timeout(), self.activation.write())
            .await
            .map_err(|_| self.lock_timed_out("activation"))
    }

    fn lock_key(&self) -> usize {
        self as *const Self as usize
    }

    /// True while the current task holds this manager's activation write lock.
    fn holds_activation_write(&self) -> bool {
        ACTIVATION_WRITERS
            .try_with(|writers| writers.contains(&self.lock_key()))
            .unwrap_or(false)
    }

    /// Runs `fut` marked as the holder of the activation write lock, so that
    /// tracker callbacks running inline do not wait for a read lock.
    async fn writing<F: Future>(&self, fut: F) -> F::Output {
        let mut writers = ACTIVATION_WRITERS.try_with(Clone::clone).unwrap_or_default();
        writers.push(self.lock_key());
        ACTIVATION_WRITERS.scope(writers, fut).await
    }

    async fn lock_state(&self) -> Result<MutexGuard<'_, ()>, RuntimeError> {
        tokio::time::timeout(self.config.lock_timeout(), self.state_lock.lock())
            .await
            .map_err(|_| self.lock_timed_out("state"))
    }

    fn disposed(&self, operation: &'static str) -> RuntimeError {
        RuntimeError::Disposed {
            component: self.name().to_string(),
            operation,
        }
    }

    // ---------------------------------------------------------------------
    // Public lifecycle
    // ---------------------------------------------------------------------

    /// Enables the component and tries to activate it.
    ///
    /// With `asynchronous` the work runs on the runtime's scheduler and the
    /// returned [`Completion`] resolves when it is done.
    pub async fn enable(&self, asynchronous: bool) -> Result<Completion, RuntimeError> {
        if self.state() == State::Disposed {
            return Err(self.disposed("enable"));
        }
        let guard = self
            .latch
            .acquire(self.config.lock_timeout())
            .await
            .ok_or_else(|| self.lock_timed_out("enable"))?;
        let completion = guard.completion();

        if asynchronous {
            let Some(me) = self.me.upgrade() else {
                return Ok(Completion::done());
            };
            self.scheduler.schedule(
                async move {
                    if let Err(err) = me.enable_internal().await {
                        tracing::error!(component = %me.name(), error = %err, "asynchronous enable failed");
                    }
                    drop(guard);
                }
                .boxed(),
            );
            return Ok(completion);
        }

        let result = self.enable_internal().await;
        drop(guard);
        result.map(|()| completion)
    }

    async fn enable_internal(&self) -> Result<(), RuntimeError> {
        if !self.runtime_active() {
            tracing::debug!(component = %self.name(), "runtime not active, not enabling");
            return Ok(());
        }
        {
            let _state = self.lock_state().await?;
            self.run(Trigger::Enable).await?;
        }
        self.activate_internal().await
    }

    /// Deactivates and disables the component, releasing its id.
    pub async fn disable(&self, asynchronous: bool) -> Result<Completion, RuntimeError> {
        if self.state() == State::Disposed {
            return Err(self.disposed("disable"));
        }
        let guard = self
            .latch
            .acquire(self.config.lock_timeout())
            .await
            .ok_or_else(|| self.lock_timed_out("disable"))?;
        let completion = guard.completion();

        if asynchronous {
            let Some(me) = self.me.upgrade() else {
                return Ok(Completion::done());
            };
            self.scheduler.schedule(
                async move {
                    if let Err(err) = me.disable_internal().await {
                        tracing::error!(component = %me.name(), error = %err, "asynchronous disable failed");
                    }
                    drop(guard);
                }
                .boxed(),
            );
            return Ok(completion);
        }

        let result = self.disable_internal().await;
        drop(guard);
        result.map(|()| completion)
    }

    async fn disable_internal(&self) -> Result<(), RuntimeError> {
        let _activation = self.read_activation().await?;
        let _state = self.lock_state().await?;
        self.run(Trigger::Disable).await.map(|_| ())
    }

    /// Tears the component down for good. Disposing twice is a no-op.
    pub async fn dispose(&self, reason: DeactivationReason) -> Result<(), RuntimeError> {
        let _activation = self.read_activation().await?;
        self.dispose_locked(reason).await
    }

    async fn dispose_locked(&self, reason: DeactivationReason) -> Result<(), RuntimeError> {
        let _state = self.lock_state().await?;
        self.run(Trigger::Dispose(reason)).await.map(|_| ())
    }

    fn dispose_boxed(self: Arc<Self>, reason: DeactivationReason) -> BoxFuture<'static, ()> {
        async move {
            if let Err(err) = self.dispose(reason).await {
                tracing::error!(component = %self.name(), error = %err, "failed to dispose factory instance");
            }
        }
        .boxed()
    }

    /// Creates, enables and activates a new instance of this component factory.
    pub async fn new_instance(&self, properties: Properties) -> Result<Arc<ComponentManager>, RuntimeError> {
        if self.kind != ComponentKind::Factory {
            return Err(RuntimeError::NotAFactory {
                component: self.name().to_string(),
            });
        }
        let creation_failed = |reason: &str| RuntimeError::InstanceCreation {
            component: self.name().to_string(),
            reason: reason.to_string(),
        };
        if self.state() != State::Factory {
            return Err(creation_failed("component factory is not satisfied"));
        }
        let runtime = self.runtime.upgrade().ok_or(RuntimeError::Inactive)?;

        let mut factory_properties = self.configuration().unwrap_or_default();
        factory_properties.merge(&properties);
        let instance = ComponentManager::new(
            &runtime,
            self.metadata.clone(),
            ComponentKind::FactoryInstance,
            Some(self.me.clone()),
            Some(factory_properties),
        );
        self.factory_instances.lock().push(instance.clone());

        instance.enable(false).await?;
        if instance.component_instance().is_none() {
            tracing::warn!(component = %self.name(), "factory instance could not be activated");
            instance.dispose(DeactivationReason::Disposed).await?;
            self.forget_instance(&instance);
            return Err(creation_failed("instance could not be activated"));
        }
        tracing::debug!(component = %self.name(), id = ?instance.id(), "factory instance created");
        Ok(instance)
    }

    fn forget_instance(&self, instance: &Arc<ComponentManager>) {
        self.factory_instances
            .lock()
            .retain(|other| !Arc::ptr_eq(other, instance));
    }

    /// Applies new configuration, or removes it with `None`.
    ///
    /// A satisfied component takes the change through `modified` when it
    /// declares one and no static reference would need to rebind; otherwise it
    /// is deactivated and activated again. A factory instance is disposed
    /// instead.
    pub async fn reconfigure(&self, configuration: Option<Properties>) -> Result<(), RuntimeError> {
        if self.state() == State::Disposed {
            return Err(self.disposed("reconfigure"));
        }
        if self.metadata.configuration_policy == ConfigurationPolicy::Ignore {
            tracing::debug!(component = %self.name(), "configuration ignored");
            return Ok(());
        }
        if *self.configuration.lock() == configuration {
            tracing::trace!(component = %self.name(), "configuration unchanged");
            return Ok(());
        }
        let _latch = self
            .latch
            .acquire(self.config.lock_timeout())
            .await
            .ok_or_else(|| self.lock_timed_out("reconfigure"))?;

        let deleted = configuration.is_none();
        *self.configuration.lock() = configuration;
        if !self.state().is_enabled() {
            return Ok(());
        }

        let activation = self.write_activation().await?;
        if !self.state().is_satisfied() {
            tracing::debug!(component = %self.name(), "updating targets of unsatisfied component");
            self.writing(self.update_targets()).await;
            drop(activation);
            return self.activate_internal().await;
        }

        if self.writing(self.modify(deleted)).await? {
            self.publish(self.event(EventKind::ComponentReconfigured).with_reason("modified"));
            return Ok(());
        }

        let reason = if deleted {
            DeactivationReason::ConfigurationDeleted
        } else {
            DeactivationReason::ConfigurationModified
        };
        if self.kind == ComponentKind::FactoryInstance {
            tracing::debug!(component = %self.name(), "disposing factory instance on reconfiguration");
            return self.writing(self.dispose_locked(reason)).await;
        }

        tracing::debug!(component = %self.name(), %reason, "reactivating to apply configuration");
        self.writing(async {
            self.deactivate_locked(reason).await?;
            self.update_targets().await;
            Ok::<_, RuntimeError>(())
        })
        .await?;
        drop(activation);
        self.activate_internal().await?;
        self.publish(
            self.event(EventKind::ComponentReconfigured)
                .with_reason(if deleted { "deleted" } else { "reactivated" }),
        );
        Ok(())
    }

    /// Applies configuration to a satisfied component without reactivating it.
    ///
    /// Returns `false` when reactivation is needed.
    async fn modify(&self, deleted: bool) -> Result<bool, RuntimeError> {
        if deleted && !self.metadata.delete_calls_modify {
            return Ok(false);
        }
        if !self.metadata.has_modified && self.kind != ComponentKind::Factory {
            return Ok(false);
        }
        let props = self.properties();
        if !self.dependencies.iter().all(|dm| dm.can_update_dynamically(&props)) {
            tracing::debug!(component = %self.name(), "target change affects static references");
            return Ok(false);
        }

        let state = self.lock_state().await?;
        let instances: Vec<_> = self.instances.lock().clone();
        let mut succeeded = true;
        let mut outcome = CallbackOutcome::Done;
        for ctx in &instances {
            ctx.context.set_properties(props.clone());
            match ctx.component().modified(&ctx.context).await {
                Ok(CallbackOutcome::Done) => {}
                Ok(other) => outcome = other,
                Err(err) => {
                    tracing::error!(component = %self.name(), error = %err, "modified callback returned an error");
                    succeeded = false;
                }
            }
        }
        // Tracker callbacks triggered by new targets take the state lock.
        drop(state);
        self.update_targets().await;
        if !succeeded {
            return Ok(false);
        }
        if !self.dependencies.iter().all(|dm| dm.is_satisfied()) {
            tracing::debug!(component = %self.name(), "new targets left a reference unsatisfied");
            return Ok(false);
        }
        match outcome {
            CallbackOutcome::Properties(props) => self.set_service_properties(props),
            _ => self.update_service_registration(),
        }
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Activation
    // ---------------------------------------------------------------------

    async fn activate_internal(&self) -> Result<(), RuntimeError> {
        if self.state() != State::Unsatisfied {
            return Ok(());
        }
        if self.holds_activation_write() {
            return self.activate_locked().await;
        }
        let _activation = self.read_activation().await?;
        self.activate_locked().await
    }

    /// Activates assuming the activation lock is held.
    async fn activate_locked(&self) -> Result<(), RuntimeError> {
        if self.state() != State::Unsatisfied {
            return Ok(());
        }
        if !self.runtime_active() {
            tracing::debug!(component = %self.name(), "runtime not active, not activating");
            return Ok(());
        }
        if self.metadata.configuration_policy == ConfigurationPolicy::Require
            && self.configuration.lock().is_none()
        {
            tracing::debug!(component = %self.name(), "missing required configuration, cannot activate");
            return Ok(());
        }
        if !self.can_register_services() {
            tracing::warn!(component = %self.name(), "not permitted to register all services, cannot activate");
            return Ok(());
        }

        let _state = self.lock_state().await?;
        if self.state() != State::Unsatisfied {
            return Ok(());
        }
        if !self.run(Trigger::Activate).await? {
            tracing::debug!(component = %self.name(), "activation did not complete");
        }
        Ok(())
    }

    async fn deactivate_internal(&self, reason: DeactivationReason) -> Result<(), RuntimeError> {
        if !self.state().is_satisfied() {
            return Ok(());
        }
        if self.holds_activation_write() {
            return self.deactivate_locked(reason).await;
        }
        let _activation = self.read_activation().await?;
        self.deactivate_locked(reason).await
    }

    /// Deactivates assuming the activation lock is held.
    async fn deactivate_locked(&self, reason: DeactivationReason) -> Result<(), RuntimeError> {
        let _state = self.lock_state().await?;
        match self.run(Trigger::Deactivate(reason)).await {
            Ok(_) | Err(RuntimeError::Disposed { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn provided_interfaces(&self) -> Vec<&str> {
        if self.kind == ComponentKind::Factory {
            vec![COMPONENT_FACTORY_SERVICE]
        } else {
            self.metadata.services.iter().map(String::as_str).collect()
        }
    }

    fn can_register_services(&self) -> bool {
        self.provided_interfaces()
            .iter()
            .all(|interface| self.permissions.can_register(interface))
    }

    // ---------------------------------------------------------------------
    // Transitions
    // ---------------------------------------------------------------------

    /// Executes the plan for `trigger`. The state lock must be held.
    ///
    /// Returns `false` when there was nothing to do or a command stopped the
    /// transition.
    async fn run(&self, trigger: Trigger) -> Result<bool, RuntimeError> {
        let state = self.state();
        let transition = match plan(self.kind, state, trigger) {
            Plan::Noop => {
                tracing::trace!(component = %self.name(), %state, ?trigger, "nothing to do");
                return Ok(false);
            }
            Plan::Disposed => return Err(self.disposed("state change")),
            Plan::Run(transition) => transition,
        };
        tracing::trace!(component = %self.name(), %state, ?trigger, "running transition");

        for command in transition.commands {
            if !self.execute(command).await {
                tracing::debug!(component = %self.name(), ?command, "transition stopped");
                for undo in transition.rollback {
                    self.execute(undo).await;
                }
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn execute(&self, command: Command) -> bool {
        match command {
            Command::RegisterComponentId => {
                let id = self.runtime.upgrade().map(|rt| rt.allocate_component_id());
                *self.id.lock() = id;
                self.publish(self.event(EventKind::ComponentEnabled));
            }
            Command::UnregisterComponentId => {
                self.publish(self.event(EventKind::ComponentDisabled));
                *self.id.lock() = None;
            }
            Command::UpdateTargets => self.update_targets().await,
            Command::VerifyDependencies => {
                if let Some(dm) = self.dependencies.iter().find(|dm| !dm.is_satisfied()) {
                    tracing::debug!(component = %self.name(), reference = %dm.name(), "dependency not satisfied");
                    return false;
                }
            }
            Command::Enter(state) => self.enter(state),
            Command::RegisterService => return self.register_service().await,
            Command::UnregisterService => {
                self.registration
                    .change(RegState::Unregistered, &ServiceRegistrar { manager: self })
                    .await;
            }
            Command::CreateInstance => {
                let Some(id) = self.id() else {
                    return false;
                };
                let created = self
                    .creating(id, self.create_instance(None))
                    .await
                    .flatten();
                return created.is_some();
            }
            Command::DeleteInstances(reason) => {
                let instances: Vec<_> = self.instances.lock().iter().rev().cloned().collect();
                for ctx in instances {
                    self.delete_component(&ctx, reason).await;
                }
                self.uses.store(0, Ordering::SeqCst);
            }
            Command::DeactivateDependencies => self.deactivate_dependencies().await,
            Command::DisableDependencies => {
                for dm in &self.dependencies {
                    dm.unregister_service_listener().await;
                }
            }
            Command::DisposeInstances(reason) => {
                let children = std::mem::take(&mut *self.factory_instances.lock());
                for child in children {
                    child.dispose_boxed(reason).await;
                }
            }
            Command::Clear => self.clear(),
        }
        true
    }

    fn enter(&self, state: State) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous == state {
            return;
        }
        tracing::debug!(component = %self.name(), from = %previous, to = %state, "state changed");
        self.publish(self.event(EventKind::StateChanged).with_state(state));
    }

    fn clear(&self) {
        self.instances.lock().clear();
        *self.service_properties.lock() = None;
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            if let Some(me) = self.me.upgrade() {
                parent.forget_instance(&me);
            }
        }
        self.publish(self.event(EventKind::ComponentDisposed));
    }

    async fn update_targets(&self) {
        let props = self.properties();
        for dm in &self.dependencies {
            dm.set_target_filter(&props).await;
        }
    }

    async fn deactivate_dependencies(&self) {
        for dm in &self.dependencies {
            dm.deactivate().await;
        }
    }

    // ---------------------------------------------------------------------
    // Service registration
    // ---------------------------------------------------------------------

    async fn register_service(&self) -> bool {
        if self.provided_interfaces().is_empty() {
            return true;
        }
        if !self.can_register_services() {
            tracing::warn!(component = %self.name(), "not permitted to register service");
            return false;
        }
        self.registration
            .change(RegState::Registered, &ServiceRegistrar { manager: self })
            .await;
        true
    }

    fn service_properties(&self) -> Properties {
        let overridden = self.service_properties.lock().clone();
        let mut props = overridden.unwrap_or_else(|| self.properties().public());
        props.insert(COMPONENT_NAME, self.name());
        if let Some(id) = self.id() {
            props.insert(COMPONENT_ID, id);
        }
        if self.kind == ComponentKind::Factory {
            if let Some(factory) = &self.metadata.factory {
                props.insert(COMPONENT_FACTORY, factory.as_str());
            }
        }
        props
    }

    fn set_service_properties(&self, properties: Properties) {
        *self.service_properties.lock() = Some(properties);
        self.update_service_registration();
    }

    fn update_service_registration(&self) {
        let Some(registration) = self.registration.registration() else {
            return;
        };
        if let Err(err) = registration.set_properties(self.service_properties()) {
            tracing::debug!(component = %self.name(), error = %err, "could not update service properties");
        }
    }

    fn service_source(&self) -> ServiceSource {
        if self.kind == ComponentKind::Factory {
            return ServiceSource::object(ComponentFactoryHandle::new(self.me.clone()));
        }
        ServiceSource::Factory(Arc::new(ComponentServiceFactory {
            manager: self.me.clone(),
            scope: self.metadata.service_scope,
        }))
    }

    // ---------------------------------------------------------------------
    // Instances
    // ---------------------------------------------------------------------

    /// Runs `fut` with this component on the task's creation stack.
    ///
    /// Returns `None` when the component is already being created on this task.
    async fn creating<F: Future>(&self, id: u64, fut: F) -> Option<F::Output> {
        let mut stack = CREATION_STACK.try_with(Clone::clone).unwrap_or_default();
        if stack.contains(&id) {
            tracing::warn!(component = %self.name(), "circular reference detected, service not available");
            return None;
        }
        stack.push(id);
        Some(CREATION_STACK.scope(stack, fut).await)
    }

    async fn create_instance(&self, consumer: Option<ConsumerId>) -> Option<Arc<InstanceContext>> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        if !self.collect_dependencies(key).await {
            return None;
        }
        self.create_component(key, consumer).await
    }

    async fn collect_dependencies(&self, key: u64) -> bool {
        for dm in &self.dependencies {
            if !dm.prebind(key).await {
                tracing::debug!(component = %self.name(), reference = %dm.name(), "could not get required dependency");
                self.deactivate_dependencies().await;
                return false;
            }
        }
        true
    }

    fn activation_failed(&self, reason: String) {
        tracing::error!(component = %self.name(), %reason, "component activation failed");
        self.publish(self.event(EventKind::ActivationFailed).with_reason(reason));
    }

    async fn create_component(&self, key: u64, consumer: Option<ConsumerId>) -> Option<Arc<InstanceContext>> {
        let Some(constructor) = self.loader.load(&self.metadata.implementation) else {
            self.activation_failed(format!("no implementation named {}", self.metadata.implementation));
            self.deactivate_dependencies().await;
            return None;
        };
        let context = ComponentContext::new(
            self.me.clone(),
            self.name().to_string(),
            self.id().unwrap_or_default(),
            self.properties(),
            key,
            consumer,
        );
        let instance = match constructor(&context) {
            Ok(instance) => instance,
            Err(err) => {
                self.activation_failed(format!("constructor failed: {err}"));
                self.deactivate_dependencies().await;
                return None;
            }
        };
        let ctx = Arc::new(InstanceContext::new(
            key,
            instance,
            context,
            self.dependencies.len(),
        ));
        // Binds arriving while the edges open must find the instance.
        self.instances.lock().push(ctx.clone());

        let mut failed = None;
        for (index, dm) in self.dependencies.iter().enumerate() {
            if !dm.open(&ctx, &ctx.edges[index]).await {
                failed = Some(index);
                break;
            }
        }
        if let Some(index) = failed {
            tracing::debug!(
                component = %self.name(),
                reference = %self.dependencies[index].name(),
                "dependency not satisfied while opening"
            );
            for edge in &ctx.edges[index + 1..] {
                edge.ignore();
            }
            self.abandon(&ctx).await;
            return None;
        }

        match ctx.component().activate(&ctx.context).await {
            Ok(CallbackOutcome::Properties(props)) => self.set_service_properties(props),
            Ok(_) => {}
            Err(err) => {
                self.activation_failed(format!("activate callback failed: {err}"));
                self.abandon(&ctx).await;
                return None;
            }
        }
        ctx.set_accessible(true);
        tracing::debug!(component = %self.name(), instance = key, "component activated");
        self.publish(self.event(EventKind::ComponentActivated));

        if let (Some(reference), Some(runtime)) = (self.service_reference(), self.runtime.upgrade()) {
            runtime.missing_service_present(&reference);
        }
        Some(ctx)
    }

    /// Unbinds a half-created instance and drops it.
    async fn abandon(&self, ctx: &Arc<InstanceContext>) {
        for (index, dm) in self.dependencies.iter().enumerate().rev() {
            dm.close(ctx, &ctx.edges[index]).await;
        }
        self.remove_instance(ctx);
        self.deactivate_dependencies().await;
    }

    fn remove_instance(&self, ctx: &Arc<InstanceContext>) {
        self.instances.lock().retain(|other| !Arc::ptr_eq(other, ctx));
    }

    async fn delete_component(&self, ctx: &Arc<InstanceContext>, reason: DeactivationReason) {
        // In-flight binds finish before the deactivate callback runs.
        let count = self.tracking_count.load(Ordering::SeqCst);
        self.wait_for_tracked(count).await;

        ctx.set_accessible(false);
        if let Err(err) = ctx.component().deactivate(&ctx.context, reason).await {
            tracing::warn!(component = %self.name(), error = %err, "deactivate callback returned an error");
        }
        for (index, dm) in self.dependencies.iter().enumerate().rev() {
            dm.close(ctx, &ctx.edges[index]).await;
        }
        self.remove_instance(ctx);
        if self.instances.lock().is_empty() {
            *self.service_properties.lock() = None;
        }
        tracing::debug!(component = %self.name(), instance = ctx.key, %reason, "component deactivated");
        self.publish(
            self.event(EventKind::ComponentDeactivated)
                .with_reason(reason.as_str()),
        );
    }

    // ---------------------------------------------------------------------
    // Service requests
    // ---------------------------------------------------------------------

    /// Returns the service object for `consumer`, creating the instance if needed.
    async fn get_service(&self, consumer: ConsumerId) -> Option<ServiceObject> {
        let id = self.id()?;
        self.creating(id, self.get_service_scoped(consumer))
            .await
            .flatten()
    }

    async fn get_service_scoped(&self, consumer: ConsumerId) -> Option<ServiceObject> {
        let _state = self.lock_state().await.ok()?;
        let state = self.state();
        if !matches!(state, State::Registered | State::Active | State::FactoryInstance) {
            tracing::debug!(component = %self.name(), %state, "service requested from inactive component");
            return None;
        }

        let per_consumer = self.metadata.service_scope != ServiceScope::Singleton;
        if !per_consumer {
            let existing = self.instances.lock().first().cloned();
            if let Some(ctx) = existing {
                self.uses.fetch_add(1, Ordering::SeqCst);
                return Some(ctx.instance.service.clone());
            }
        }

        let ctx = self.create_instance(per_consumer.then_some(consumer)).await?;
        self.uses.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.run(Trigger::InstanceCreated).await {
            tracing::debug!(component = %self.name(), error = %err, "instance created on disposed component");
        }
        Some(ctx.instance.service.clone())
    }

    /// Releases one get of `object`.
    ///
    /// Instance teardown is scheduled rather than done inline: ungets also arrive
    /// while the component unregisters its service under its own state lock.
    fn unget_service(&self, object: ServiceObject) {
        let release = match self.metadata.service_scope {
            ServiceScope::Singleton => {
                let previous = self
                    .uses
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
                    .unwrap_or_default();
                previous <= 1 && self.kind == ComponentKind::Delayed
            }
            _ => true,
        };
        if !release {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        self.scheduler.schedule(
            async move {
                if let Err(err) = me.release(object).await {
                    tracing::warn!(component = %me.name(), error = %err, "could not release instance");
                }
            }
            .boxed(),
        );
    }

    async fn release(&self, object: ServiceObject) -> Result<(), RuntimeError> {
        let _state = self.lock_state().await?;
        if self.state() != State::Active {
            return Ok(());
        }
        let victims: Vec<_> = match self.metadata.service_scope {
            ServiceScope::Singleton => {
                if self.uses.load(Ordering::SeqCst) > 0 {
                    return Ok(());
                }
                self.instances.lock().clone()
            }
            _ => self
                .instances
                .lock()
                .iter()
                .filter(|ctx| same_object(&ctx.instance.service, &object))
                .cloned()
                .collect(),
        };
        for ctx in victims {
            self.delete_component(&ctx, DeactivationReason::Unspecified).await;
        }
        if self.instances.lock().is_empty() {
            self.run(Trigger::InstancesReleased).await?;
        }
        Ok(())
    }

    fn dependency(&self, name: &str) -> Option<&Arc<DependencyManager>> {
        self.dependencies.iter().find(|dm| dm.name() == name)
    }

    pub(crate) async fn locate_service(&self, name: &str, key: u64) -> Option<ServiceObject> {
        self.dependency(name)?.get_service(key).await
    }

    pub(crate) async fn locate_services(&self, name: &str, key: u64) -> Vec<ServiceObject> {
        match self.dependency(name) {
            Some(dm) => dm.get_services(key).await,
            None => Vec::new(),
        }
    }
}

fn same_object(a: &ServiceObject, b: &ServiceObject) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl std::fmt::Debug for ComponentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentManager")
            .field("name", &self.name())
            .field("id", &self.id())
            .field("state", &self.state())
            .field("kind", &self.kind)
            .finish()
    }
}

#[async_trait]
impl DependencyOwner for ComponentManager {
    fn component_name(&self) -> &str {
        self.name()
    }

    fn tracking_count(&self) -> Arc<AtomicU64> {
        self.tracking_count.clone()
    }

    fn tracked(&self, tracking_count: u64) {
        self.watermark.tracked(tracking_count);
    }

    async fn wait_for_tracked(&self, tracking_count: u64) {
        let timeout = self.config.tracked_timeout();
        if self.watermark.wait_for(tracking_count, timeout).await {
            return;
        }
        let (ceiling, missing) = self.watermark.snapshot();
        tracing::error!(
            component = %self.name(),
            tracking_count,
            ceiling,
            ?missing,
            "timed out waiting for tracked service changes"
        );
        self.publish(
            self.event(EventKind::TrackedTimeout)
                .with_reason(tracking_count.to_string())
                .with_timeout(timeout),
        );
    }

    async fn activate(&self) {
        if let Err(err) = self.activate_internal().await {
            tracing::error!(component = %self.name(), error = %err, "activation failed");
        }
    }

    async fn deactivate_for_reference(&self) {
        if let Err(err) = self.deactivate_internal(DeactivationReason::ReferenceBroken).await {
            tracing::error!(component = %self.name(), error = %err, "deactivation failed");
        }
    }

    async fn invoke_bind(&self, dm: &DependencyManager, pair: &Arc<RefPair>, tracking_count: u64) {
        let instances: Vec<_> = self.instances.lock().clone();
        for ctx in instances {
            if let Some(edge) = ctx.edge(dm.index()) {
                dm.invoke_bind_method(&ctx, pair, tracking_count, edge).await;
            }
        }
    }

    async fn invoke_updated(&self, dm: &DependencyManager, pair: &Arc<RefPair>, tracking_count: u64) -> bool {
        let instances: Vec<_> = self.instances.lock().clone();
        let mut reactivate = false;
        for ctx in instances {
            if let Some(edge) = ctx.edge(dm.index()) {
                reactivate |= dm.invoke_updated_method(&ctx, pair, tracking_count, edge).await;
            }
        }
        reactivate
    }

    async fn invoke_unbind(&self, dm: &DependencyManager, pair: &Arc<RefPair>, tracking_count: u64) {
        let instances: Vec<_> = self.instances.lock().clone();
        for ctx in instances {
            if let Some(edge) = ctx.edge(dm.index()) {
                dm.invoke_unbind_method(&ctx, pair, tracking_count, edge).await;
            }
        }
    }

    async fn apply_outcome(&self, outcome: CallbackOutcome) {
        if let CallbackOutcome::Properties(props) = outcome {
            self.set_service_properties(props);
        }
    }

    fn bind_failed(&self, dm: &DependencyManager, reference: &ServiceReference, error: &ComponentError) {
        self.publish(
            self.event(EventKind::BindFailed)
                .with_reference(dm.name())
                .with_service_id(reference.id())
                .with_reason(error.to_string()),
        );
    }

    fn register_missing(&self, dm: Arc<DependencyManager>, reference: &ServiceReference, tracking_count: u64) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.register_missing(dm, reference, tracking_count);
        }
    }
}

/// Performs the registry calls for the component's own service.
struct ServiceRegistrar<'a> {
    manager: &'a ComponentManager,
}

#[async_trait]
impl Registrar<ServiceRegistration> for ServiceRegistrar<'_> {
    async fn register(&self) -> Option<ServiceRegistration> {
        let manager = self.manager;
        let interfaces = manager.provided_interfaces();
        match manager
            .registry
            .register(&interfaces, manager.service_source(), manager.service_properties())
        {
            Ok(registration) => {
                let service_id = registration.reference().id();
                tracing::debug!(component = %manager.name(), service_id, "service registered");
                manager.publish(
                    manager
                        .event(EventKind::ServiceRegistered)
                        .with_service_id(service_id),
                );
                Some(registration)
            }
            Err(err) => {
                tracing::error!(component = %manager.name(), error = %err, "could not register service");
                None
            }
        }
    }

    async fn unregister(&self, registration: ServiceRegistration) {
        let manager = self.manager;
        let service_id = registration.reference().id();
        if let Err(err) = registration.unregister().await {
            tracing::debug!(component = %manager.name(), error = %err, "service already unregistered");
        }
        tracing::debug!(component = %manager.name(), service_id, "service unregistered");
        manager.publish(
            manager
                .event(EventKind::ServiceUnregistered)
                .with_service_id(service_id),
        );
    }

    fn timed_out(&self, desired: RegState) {
        let manager = self.manager;
        let timeout = manager.config.registration_timeout();
        tracing::error!(component = %manager.name(), %desired, ?timeout, "registration change timed out");
        manager.publish(
            manager
                .event(EventKind::RegistrationTimeout)
                .with_reason(desired.to_string())
                .with_timeout(timeout),
        );
    }
}

/// Hands out the component's implementation objects through the registry.
struct ComponentServiceFactory {
    manager: Weak<ComponentManager>,
    scope: ServiceScope,
}

#[async_trait]
impl ServiceFactory for ComponentServiceFactory {
    async fn get_service(&self, consumer: ConsumerId, _reference: &ServiceReference) -> Option<ServiceObject> {
        self.manager.upgrade()?.get_service(consumer).await
    }

    async fn unget_service(&self, _consumer: ConsumerId, _reference: &ServiceReference, service: ServiceObject) {
        if let Some(manager) = self.manager.upgrade() {
            manager.unget_service(service);
        }
    }

    fn scope(&self) -> ServiceScope {
        self.scope
    }
}
