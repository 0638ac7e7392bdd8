//! # dsvisor
//!
//! **dsvisor** is a declarative component lifecycle runtime for async Rust.
//!
//! Components declare the services they provide and the services they depend
//! on. The runtime tracks those dependencies in an in-process service registry,
//! activates a component once its references are satisfied, registers its
//! service, rebinds or deactivates it as services come and go, and tears it
//! down in order.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//!   │ ComponentMetadata│  │ ComponentMetadata│  │ ComponentMetadata│
//!   └────────┬─────────┘  └────────┬─────────┘  └────────┬─────────┘
//!            ▼                     ▼                     ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Runtime                                                         │
//! │  - ServiceRegistry (services, filters, listeners)                │
//! │  - Bus (broadcast events) ──► SubscriberSet                      │
//! │  - Scheduler (asynchronous enable/disable, late binds)           │
//! │  - missing dependencies (retried once their provider is created) │
//! └────────┬─────────────────────┬─────────────────────┬─────────────┘
//!          ▼                     ▼                     ▼
//!   ComponentManager      ComponentManager      ComponentManager
//!     │  state table: Disabled ─► Unsatisfied ─► Registered/Active ─► ...
//!     │
//!     ├── DependencyManager (one per reference, BindingPolicy)
//!     │      └── ServiceTracker ◄── registry listener channel
//!     │             └── consumer task ─► added / modified / removed
//!     │                    └─► bind / updated / unbind, activate, deactivate
//!     ├── RegistrationManager (queued register / unregister)
//!     └── InstanceContext (implementation object, EdgeInfo per reference)
//! ```
//!
//! ### Lifecycle
//! ```text
//! enable ─► Unsatisfied ─► all references satisfied?
//!                             ├─ no  ─► wait for tracker events
//!                             └─ yes ─► register service
//!                                         ├─ delayed   ─► Registered ─(first get)─► Active
//!                                         ├─ immediate ─► create instance ─► Active
//!                                         └─ factory   ─► Factory ─(new_instance)─► FactoryInstance
//! reference lost / reconfigure ─► deactivate ─► Unsatisfied ─► reactivate when possible
//! disable ─► Disabled          dispose ─► Disposed (terminal)
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                                  |
//! |-------------------|---------------------------------------------------------------|-----------------------------------------------------|
//! | **Components**    | Describe components and implement their callbacks.            | [`ComponentMetadata`], [`Component`]                |
//! | **Lifecycle**     | Enable, disable, reconfigure and dispose components.          | [`ComponentManager`], [`State`]                     |
//! | **References**    | Static/dynamic, greedy/reluctant, unary/multiple bindings.    | [`ReferenceMetadata`], [`BindingPolicy`]            |
//! | **Registry**      | In-process services with properties and LDAP filters.         | [`ServiceRegistry`], [`Filter`], [`ServiceTracker`] |
//! | **Subscriber API**| Observe lifecycle events (logging, metrics, custom).          | [`Subscribe`], [`Event`]                            |
//! | **Errors**        | Typed errors for the runtime, registry and callbacks.         | [`RuntimeError`], [`ComponentError`]                |
//! | **Configuration** | Centralize timeouts and bus capacity.                         | [`RuntimeConfig`]                                   |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use dsvisor::{
//!     Component, ComponentInstance, ComponentMetadata, Implementations, ReferenceMetadata,
//!     RuntimeBuilder, RuntimeConfig, ServiceSource, State, Properties,
//! };
//!
//! struct Greeter;
//! impl Component for Greeter {}
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let loader = Implementations::new()
//!         .with("demo.Greeter", |_| Ok(ComponentInstance::new(Greeter)));
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn dsvisor::Subscribe>> = vec![Arc::new(dsvisor::LogWriter::default())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn dsvisor::Subscribe>> = Vec::new();
//!
//!     let runtime = RuntimeBuilder::new(RuntimeConfig::default())
//!         .with_subscribers(subs)
//!         .with_loader(Arc::new(loader))
//!         .build();
//!
//!     let greeter = runtime
//!         .add_component(
//!             ComponentMetadata::new("greeter", "demo.Greeter")
//!                 .immediate(true)
//!                 .reference(ReferenceMetadata::new("log", "Logger")),
//!         )
//!         .await?;
//!     assert_eq!(greeter.state(), State::Unsatisfied);
//!
//!     // Providing the mandatory reference activates the component.
//!     let logger = runtime
//!         .registry()
//!         .register(&["Logger"], ServiceSource::object(()), Properties::new())?;
//!     while greeter.state() != State::Active {
//!         tokio::task::yield_now().await;
//!     }
//!
//!     logger.unregister().await?;
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

mod component;
mod core;
mod dependency;
mod error;
mod events;
mod registry;
mod subscribers;
mod tracker;

// ---- Public re-exports ----

pub use component::{
    BoundService, CallbackOutcome, Cardinality, Completion, Component, ComponentContext,
    ComponentFactoryHandle, ComponentInstance, ComponentManager, ComponentMetadata,
    ConfigurationPolicy, Constructor, DeactivationReason, ImplementationLoader, Implementations,
    PolicyOption, ReferenceMetadata, ReferencePolicy, ReferenceScope, State,
    COMPONENT_FACTORY_SERVICE,
};
pub use core::{Runtime, RuntimeBuilder, RuntimeConfig, Scheduler, TokioScheduler};
pub use dependency::{BindingPolicy, DependencyManager};
pub use error::{ComponentError, FilterError, RegistryError, RuntimeError};
pub use events::{Bus, Event, EventKind};
pub use registry::{
    downcast, object_class_filter, sort_best_first, AllowAll, ConsumerId, DenyList, Filter,
    ListenerId, Op, PermissionChecker, Properties, PropertyValue, RankKey, ServiceEvent,
    ServiceEventKind, ServiceFactory, ServiceObject, ServiceObjects, ServiceReference,
    ServiceRegistration, ServiceRegistry, ServiceScope, ServiceSource, ASPECT, COMPONENT_FACTORY,
    COMPONENT_ID, COMPONENT_NAME, OBJECT_CLASS, SERVICE_ID, SERVICE_RANKING, SERVICE_SCOPE,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tracker::{ServiceTracker, TrackerCustomizer};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
