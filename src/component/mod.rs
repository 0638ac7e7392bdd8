//! # Components.
//!
//! - [`ComponentMetadata`] / [`ReferenceMetadata`] describe a component and its references.
//! - [`Component`] is the implementation contract; [`ComponentContext`] is what it sees.
//! - [`ComponentManager`] drives the lifecycle through the [`State`] transition table.
//! - [`ComponentFactoryHandle`] creates instances of component factories.

mod context;
mod factory;
mod instance;
mod latch;
mod manager;
mod metadata;
mod registration;
mod state;
mod watermark;

pub use context::ComponentContext;
pub use factory::{ComponentFactoryHandle, COMPONENT_FACTORY_SERVICE};
pub use instance::{
    BoundService, CallbackOutcome, Component, ComponentInstance, Constructor, DeactivationReason,
    ImplementationLoader, Implementations,
};
pub use latch::Completion;
pub use manager::ComponentManager;
pub use metadata::{
    Cardinality, ComponentMetadata, ConfigurationPolicy, PolicyOption, ReferenceMetadata,
    ReferencePolicy, ReferenceScope,
};
pub use state::State;

pub(crate) use instance::InstanceContext;
pub(crate) use state::ComponentKind;

#[cfg(test)]
mod tests;
