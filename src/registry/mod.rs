//! # In-process service registry.
//!
//! Services are registered under one or more interface names with a property map,
//! looked up with LDAP-style [`Filter`]s and observed through listener channels.
//!
//! - [`ServiceRegistry`] register, query, get/unget with per-consumer use counts
//! - [`ServiceReference`] handle ordered by ranking, then age ([`RankKey`])
//! - [`ServiceFactory`] lazily produced objects (bundle or prototype scope)
//! - [`PermissionChecker`] get/register permissions per interface

mod event;
mod filter;
mod permission;
mod properties;
mod reference;
#[allow(clippy::module_inception)]
mod registry;
mod service;

pub use event::{ServiceEvent, ServiceEventKind};
pub use filter::{Filter, Op};
pub use permission::{AllowAll, DenyList, PermissionChecker};
pub use properties::{
    Properties, PropertyValue, ASPECT, COMPONENT_FACTORY, COMPONENT_ID, COMPONENT_NAME,
    OBJECT_CLASS, SERVICE_ID, SERVICE_RANKING, SERVICE_SCOPE,
};
pub use reference::{sort_best_first, RankKey, ServiceReference};
pub use registry::{object_class_filter, ListenerId, ServiceObjects, ServiceRegistration, ServiceRegistry};
pub use service::{downcast, ConsumerId, ServiceFactory, ServiceObject, ServiceScope, ServiceSource};
