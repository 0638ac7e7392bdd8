//! # Reference handling.
//!
//! Everything between a component's reference metadata and the tracked services:
//!
//! - [`DependencyManager`] tracks one reference and applies its [`BindingPolicy`].
//! - [`RefPair`] holds the service object(s) obtained for one tracked reference.
//! - [`EdgeInfo`] orders tracker-driven binds against an instance's open and close.

mod customizer;
mod edge;
mod manager;
mod owner;
mod policy;
mod ref_pair;

pub use edge::EdgeInfo;
pub use manager::DependencyManager;
pub use policy::BindingPolicy;
pub use ref_pair::{RefPair, RefPairKind};

pub(crate) use owner::DependencyOwner;
