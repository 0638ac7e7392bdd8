//! Runtime core: configuration, construction and background work.
//!
//! - [`config`]: timeouts and bus capacity shared by all component managers;
//! - [`builder`]: [`RuntimeBuilder`] wiring registry, bus, subscribers and loader;
//! - [`runtime`]: the [`Runtime`] owning the component managers;
//! - [`scheduler`]: where asynchronous lifecycle work runs.

mod builder;
mod config;
mod runtime;
mod scheduler;

pub use builder::RuntimeBuilder;
pub use config::RuntimeConfig;
pub use runtime::Runtime;
pub use scheduler::{Scheduler, TokioScheduler};
