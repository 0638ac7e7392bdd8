//! # Service tracking.
//!
//! [`ServiceTracker`] keeps the set of services matching a filter and reports
//! additions, modifications and removals to a [`TrackerCustomizer`]. Each change
//! carries a tracking count so owners can wait until a change is fully handled.
//!
//! In aspect-hiding mode only the best-ranked service per base service is tracked.

mod aspects;
mod customizer;
mod tracked;
#[allow(clippy::module_inception)]
mod tracker;

pub use customizer::TrackerCustomizer;
pub use tracked::TrackedView;
pub use tracker::ServiceTracker;
