//! Registry change notifications delivered to listeners.

use crate::registry::reference::ServiceReference;

/// Kind of registry change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceEventKind {
    /// A matching service was registered.
    Registered,
    /// A matching service changed its properties and still matches.
    Modified,
    /// A service changed its properties and no longer matches the listener filter.
    ModifiedEndMatch,
    /// A matching service is being unregistered.
    Unregistering,
}

impl ServiceEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceEventKind::Registered => "registered",
            ServiceEventKind::Modified => "modified",
            ServiceEventKind::ModifiedEndMatch => "modified_endmatch",
            ServiceEventKind::Unregistering => "unregistering",
        }
    }
}

/// A registry change, as seen by one listener.
#[derive(Clone, Debug)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub reference: ServiceReference,
}
