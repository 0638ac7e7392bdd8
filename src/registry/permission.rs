//! Permission checks consulted before getting or registering services.

use std::collections::HashSet;

/// Decides whether the runtime may get or register a service interface.
///
/// A missing get permission makes a dependency behave as if no service were
/// available; a missing register permission keeps the component from activating.
pub trait PermissionChecker: Send + Sync + 'static {
    fn can_get(&self, interface: &str) -> bool;
    fn can_register(&self, interface: &str) -> bool;
}

/// Grants everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn can_get(&self, _: &str) -> bool {
        true
    }

    fn can_register(&self, _: &str) -> bool {
        true
    }
}

/// Denies the listed interfaces, grants the rest.
#[derive(Clone, Debug, Default)]
pub struct DenyList {
    get: HashSet<String>,
    register: HashSet<String>,
}

impl DenyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_get(mut self, interface: impl Into<String>) -> Self {
        self.get.insert(interface.into());
        self
    }

    pub fn deny_register(mut self, interface: impl Into<String>) -> Self {
        self.register.insert(interface.into());
        self
    }
}

impl PermissionChecker for DenyList {
    fn can_get(&self, interface: &str) -> bool {
        !self.get.contains(interface)
    }

    fn can_register(&self, interface: &str) -> bool {
        !self.register.contains(interface)
    }
}
