use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::component::{ReferenceMetadata, ReferenceScope};
use crate::dependency::{RefPair, RefPairKind};
use crate::registry::{ServiceReference, ServiceScope};

/// How a reference reacts to services appearing, changing and disappearing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingPolicy {
    /// Unary dynamic: rebinds in place.
    SingleDynamic,
    /// Unary static: reactivates the component to rebind.
    SingleStatic,
    /// Multiple dynamic: binds and unbinds each service in place.
    MultipleDynamic,
    /// Multiple static, greedy: reactivates on every change.
    MultipleStaticGreedy,
    /// Multiple static, reluctant: keeps the set bound at activation.
    MultipleStaticReluctant,
    /// Owner is a component factory: only tracks satisfaction.
    Factory,
    /// The owner may not get the interface: never tracks anything.
    NoPermissions,
}

impl BindingPolicy {
    pub fn select(metadata: &ReferenceMetadata, owner_is_factory: bool, can_get: bool) -> Self {
        if !can_get {
            return BindingPolicy::NoPermissions;
        }
        if owner_is_factory {
            return BindingPolicy::Factory;
        }
        match (metadata.is_multiple(), metadata.is_static()) {
            (false, false) => BindingPolicy::SingleDynamic,
            (false, true) => BindingPolicy::SingleStatic,
            (true, false) => BindingPolicy::MultipleDynamic,
            (true, true) if metadata.is_reluctant() => BindingPolicy::MultipleStaticReluctant,
            (true, true) => BindingPolicy::MultipleStaticGreedy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BindingPolicy::SingleDynamic => "single_dynamic",
            BindingPolicy::SingleStatic => "single_static",
            BindingPolicy::MultipleDynamic => "multiple_dynamic",
            BindingPolicy::MultipleStaticGreedy => "multiple_static_greedy",
            BindingPolicy::MultipleStaticReluctant => "multiple_static_reluctant",
            BindingPolicy::Factory => "factory",
            BindingPolicy::NoPermissions => "no_permissions",
        }
    }

    #[inline]
    pub(crate) fn is_single(self) -> bool {
        matches!(self, BindingPolicy::SingleDynamic | BindingPolicy::SingleStatic)
    }
}

impl fmt::Display for BindingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RefPairKind {
    /// Bundle-scoped references share one object; prototype references get one
    /// per instance unless the owner itself only ever has a single instance.
    pub(crate) fn select(reference_scope: ReferenceScope, owner_scope: ServiceScope) -> Self {
        match (reference_scope, owner_scope) {
            (ReferenceScope::Bundle, _) => RefPairKind::Single,
            (_, ServiceScope::Singleton) => RefPairKind::SinglePrototype,
            _ => RefPairKind::MultiplePrototype,
        }
    }
}

/// Mutable per-policy bookkeeping of a dependency manager.
#[derive(Default)]
pub(crate) struct PolicyState {
    /// Unary policies: the bound pair.
    pub(crate) bound: Option<Arc<RefPair>>,
    /// Tracking count the bound pairs belong to (unary and reluctant policies).
    pub(crate) tracking_count: u64,
    /// Multiple dynamic: the pair whose removal is deactivating the component.
    pub(crate) last_removed: Option<(Arc<RefPair>, u64)>,
    /// Multiple static reluctant: the set bound at activation.
    pub(crate) reluctant: Option<Vec<Arc<RefPair>>>,
    /// Pairs of the tracker being replaced, reused by dynamic policies.
    pub(crate) previous: HashMap<ServiceReference, Arc<RefPair>>,
    /// The current tracker finished its initial open.
    pub(crate) tracker_opened: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Cardinality;

    #[test]
    fn selects_policy_from_metadata() {
        let unary = ReferenceMetadata::new("r", "S");
        assert_eq!(BindingPolicy::select(&unary, false, true), BindingPolicy::SingleStatic);
        assert_eq!(
            BindingPolicy::select(&unary.clone().dynamic(), false, true),
            BindingPolicy::SingleDynamic
        );

        let multiple = unary.clone().cardinality(Cardinality::OptionalMultiple);
        assert_eq!(
            BindingPolicy::select(&multiple, false, true),
            BindingPolicy::MultipleStaticReluctant
        );
        assert_eq!(
            BindingPolicy::select(&multiple.clone().greedy(), false, true),
            BindingPolicy::MultipleStaticGreedy
        );
        assert_eq!(
            BindingPolicy::select(&multiple.dynamic(), false, true),
            BindingPolicy::MultipleDynamic
        );

        assert_eq!(BindingPolicy::select(&unary, true, true), BindingPolicy::Factory);
        assert_eq!(BindingPolicy::select(&unary, true, false), BindingPolicy::NoPermissions);
    }

    #[test]
    fn pair_kind_follows_scopes() {
        assert_eq!(
            RefPairKind::select(ReferenceScope::Bundle, ServiceScope::Prototype),
            RefPairKind::Single
        );
        assert_eq!(
            RefPairKind::select(ReferenceScope::Prototype, ServiceScope::Singleton),
            RefPairKind::SinglePrototype
        );
        assert_eq!(
            RefPairKind::select(ReferenceScope::PrototypeRequired, ServiceScope::Bundle),
            RefPairKind::MultiplePrototype
        );
    }
}
