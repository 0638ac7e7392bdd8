//! Service references and their ranking order.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::registry::properties::{Properties, PropertyValue, OBJECT_CLASS};
use crate::registry::service::ServiceScope;

/// Handle to a registered service.
///
/// Cheap to clone; equality and hashing use the service id only, so a reference
/// stays the same key when its properties are modified.
#[derive(Clone)]
pub struct ServiceReference {
    inner: Arc<ReferenceInner>,
}

struct ReferenceInner {
    id: u64,
    scope: ServiceScope,
    properties: RwLock<Properties>,
}

impl ServiceReference {
    pub(crate) fn new(id: u64, scope: ServiceScope, properties: Properties) -> Self {
        Self {
            inner: Arc::new(ReferenceInner {
                id,
                scope,
                properties: RwLock::new(properties),
            }),
        }
    }

    /// Registry-assigned service id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[inline]
    pub fn scope(&self) -> ServiceScope {
        self.inner.scope
    }

    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.inner.properties.read().get(key).cloned()
    }

    /// Snapshot of the current properties.
    pub fn properties(&self) -> Properties {
        self.inner.properties.read().clone()
    }

    /// Current `service.ranking`.
    pub fn ranking(&self) -> i64 {
        self.inner.properties.read().ranking()
    }

    /// Interfaces the service is registered under.
    pub fn interfaces(&self) -> Vec<String> {
        self.property(OBJECT_CLASS)
            .map(|v| v.to_strings())
            .unwrap_or_default()
    }

    /// Ordering key; greater means "better".
    pub fn rank_key(&self) -> RankKey {
        RankKey {
            ranking: self.ranking(),
            id: self.inner.id,
        }
    }

    pub(crate) fn set_properties(&self, properties: Properties) {
        *self.inner.properties.write() = properties;
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ServiceReference {}

impl Hash for ServiceReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.inner.id)
            .field("ranking", &self.ranking())
            .finish()
    }
}

/// Snapshot of the data that orders references.
///
/// Higher `service.ranking` wins; on equal ranking the lower (older) service id wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RankKey {
    pub ranking: i64,
    pub id: u64,
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ranking
            .cmp(&other.ranking)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sorts references best-first.
pub fn sort_best_first(refs: &mut [ServiceReference]) {
    refs.sort_by_cached_key(|r| std::cmp::Reverse(r.rank_key()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::properties::SERVICE_RANKING;

    fn reference(id: u64, ranking: i64) -> ServiceReference {
        ServiceReference::new(
            id,
            ServiceScope::Singleton,
            Properties::new().with(SERVICE_RANKING, ranking),
        )
    }

    #[test]
    fn higher_ranking_then_lower_id_wins() {
        assert!(reference(5, 10).rank_key() > reference(1, 0).rank_key());
        assert!(reference(1, 3).rank_key() > reference(2, 3).rank_key());

        let mut refs = vec![reference(3, 0), reference(2, 5), reference(1, 0)];
        sort_best_first(&mut refs);
        let ids: Vec<u64> = refs.iter().map(ServiceReference::id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn equality_ignores_properties() {
        let a = reference(1, 0);
        let b = a.clone();
        b.set_properties(Properties::new().with(SERVICE_RANKING, 9));
        assert_eq!(a, b);
        assert_eq!(a.ranking(), 9);
    }
}
