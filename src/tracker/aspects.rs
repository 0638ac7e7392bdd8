//! Aspect-hiding index: only the best-ranked service per base service is visible.
//!
//! A service carrying the [`ASPECT`] property is an aspect of the service whose id
//! is the property value; a service without it is its own base. Within each base
//! group only the best reference (ranking, then age) is exposed to the tracker.
//! When the last aspect leaves, the base service itself becomes visible again.

use std::collections::HashMap;

use crate::registry::{sort_best_first, ServiceReference, ASPECT};

/// Tracker action derived from an index change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Action {
    Track(ServiceReference),
    Untrack(ServiceReference),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Change {
    Insert,
    Update,
    Remove,
}

#[derive(Default)]
pub(crate) struct AspectIndex {
    groups: HashMap<u64, Vec<ServiceReference>>,
}

fn base_of(reference: &ServiceReference) -> u64 {
    reference
        .property(ASPECT)
        .and_then(|v| v.as_long())
        .and_then(|v| u64::try_from(v).ok())
        .unwrap_or_else(|| reference.id())
}

impl AspectIndex {
    /// Loads the initial services and returns the visible ones, best first.
    pub(crate) fn seed(&mut self, refs: Vec<ServiceReference>) -> Vec<ServiceReference> {
        for r in refs {
            self.groups.entry(base_of(&r)).or_default().push(r);
        }
        let mut visible: Vec<ServiceReference> = self
            .groups
            .values_mut()
            .filter_map(|group| {
                sort_best_first(group);
                group.first().cloned()
            })
            .collect();
        sort_best_first(&mut visible);
        visible
    }

    pub(crate) fn insert(&mut self, reference: &ServiceReference) -> Vec<Action> {
        self.apply(reference, Change::Insert)
    }

    pub(crate) fn update(&mut self, reference: &ServiceReference) -> Vec<Action> {
        if self.group_of(reference).is_none() {
            return self.apply(reference, Change::Insert);
        }
        self.apply(reference, Change::Update)
    }

    pub(crate) fn remove(&mut self, reference: &ServiceReference) -> Vec<Action> {
        self.apply(reference, Change::Remove)
    }

    fn group_of(&self, reference: &ServiceReference) -> Option<u64> {
        self.groups
            .iter()
            .find(|(_, group)| group.contains(reference))
            .map(|(base, _)| *base)
    }

    fn best(&self, base: u64) -> Option<ServiceReference> {
        self.groups.get(&base).and_then(|g| g.first().cloned())
    }

    fn apply(&mut self, reference: &ServiceReference, change: Change) -> Vec<Action> {
        let old_base = self.group_of(reference);
        let new_base = match change {
            Change::Remove => None,
            Change::Insert | Change::Update => Some(base_of(reference)),
        };
        let mut bases: Vec<u64> = old_base.into_iter().chain(new_base).collect();
        bases.dedup();
        let before: Vec<Option<ServiceReference>> = bases.iter().map(|b| self.best(*b)).collect();

        if let Some(base) = old_base {
            if let Some(group) = self.groups.get_mut(&base) {
                group.retain(|r| r != reference);
                if group.is_empty() {
                    self.groups.remove(&base);
                }
            }
        }
        if let Some(base) = new_base {
            let group = self.groups.entry(base).or_default();
            group.push(reference.clone());
            sort_best_first(group);
        }

        let mut tracks = Vec::new();
        let mut untracks = Vec::new();
        for (base, before) in bases.iter().zip(before) {
            let after = self.best(*base);
            if before == after {
                if change == Change::Update && after.as_ref() == Some(reference) {
                    tracks.push(reference.clone());
                }
                continue;
            }
            tracks.extend(after);
            untracks.extend(before);
        }
        untracks.retain(|r| !tracks.contains(r));

        tracks
            .into_iter()
            .map(Action::Track)
            .chain(untracks.into_iter().map(Action::Untrack))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Properties, ServiceScope, SERVICE_RANKING};

    fn service(id: u64, aspect_of: Option<u64>, ranking: i64) -> ServiceReference {
        let mut props = Properties::new().with(SERVICE_RANKING, ranking);
        if let Some(base) = aspect_of {
            props.insert(ASPECT, base);
        }
        ServiceReference::new(id, ServiceScope::Singleton, props)
    }

    fn ids(refs: &[ServiceReference]) -> Vec<u64> {
        refs.iter().map(ServiceReference::id).collect()
    }

    #[test]
    fn hidden_insert_is_silent_and_better_insert_swaps() {
        let mut index = AspectIndex::default();
        let base = service(1, None, 0);
        assert_eq!(ids(&index.seed(vec![base.clone()])), vec![1]);

        let aspect = service(2, Some(1), 10);
        assert_eq!(
            index.insert(&aspect),
            vec![Action::Track(aspect.clone()), Action::Untrack(base.clone())]
        );
        assert!(index.insert(&service(3, Some(1), 5)).is_empty());
        assert_eq!(
            index.remove(&aspect),
            vec![Action::Track(service(3, Some(1), 5)), Action::Untrack(aspect)]
        );
    }

    #[test]
    fn update_of_visible_reference_is_a_modification() {
        let mut index = AspectIndex::default();
        let base = service(1, None, 0);
        index.seed(vec![base.clone()]);
        assert_eq!(index.update(&base), vec![Action::Track(base)]);
    }
}
