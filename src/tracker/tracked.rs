//! Tracked-service bookkeeping shared by a tracker's opener, consumer and closer.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::registry::{sort_best_first, ServiceReference};

struct TrackedState<T> {
    tracked: HashMap<ServiceReference, T>,
    /// References whose `adding` callback is in flight.
    adding: Vec<ServiceReference>,
    /// Initial references not yet processed.
    initial: VecDeque<ServiceReference>,
}

/// Next step for a `track` request.
pub(crate) enum TrackStep<T> {
    Adding,
    Modified { item: T, tracking_count: u64 },
    Skip,
}

/// Result of completing an `adding` callback.
pub(crate) enum AddOutcome<T> {
    Added {
        item: T,
        tracking_count: u64,
        service_count: usize,
    },
    /// Removed or closed while `adding` ran; the item must be announced as removed.
    Untracked(T),
    Dropped,
}

pub(crate) struct Removal<T> {
    pub(crate) item: T,
    pub(crate) tracking_count: u64,
    pub(crate) remaining: usize,
}

/// Read access to the tracked map while the tracker lock is held.
pub struct TrackedView<'a, T> {
    state: &'a TrackedState<T>,
    tracking_count: u64,
}

impl<T: Clone> TrackedView<'_, T> {
    #[inline]
    pub fn tracking_count(&self) -> u64 {
        self.tracking_count
    }

    pub fn len(&self) -> usize {
        self.state.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.tracked.is_empty()
    }

    pub fn get(&self, reference: &ServiceReference) -> Option<T> {
        self.state.tracked.get(reference).cloned()
    }

    /// Tracked entries, best reference first.
    pub fn snapshot(&self) -> Vec<(ServiceReference, T)> {
        snapshot(self.state)
    }
}

fn snapshot<T: Clone>(state: &TrackedState<T>) -> Vec<(ServiceReference, T)> {
    let mut refs: Vec<ServiceReference> = state.tracked.keys().cloned().collect();
    sort_best_first(&mut refs);
    refs.into_iter()
        .filter_map(|r| state.tracked.get(&r).cloned().map(|item| (r, item)))
        .collect()
}

pub(crate) struct Tracked<T> {
    state: Mutex<TrackedState<T>>,
    tracking_count: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl<T: Clone> Tracked<T> {
    pub(crate) fn new(tracking_count: Arc<AtomicU64>) -> Self {
        Self {
            state: Mutex::new(TrackedState {
                tracked: HashMap::new(),
                adding: Vec::new(),
                initial: VecDeque::new(),
            }),
            tracking_count,
            closed: AtomicBool::new(false),
        }
    }

    fn bump(&self) -> u64 {
        self.tracking_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[inline]
    pub(crate) fn tracking_count(&self) -> u64 {
        self.tracking_count.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_initial(&self, refs: Vec<ServiceReference>) {
        self.state.lock().initial = refs.into();
    }

    /// Claims the next initial reference that is neither tracked nor being added.
    pub(crate) fn next_initial(&self) -> Option<ServiceReference> {
        let mut state = self.state.lock();
        loop {
            if self.is_closed() {
                return None;
            }
            let reference = state.initial.pop_front()?;
            if state.tracked.contains_key(&reference) || state.adding.contains(&reference) {
                continue;
            }
            state.adding.push(reference.clone());
            return Some(reference);
        }
    }

    pub(crate) fn begin_track(&self, reference: &ServiceReference) -> TrackStep<T> {
        let mut state = self.state.lock();
        if self.is_closed() {
            return TrackStep::Skip;
        }
        state.initial.retain(|r| r != reference);
        if let Some(item) = state.tracked.get(reference).cloned() {
            return TrackStep::Modified {
                item,
                tracking_count: self.bump(),
            };
        }
        if state.adding.contains(reference) {
            return TrackStep::Skip;
        }
        state.adding.push(reference.clone());
        TrackStep::Adding
    }

    pub(crate) fn finish_adding(&self, reference: &ServiceReference, item: Option<T>) -> AddOutcome<T> {
        let mut state = self.state.lock();
        let was_adding = match state.adding.iter().position(|r| r == reference) {
            Some(i) => {
                state.adding.swap_remove(i);
                true
            }
            None => false,
        };
        match item {
            None => AddOutcome::Dropped,
            Some(item) if was_adding && !self.is_closed() => {
                state.tracked.insert(reference.clone(), item.clone());
                AddOutcome::Added {
                    item,
                    tracking_count: self.bump(),
                    service_count: state.tracked.len(),
                }
            }
            Some(item) => AddOutcome::Untracked(item),
        }
    }

    pub(crate) fn untrack(&self, reference: &ServiceReference) -> Option<Removal<T>> {
        let mut state = self.state.lock();
        if let Some(i) = state.initial.iter().position(|r| r == reference) {
            state.initial.remove(i);
            return None;
        }
        if let Some(i) = state.adding.iter().position(|r| r == reference) {
            state.adding.swap_remove(i);
            return None;
        }
        let item = state.tracked.remove(reference)?;
        Some(Removal {
            item,
            tracking_count: self.bump(),
            remaining: state.tracked.len(),
        })
    }

    /// Marks the bookkeeping closed and returns what was tracked at that point.
    pub(crate) fn close(&self) -> (Vec<(ServiceReference, T)>, u64) {
        let state = self.state.lock();
        self.closed.store(true, Ordering::SeqCst);
        (snapshot(&state), self.tracking_count())
    }

    pub(crate) fn with_view<R>(&self, f: impl FnOnce(&TrackedView<'_, T>) -> R) -> R {
        let state = self.state.lock();
        let view = TrackedView {
            state: &*state,
            tracking_count: self.tracking_count(),
        };
        f(&view)
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().tracked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Properties, ServiceScope};

    fn reference(id: u64) -> ServiceReference {
        ServiceReference::new(id, ServiceScope::Singleton, Properties::new())
    }

    #[test]
    fn add_then_remove_bumps_count_twice() {
        let tracked: Tracked<u8> = Tracked::new(Arc::new(AtomicU64::new(0)));
        let r = reference(1);
        assert!(matches!(tracked.begin_track(&r), TrackStep::Adding));
        assert!(matches!(tracked.begin_track(&r), TrackStep::Skip));
        assert!(matches!(
            tracked.finish_adding(&r, Some(7)),
            AddOutcome::Added { item: 7, tracking_count: 1, service_count: 1 }
        ));
        assert!(matches!(
            tracked.begin_track(&r),
            TrackStep::Modified { item: 7, tracking_count: 2 }
        ));
        let removal = tracked.untrack(&r).unwrap();
        assert_eq!((removal.item, removal.tracking_count, removal.remaining), (7, 3, 0));
    }

    #[test]
    fn removal_during_adding_reports_untracked() {
        let tracked: Tracked<u8> = Tracked::new(Arc::new(AtomicU64::new(0)));
        let r = reference(1);
        assert!(matches!(tracked.begin_track(&r), TrackStep::Adding));
        assert!(tracked.untrack(&r).is_none());
        assert!(matches!(tracked.finish_adding(&r, Some(1)), AddOutcome::Untracked(1)));
        assert_eq!(tracked.len(), 0);
        assert_eq!(tracked.tracking_count(), 0);
    }

    #[test]
    fn initial_skips_already_tracked() {
        let tracked: Tracked<u8> = Tracked::new(Arc::new(AtomicU64::new(0)));
        let (a, b) = (reference(1), reference(2));
        tracked.set_initial(vec![a.clone(), b.clone()]);
        assert!(matches!(tracked.begin_track(&a), TrackStep::Adding));
        tracked.finish_adding(&a, Some(1));
        assert_eq!(tracked.next_initial(), Some(b));
        assert_eq!(tracked.next_initial(), None);
    }

    #[test]
    fn closed_tracker_rejects_new_items() {
        let tracked: Tracked<u8> = Tracked::new(Arc::new(AtomicU64::new(5)));
        let r = reference(1);
        assert!(matches!(tracked.begin_track(&r), TrackStep::Adding));
        let (items, count) = tracked.close();
        assert!(items.is_empty());
        assert_eq!(count, 5);
        assert!(matches!(tracked.finish_adding(&r, Some(1)), AddOutcome::Untracked(1)));
        assert!(matches!(tracked.begin_track(&r), TrackStep::Skip));
    }
}
