//! # Service tracker.
//!
//! A [`ServiceTracker`] follows the services matching one filter and reports them
//! to a [`TrackerCustomizer`].
//!
//! ```text
//! open()
//!   ├─► registry.add_listener(filter) ─► (rx, initial snapshot)   [atomic]
//!   ├─► track initial services on the caller's task
//!   └─► spawn consumer: rx ─► Registered/Modified ─► track
//!                            ModifiedEndMatch/Unregistering ─► untrack
//! close() ─► closed flag + listener removed ─► snapshot of tracked items
//! complete_close(snapshot) ─► untrack each item (announces removal)
//! ```
//!
//! Registry events are handled by a single consumer task per tracker, in delivery
//! order. Every addition, modification and removal increments the shared
//! tracking count; the new value travels with the customizer callback.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::registry::{Filter, ListenerId, ServiceEvent, ServiceEventKind, ServiceReference, ServiceRegistry};
use crate::tracker::aspects::{Action, AspectIndex};
use crate::tracker::customizer::TrackerCustomizer;
use crate::tracker::tracked::{AddOutcome, TrackStep, Tracked, TrackedView};

pub struct ServiceTracker<C: TrackerCustomizer> {
    registry: Arc<ServiceRegistry>,
    filter: Option<Filter>,
    customizer: Arc<C>,
    tracked: Arc<Tracked<C::Item>>,
    aspects: Option<Arc<Mutex<AspectIndex>>>,
    listener: Mutex<Option<ListenerId>>,
    opened: AtomicBool,
    active: AtomicBool,
}

impl<C: TrackerCustomizer> ServiceTracker<C> {
    /// Creates a closed tracker.
    ///
    /// `tracking_count` may be shared between trackers; counts are then unique
    /// across all of them.
    pub fn new(
        registry: Arc<ServiceRegistry>,
        filter: Option<Filter>,
        customizer: Arc<C>,
        tracking_count: Arc<AtomicU64>,
    ) -> Self {
        Self {
            registry,
            filter,
            customizer,
            tracked: Arc::new(Tracked::new(tracking_count)),
            aspects: None,
            listener: Mutex::new(None),
            opened: AtomicBool::new(false),
            active: AtomicBool::new(false),
        }
    }

    /// Exposes only the best-ranked service per base service (see [`ASPECT`](crate::registry::ASPECT)).
    pub fn hide_aspects(mut self, hide: bool) -> Self {
        self.aspects = hide.then(|| Arc::new(Mutex::new(AspectIndex::default())));
        self
    }

    /// Initial value of the owner's "active" flag.
    pub fn with_active(self, active: bool) -> Self {
        self.active.store(active, Ordering::SeqCst);
        self
    }

    /// Starts tracking: services already registered are processed on the calling
    /// task before this returns; later changes run on the consumer task.
    pub async fn open(&self) {
        if self.opened.swap(true, Ordering::SeqCst) {
            return;
        }
        let (id, rx, initial) = self.registry.add_listener(self.filter.clone());
        *self.listener.lock() = Some(id);

        let initial = match &self.aspects {
            Some(index) => index.lock().seed(initial),
            None => initial,
        };
        self.tracked.set_initial(initial);

        while let Some(reference) = self.tracked.next_initial() {
            track_adding(&self.tracked, &*self.customizer, reference).await;
        }

        tokio::spawn(consume(
            rx,
            self.tracked.clone(),
            self.customizer.clone(),
            self.aspects.clone(),
        ));
    }

    /// Stops tracking and returns the items tracked at this point with the
    /// tracking count.
    ///
    /// Items are not announced as removed; pass the snapshot (or part of it) to
    /// [`complete_close`](Self::complete_close) for that.
    pub fn close(&self) -> (Vec<(ServiceReference, C::Item)>, u64) {
        let result = self.tracked.close();
        if let Some(id) = self.listener.lock().take() {
            self.registry.remove_listener(id);
        }
        result
    }

    /// Untracks `items`, invoking the removal callbacks for each.
    pub async fn complete_close(&self, items: Vec<(ServiceReference, C::Item)>) {
        for (reference, _) in items {
            untrack(&self.tracked, &*self.customizer, &reference).await;
        }
    }

    /// Tracked items (best first) with the tracking count; optionally sets the
    /// active flag in the same critical section.
    pub fn get_tracked(&self, activate: Option<bool>) -> (Vec<(ServiceReference, C::Item)>, u64) {
        self.tracked.with_view(|view| {
            if let Some(active) = activate {
                self.active.store(active, Ordering::SeqCst);
            }
            (view.snapshot(), view.tracking_count())
        })
    }

    /// Runs `f` while holding the tracker lock.
    pub fn locked<R>(&self, f: impl FnOnce(&TrackedView<'_, C::Item>) -> R) -> R {
        self.tracked.with_view(f)
    }

    pub fn get_item(&self, reference: &ServiceReference) -> Option<C::Item> {
        self.tracked.with_view(|view| view.get(reference))
    }

    pub fn tracked_references(&self) -> Vec<ServiceReference> {
        self.tracked
            .with_view(|view| view.snapshot().into_iter().map(|(r, _)| r).collect())
    }

    #[inline]
    pub fn service_count(&self) -> usize {
        self.tracked.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.service_count() == 0
    }

    #[inline]
    pub fn tracking_count(&self) -> u64 {
        self.tracked.tracking_count()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

async fn consume<C: TrackerCustomizer>(
    mut rx: mpsc::UnboundedReceiver<ServiceEvent>,
    tracked: Arc<Tracked<C::Item>>,
    customizer: Arc<C>,
    aspects: Option<Arc<Mutex<AspectIndex>>>,
) {
    while let Some(event) = rx.recv().await {
        if tracked.is_closed() {
            break;
        }
        let reference = &event.reference;
        let Some(index) = &aspects else {
            match event.kind {
                ServiceEventKind::Registered | ServiceEventKind::Modified => {
                    track(&tracked, &*customizer, reference).await
                }
                ServiceEventKind::ModifiedEndMatch | ServiceEventKind::Unregistering => {
                    untrack(&tracked, &*customizer, reference).await
                }
            }
            continue;
        };

        let actions = {
            let mut index = index.lock();
            match event.kind {
                ServiceEventKind::Registered => index.insert(reference),
                ServiceEventKind::Modified => index.update(reference),
                ServiceEventKind::ModifiedEndMatch | ServiceEventKind::Unregistering => {
                    index.remove(reference)
                }
            }
        };
        for action in actions {
            match action {
                Action::Track(r) => track(&tracked, &*customizer, &r).await,
                Action::Untrack(r) => untrack(&tracked, &*customizer, &r).await,
            }
        }
    }
}

async fn track<C: TrackerCustomizer>(tracked: &Tracked<C::Item>, customizer: &C, reference: &ServiceReference) {
    match tracked.begin_track(reference) {
        TrackStep::Skip => {}
        TrackStep::Adding => track_adding(tracked, customizer, reference.clone()).await,
        TrackStep::Modified {
            item,
            tracking_count,
        } => customizer.modified(reference, &item, tracking_count).await,
    }
}

async fn track_adding<C: TrackerCustomizer>(tracked: &Tracked<C::Item>, customizer: &C, reference: ServiceReference) {
    let item = customizer.adding(&reference).await;
    match tracked.finish_adding(&reference, item) {
        AddOutcome::Added {
            item,
            tracking_count,
            service_count,
        } => {
            customizer
                .added(&reference, &item, tracking_count, service_count)
                .await
        }
        // Never a real count: counts start at 1.
        AddOutcome::Untracked(item) => customizer.removed(&reference, &item, 0).await,
        AddOutcome::Dropped => {}
    }
}

async fn untrack<C: TrackerCustomizer>(tracked: &Tracked<C::Item>, customizer: &C, reference: &ServiceReference) {
    if let Some(removal) = tracked.untrack(reference) {
        customizer
            .removing(reference, &removal.item, removal.remaining)
            .await;
        customizer
            .removed(reference, &removal.item, removal.tracking_count)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Properties, ServiceRegistration, ServiceSource, ASPECT, SERVICE_RANKING};
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TrackerCustomizer for Recorder {
        type Item = u64;

        async fn adding(&self, reference: &ServiceReference) -> Option<u64> {
            Some(reference.id())
        }

        async fn added(&self, _: &ServiceReference, item: &u64, _: u64, size: usize) {
            self.log.lock().push(format!("added {item} size={size}"));
        }

        async fn modified(&self, _: &ServiceReference, item: &u64, _: u64) {
            self.log.lock().push(format!("modified {item}"));
        }

        async fn removing(&self, _: &ServiceReference, item: &u64, remaining: usize) {
            self.log.lock().push(format!("removing {item} remaining={remaining}"));
        }

        async fn removed(&self, _: &ServiceReference, item: &u64, _: u64) {
            self.log.lock().push(format!("removed {item}"));
        }
    }

    fn tracker(registry: &Arc<ServiceRegistry>, recorder: &Arc<Recorder>) -> ServiceTracker<Recorder> {
        ServiceTracker::new(
            registry.clone(),
            Some(Filter::parse("(objectClass=S)").unwrap()),
            recorder.clone(),
            Arc::new(AtomicU64::new(0)),
        )
    }

    fn register(registry: &Arc<ServiceRegistry>, props: Properties) -> ServiceRegistration {
        registry
            .register(&["S"], ServiceSource::object(()), props)
            .unwrap()
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn visible(t: &ServiceTracker<Recorder>) -> Vec<u64> {
        let mut ids: Vec<u64> = t.tracked_references().iter().map(ServiceReference::id).collect();
        ids.sort_unstable();
        ids
    }

    #[tokio::test]
    async fn tracks_initial_then_live_changes() {
        let registry = ServiceRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let first = register(&registry, Properties::new());

        let t = tracker(&registry, &recorder);
        t.open().await;
        assert_eq!(recorder.log.lock().clone(), vec!["added 1 size=1"]);
        assert_eq!(t.tracking_count(), 1);

        let second = register(&registry, Properties::new().with(SERVICE_RANKING, 4));
        eventually(|| t.service_count() == 2).await;
        let (items, count) = t.get_tracked(Some(true));
        assert_eq!(items.iter().map(|(_, id)| *id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(count, 2);
        assert!(t.is_active());

        first.set_properties(Properties::new().with("x", 1)).unwrap();
        second.unregister().await.unwrap();
        eventually(|| recorder.log.lock().len() == 5).await;
        assert_eq!(
            recorder.log.lock().clone(),
            vec![
                "added 1 size=1",
                "added 2 size=2",
                "modified 1",
                "removing 2 remaining=1",
                "removed 2",
            ]
        );
        assert_eq!(t.tracking_count(), 4);
    }

    #[tokio::test]
    async fn close_snapshot_then_complete_close_announces_removal() {
        let registry = ServiceRegistry::new();
        let recorder = Arc::new(Recorder::default());
        register(&registry, Properties::new());
        let t = tracker(&registry, &recorder);
        t.open().await;

        let (items, count) = t.close();
        assert_eq!(items.len(), 1);
        assert_eq!(count, 1);

        register(&registry, Properties::new());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(t.service_count(), 1, "closed tracker ignores new services");

        t.complete_close(items).await;
        assert!(t.is_empty());
        assert_eq!(recorder.log.lock().last().map(String::as_str), Some("removed 1"));
    }

    #[tokio::test]
    async fn aspects_hide_lower_ranked_services_of_same_base() {
        let registry = ServiceRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let _s1 = register(&registry, Properties::new());
        let s2 = register(&registry, Properties::new().with(ASPECT, 1).with(SERVICE_RANKING, 10));
        let _s3 = register(&registry, Properties::new());
        let s4 = register(&registry, Properties::new().with(ASPECT, 1).with(SERVICE_RANKING, 5));
        let _s5 = register(&registry, Properties::new().with(ASPECT, 3).with(SERVICE_RANKING, 5));

        let t = tracker(&registry, &recorder).hide_aspects(true);
        t.open().await;
        assert_eq!(visible(&t), vec![2, 5]);

        s2.unregister().await.unwrap();
        eventually(|| visible(&t) == vec![4, 5]).await;

        s4.unregister().await.unwrap();
        eventually(|| visible(&t) == vec![1, 5]).await;

        let _s6 = register(&registry, Properties::new().with(ASPECT, 1).with(SERVICE_RANKING, 20));
        eventually(|| visible(&t) == vec![5, 6]).await;
    }
}
