//! # Dependency manager.
//!
//! One [`DependencyManager`] exists per reference of a component. It owns the
//! service tracker for the reference's filter, decides per [`BindingPolicy`]
//! what a service change means for the component, and performs the bind,
//! updated and unbind callbacks for one instance at a time.
//!
//! ```text
//! set_target_filter ─► close old tracker ─► wait for its changes
//!                     └► open new tracker (previous pairs reused) ─► untrack leftovers
//! prebind   ─► obtain service objects, decide satisfaction
//! open      ─► edge.set_open(count) ─► bind refs ─► edge.open_done()
//! close     ─► edge.set_close(count) ─► wait for tracked ─► unbind refs ─► edge.close_done()
//! deactivate ─► unget held objects ─► tracker inactive
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::component::{BoundService, CallbackOutcome, InstanceContext, ReferenceMetadata, ReferenceScope};
use crate::dependency::customizer::DependencyCustomizer;
use crate::dependency::owner::DependencyOwner;
use crate::dependency::policy::PolicyState;
use crate::dependency::{BindingPolicy, EdgeInfo, RefPair, RefPairKind};
use crate::registry::{
    object_class_filter, ConsumerId, Filter, Op, Properties, PropertyValue, ServiceObject,
    ServiceReference, ServiceRegistry, COMPONENT_ID, SERVICE_SCOPE,
};
use crate::tracker::{ServiceTracker, TrackedView};

pub(crate) type DependencyTracker = ServiceTracker<DependencyCustomizer>;

pub struct DependencyManager {
    pub(super) me: Weak<DependencyManager>,
    pub(super) owner: Weak<dyn DependencyOwner>,
    pub(super) registry: Arc<ServiceRegistry>,
    pub(super) metadata: ReferenceMetadata,
    name: Arc<str>,
    index: usize,
    pub(super) policy: BindingPolicy,
    pair_kind: RefPairKind,
    pub(super) consumer: ConsumerId,
    latch_timeout: Duration,
    min_cardinality: AtomicUsize,
    target: Mutex<Option<String>>,
    tracker: Mutex<Option<Arc<DependencyTracker>>>,
    pub(super) state: Mutex<PolicyState>,
}

impl DependencyManager {
    pub(crate) fn new(
        owner: Weak<dyn DependencyOwner>,
        registry: Arc<ServiceRegistry>,
        metadata: ReferenceMetadata,
        index: usize,
        policy: BindingPolicy,
        pair_kind: RefPairKind,
        consumer: ConsumerId,
        latch_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            owner,
            registry,
            name: Arc::from(metadata.name.as_str()),
            min_cardinality: AtomicUsize::new(metadata.cardinality.min()),
            metadata,
            index,
            policy,
            pair_kind,
            consumer,
            latch_timeout,
            target: Mutex::new(None),
            tracker: Mutex::new(None),
            state: Mutex::new(PolicyState::default()),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn metadata(&self) -> &ReferenceMetadata {
        &self.metadata
    }

    #[inline]
    pub fn policy(&self) -> BindingPolicy {
        self.policy
    }

    /// Target filter in effect, if any.
    pub fn target(&self) -> Option<String> {
        self.target.lock().clone()
    }

    pub fn min_cardinality(&self) -> usize {
        self.min_cardinality.load(Ordering::SeqCst)
    }

    /// Number of services currently tracked.
    pub fn service_count(&self) -> usize {
        self.tracker().map_or(0, |t| t.service_count())
    }

    /// Enough services are tracked to satisfy the minimum cardinality.
    pub fn is_satisfied(&self) -> bool {
        if self.policy == BindingPolicy::NoPermissions {
            return self.min_cardinality() == 0;
        }
        self.cardinality_satisfied(self.service_count())
    }

    /// References this dependency binds (or would bind) right now.
    pub fn bound_references(&self) -> Vec<ServiceReference> {
        self.current_refs()
            .0
            .into_iter()
            .filter(|p| !p.is_deleted() && !p.is_failed())
            .map(|p| p.reference().clone())
            .collect()
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub(super) fn owner(&self) -> Option<Arc<dyn DependencyOwner>> {
        self.owner.upgrade()
    }

    pub(super) fn tracker(&self) -> Option<Arc<DependencyTracker>> {
        self.tracker.lock().clone()
    }

    #[inline]
    pub(super) fn cardinality_satisfied(&self, service_count: usize) -> bool {
        service_count >= self.min_cardinality()
    }

    /// The change that brought the count to exactly the minimum.
    #[inline]
    pub(super) fn cardinality_just_satisfied(&self, service_count: usize) -> bool {
        service_count == self.min_cardinality()
    }

    #[inline]
    pub(super) fn is_active(&self) -> bool {
        self.tracker().is_some_and(|t| t.is_active())
    }

    #[inline]
    pub(super) fn tracker_opened(&self) -> bool {
        self.state.lock().tracker_opened
    }

    pub(super) fn new_ref_pair(&self, reference: &ServiceReference) -> Arc<RefPair> {
        Arc::new(RefPair::new(reference.clone(), self.pair_kind))
    }

    pub(super) fn register_missing(&self, reference: &ServiceReference, tracking_count: u64) {
        if let (Some(owner), Some(me)) = (self.owner(), self.me.upgrade()) {
            owner.register_missing(me, reference, tracking_count);
        }
    }

    /// Pairs the policy considers bound, with the tracking count they belong to.
    ///
    /// Must be called with the tracker lock held when `view` is given; never takes
    /// the tracker lock itself.
    fn refs(&self, view: Option<&TrackedView<'_, Arc<RefPair>>>) -> (Vec<Arc<RefPair>>, u64) {
        let tracked = || {
            view.map_or((Vec::new(), 0), |v| {
                (v.snapshot().into_iter().map(|(_, p)| p).collect(), v.tracking_count())
            })
        };
        let state = self.state.lock();
        match self.policy {
            BindingPolicy::Factory | BindingPolicy::NoPermissions => {
                (Vec::new(), view.map_or(0, |v| v.tracking_count()))
            }
            BindingPolicy::SingleDynamic | BindingPolicy::SingleStatic => {
                (state.bound.iter().cloned().collect(), state.tracking_count)
            }
            BindingPolicy::MultipleDynamic => match &state.last_removed {
                Some((pair, count)) => {
                    let (mut refs, _) = tracked();
                    refs.push(pair.clone());
                    (refs, *count)
                }
                None => tracked(),
            },
            BindingPolicy::MultipleStaticGreedy => tracked(),
            BindingPolicy::MultipleStaticReluctant => {
                (state.reluctant.clone().unwrap_or_default(), state.tracking_count)
            }
        }
    }

    fn current_refs(&self) -> (Vec<Arc<RefPair>>, u64) {
        match self.tracker() {
            Some(tracker) => tracker.locked(|view| self.refs(Some(view))),
            None => self.refs(None),
        }
    }

    fn locked<R>(&self, f: impl FnOnce(Option<&TrackedView<'_, Arc<RefPair>>>) -> R) -> R {
        match self.tracker() {
            Some(tracker) => tracker.locked(|view| f(Some(view))),
            None => f(None),
        }
    }

    fn min_cardinality_from(&self, properties: &Properties) -> usize {
        let declared = self.metadata.cardinality.min();
        let key = self.metadata.min_cardinality_property();
        let Some(value) = properties.get(&key) else {
            return declared;
        };
        match value.as_long() {
            Some(min) if min >= declared as i64 && (self.metadata.is_multiple() || min <= 1) => min as usize,
            _ => {
                tracing::warn!(
                    component = %self.owner().map(|o| o.component_name().to_string()).unwrap_or_default(),
                    reference = %self.name,
                    value = %value,
                    "ignoring invalid minimum cardinality"
                );
                declared
            }
        }
    }

    fn target_from(&self, properties: &Properties) -> Option<String> {
        properties
            .get(&self.metadata.target_property())
            .and_then(PropertyValue::as_str)
            .map(str::to_string)
            .or_else(|| self.metadata.target.clone())
    }

    fn build_filter(&self, target: Option<&str>) -> Filter {
        let mut clauses = vec![object_class_filter(&self.metadata.interface)];
        if self.metadata.scope == ReferenceScope::PrototypeRequired {
            clauses.push(format!("({SERVICE_SCOPE}=prototype)"));
        }
        if let Some(target) = target {
            clauses.push(target.to_string());
        }
        let text = if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            format!("(&{})", clauses.concat())
        };
        match Filter::parse(&text) {
            Ok(filter) => filter,
            Err(err) => {
                tracing::error!(reference = %self.name, filter = %text, error = %err, "invalid target filter");
                Filter::Compare {
                    attr: COMPONENT_ID.to_string(),
                    op: Op::Equal,
                    value: "-1".to_string(),
                }
            }
        }
    }

    /// Whether new configuration can be applied without reactivating the owner.
    pub(crate) fn can_update_dynamically(&self, properties: &Properties) -> bool {
        let target = self.target_from(properties);
        let min = self.min_cardinality_from(properties);
        if min == self.min_cardinality() && target == self.target() {
            return true;
        }
        if self.metadata.is_static() {
            return false;
        }
        if min == 0 {
            return true;
        }
        let filter = self.build_filter(target.as_deref());
        self.registry.get_service_references(Some(&filter)).len() >= min
    }

    /// Applies target and minimum cardinality from `properties`, replacing the
    /// tracker when the target changed.
    pub(crate) async fn set_target_filter(&self, properties: &Properties) {
        self.min_cardinality
            .store(self.min_cardinality_from(properties), Ordering::SeqCst);
        let target = self.target_from(properties);
        let unchanged = {
            let current = self.target.lock();
            self.tracker().is_some() && *current == target
        };
        if unchanged {
            return;
        }
        self.replace_tracker(target).await;
    }

    async fn replace_tracker(&self, target: Option<String>) {
        let Some(owner) = self.owner() else {
            return;
        };
        let old = self.tracker.lock().take();
        let mut previous = Vec::new();
        if let Some(old) = &old {
            let (snapshot, count) = old.close();
            owner.wait_for_tracked(count).await;
            previous = snapshot;
        }
        self.state.lock().previous = previous.iter().cloned().collect();

        let filter = self.build_filter(target.as_deref());
        tracing::debug!(
            component = %owner.component_name(),
            reference = %self.name,
            filter = %filter,
            "opening dependency tracker"
        );
        let customizer = Arc::new(DependencyCustomizer::new(self.me.clone()));
        let tracker = Arc::new(
            ServiceTracker::new(
                self.registry.clone(),
                Some(filter),
                customizer,
                owner.tracking_count(),
            )
            .hide_aspects(self.metadata.hide_aspects)
            .with_active(old.as_ref().is_some_and(|t| t.is_active())),
        );
        *self.target.lock() = target;
        *self.tracker.lock() = Some(tracker.clone());
        self.state.lock().tracker_opened = false;
        tracker.open().await;
        self.state.lock().tracker_opened = true;

        if let Some(old) = old {
            let leftovers: Vec<_> = {
                let mut state = self.state.lock();
                let leftovers = previous
                    .into_iter()
                    .filter(|(r, _)| state.previous.contains_key(r))
                    .collect();
                state.previous.clear();
                leftovers
            };
            old.complete_close(leftovers).await;
        }
    }

    /// Stops tracking. Used when the owner is disabled.
    pub(crate) async fn unregister_service_listener(&self) {
        let old = self.tracker.lock().take();
        if let Some(old) = old {
            let (_, count) = old.close();
            if let Some(owner) = self.owner() {
                owner.wait_for_tracked(count).await;
            }
        }
        let mut state = self.state.lock();
        state.tracker_opened = false;
        state.previous.clear();
        *self.target.lock() = None;
    }

    /// Obtains service objects for the instance `key` and reports whether the
    /// dependency is satisfied.
    pub(crate) async fn prebind(&self, key: u64) -> bool {
        let Some(tracker) = self.tracker() else {
            return self.cardinality_satisfied(0);
        };
        match self.policy {
            BindingPolicy::NoPermissions => self.cardinality_satisfied(0),
            BindingPolicy::Factory => false,
            BindingPolicy::MultipleDynamic | BindingPolicy::MultipleStaticGreedy => {
                let (tracked, count) = tracker.get_tracked(Some(true));
                let mut bound = 0;
                let mut failed = Vec::new();
                for (_, pair) in tracked {
                    if pair.get_service_object(key, &self.registry, self.consumer).await {
                        bound += 1;
                    } else {
                        failed.push(pair);
                    }
                }
                if !self.cardinality_satisfied(bound) {
                    return false;
                }
                for pair in failed {
                    self.register_missing(pair.reference(), count);
                }
                true
            }
            BindingPolicy::MultipleStaticReluctant => {
                let existing = {
                    let state = self.state.lock();
                    state.reluctant.clone().map(|refs| (refs, state.tracking_count))
                };
                if let Some((refs, count)) = existing {
                    let mut bound = 0;
                    for pair in refs {
                        if pair.get_service_object(key, &self.registry, self.consumer).await {
                            bound += 1;
                        } else {
                            self.register_missing(pair.reference(), count);
                        }
                    }
                    return self.cardinality_satisfied(bound);
                }
                let (tracked, count) = tracker.get_tracked(Some(true));
                let mut refs = Vec::with_capacity(tracked.len());
                let mut bound = 0;
                for (_, pair) in tracked {
                    if pair.get_service_object(key, &self.registry, self.consumer).await {
                        bound += 1;
                    }
                    refs.push(pair);
                }
                {
                    let mut state = self.state.lock();
                    if state.reluctant.is_none() {
                        state.reluctant = Some(refs);
                        state.tracking_count = count;
                    }
                }
                self.cardinality_satisfied(bound)
            }
            BindingPolicy::SingleDynamic | BindingPolicy::SingleStatic => {
                let mut satisfied = self.cardinality_satisfied(0);
                if !satisfied && tracker.is_empty() {
                    return false;
                }
                let (tracked, count) = tracker.get_tracked(Some(true));
                let Some((_, pair)) = tracked.into_iter().next() else {
                    return satisfied;
                };
                {
                    let mut state = self.state.lock();
                    state.bound = Some(pair.clone());
                    state.tracking_count = count;
                }
                satisfied |= pair.get_service_object(key, &self.registry, self.consumer).await;
                let retry = self.policy == BindingPolicy::SingleStatic || self.cardinality_satisfied(0);
                if pair.is_failed() && retry {
                    self.register_missing(pair.reference(), count);
                }
                satisfied
            }
        }
    }

    /// Binds the current services to a new instance.
    ///
    /// Returns whether enough services were bound.
    pub(crate) async fn open(&self, ctx: &InstanceContext, edge: &EdgeInfo) -> bool {
        let (refs, count) = self.locked(|view| {
            let (refs, count) = self.refs(view);
            edge.set_open(count);
            (refs, count)
        });
        tracing::debug!(
            reference = %self.name,
            instance = ctx.key,
            tracking_count = count,
            bind = refs.len(),
            "opening dependency"
        );
        let mut bound = 0;
        for pair in refs {
            if pair.is_deleted() || pair.is_failed() {
                continue;
            }
            if !self.do_invoke_bind(ctx, &pair).await {
                tracing::warn!(
                    reference = %self.name,
                    service_id = pair.reference().id(),
                    "bind callback failed"
                );
            }
            bound += 1;
        }
        edge.open_done();
        self.cardinality_satisfied(bound)
    }

    /// Unbinds everything bound to an instance that is going away.
    pub(crate) async fn close(&self, ctx: &InstanceContext, edge: &EdgeInfo) {
        let (refs, count) = self.locked(|view| {
            let (refs, count) = self.refs(view);
            edge.set_close(count);
            (refs, count)
        });
        tracing::debug!(
            reference = %self.name,
            instance = ctx.key,
            tracking_count = count,
            "closing dependency"
        );
        if let Some(owner) = self.owner() {
            owner.wait_for_tracked(count).await;
        }
        for pair in refs {
            if !pair.is_failed() {
                self.invoke_unbind_method(ctx, &pair, count, edge).await;
            }
        }
        edge.close_done();
    }

    /// Releases the objects held for bound services and marks the tracker inactive.
    pub(crate) async fn deactivate(&self) {
        let held: Vec<Arc<RefPair>> = match self.policy {
            BindingPolicy::NoPermissions => return,
            BindingPolicy::Factory => Vec::new(),
            BindingPolicy::SingleDynamic | BindingPolicy::SingleStatic => {
                self.state.lock().bound.take().into_iter().collect()
            }
            BindingPolicy::MultipleDynamic | BindingPolicy::MultipleStaticGreedy => self.current_refs().0,
            BindingPolicy::MultipleStaticReluctant => {
                self.state.lock().reluctant.take().unwrap_or_default()
            }
        };
        for pair in held {
            pair.unget(None, &self.registry, self.consumer).await;
        }
        if let Some(tracker) = self.tracker() {
            tracker.deactivate();
        }
    }

    fn bound_service(&self, pair: &RefPair, service: ServiceObject) -> BoundService {
        BoundService {
            name: self.name.clone(),
            reference: pair.reference().clone(),
            service,
        }
    }

    async fn service_for(&self, ctx: &InstanceContext, pair: &RefPair) -> Option<ServiceObject> {
        if let Some(service) = pair.service_object(ctx.key) {
            return Some(service);
        }
        if !pair.get_service_object(ctx.key, &self.registry, self.consumer).await {
            return None;
        }
        pair.service_object(ctx.key)
    }

    async fn do_invoke_bind(&self, ctx: &InstanceContext, pair: &RefPair) -> bool {
        let Some(service) = self.service_for(ctx, pair).await else {
            return false;
        };
        let bound = self.bound_service(pair, service);
        match ctx.component().bind(&bound).await {
            Ok(outcome) => {
                if let Some(owner) = self.owner() {
                    owner.apply_outcome(outcome).await;
                }
                true
            }
            Err(err) => {
                tracing::error!(
                    reference = %self.name,
                    service_id = pair.reference().id(),
                    error = %err,
                    "bind callback returned an error"
                );
                if let Some(owner) = self.owner() {
                    owner.bind_failed(self, pair.reference(), &err);
                }
                false
            }
        }
    }

    /// Binds `pair` to the instance unless its edges are not opened yet, the
    /// change was covered by the open or it comes after the close.
    pub(crate) async fn invoke_bind_method(
        &self,
        ctx: &InstanceContext,
        pair: &RefPair,
        tracking_count: u64,
        edge: &EdgeInfo,
    ) -> bool {
        if self.locked(|_| !edge.is_open_set() || edge.out_of_range(tracking_count)) {
            tracing::trace!(reference = %self.name, tracking_count, "bind out of range");
            return true;
        }
        self.do_invoke_bind(ctx, pair).await
    }

    /// Returns `true` when the instance asked to be reactivated.
    pub(crate) async fn invoke_updated_method(
        &self,
        ctx: &InstanceContext,
        pair: &RefPair,
        tracking_count: u64,
        edge: &EdgeInfo,
    ) -> bool {
        if self.locked(|_| edge.out_of_range(tracking_count)) {
            return false;
        }
        if !edge.wait_for_open(self.latch_timeout).await {
            tracing::error!(reference = %self.name, tracking_count, "timed out waiting for dependency open");
        }
        let Some(service) = self.service_for(ctx, pair).await else {
            return false;
        };
        let bound = self.bound_service(pair, service);
        match ctx.component().updated(&bound).await {
            Ok(CallbackOutcome::Reactivate) => true,
            Ok(outcome) => {
                if let Some(owner) = self.owner() {
                    owner.apply_outcome(outcome).await;
                }
                false
            }
            Err(err) => {
                tracing::error!(reference = %self.name, error = %err, "updated callback returned an error");
                false
            }
        }
    }

    pub(crate) async fn invoke_unbind_method(
        &self,
        ctx: &InstanceContext,
        pair: &RefPair,
        tracking_count: u64,
        edge: &EdgeInfo,
    ) {
        if self.locked(|_| edge.before_range(tracking_count)) {
            tracing::trace!(reference = %self.name, tracking_count, "unbind before open");
            return;
        }
        if !edge.wait_for_open(self.latch_timeout).await {
            tracing::error!(reference = %self.name, tracking_count, "timed out waiting for dependency open");
        }
        if edge.before_range(tracking_count) {
            return;
        }
        if edge.after_range(tracking_count) {
            if !edge.wait_for_close(self.latch_timeout).await {
                tracing::error!(reference = %self.name, tracking_count, "timed out waiting for dependency close");
            }
            return;
        }
        let Some(service) = pair.service_object(ctx.key) else {
            tracing::debug!(reference = %self.name, service_id = pair.reference().id(), "nothing to unbind");
            return;
        };
        let bound = self.bound_service(pair, service);
        match ctx.component().unbind(&bound).await {
            Ok(outcome) => {
                if let Some(owner) = self.owner() {
                    owner.apply_outcome(outcome).await;
                }
            }
            Err(err) => {
                tracing::error!(reference = %self.name, error = %err, "unbind callback returned an error");
            }
        }
        if pair.is_per_instance() {
            pair.unget(Some(ctx.key), &self.registry, self.consumer).await;
        }
    }

    /// Retries a bind whose service object could not be obtained earlier.
    pub(crate) async fn invoke_bind_method_late(&self, reference: &ServiceReference, tracking_count: u64) {
        if !self.is_satisfied() {
            return;
        }
        if !self.metadata.is_multiple() {
            let (refs, _) = self.current_refs();
            match refs.first() {
                Some(first) if first.reference() == reference => {}
                _ => return,
            }
        }
        let Some(pair) = self.tracker().and_then(|t| t.get_item(reference)) else {
            return;
        };
        if let Some(owner) = self.owner() {
            owner.invoke_bind(self, &pair, tracking_count).await;
        }
    }

    /// Best bound service object for the instance `key`.
    pub(crate) async fn get_service(&self, key: u64) -> Option<ServiceObject> {
        let (refs, _) = self.current_refs();
        let pair = refs.into_iter().find(|p| !p.is_deleted())?;
        if let Some(service) = pair.service_object(key) {
            return Some(service);
        }
        if pair.get_service_object(key, &self.registry, self.consumer).await {
            pair.service_object(key)
        } else {
            None
        }
    }

    /// All bound service objects for the instance `key`, best first.
    pub(crate) async fn get_services(&self, key: u64) -> Vec<ServiceObject> {
        let (refs, _) = self.current_refs();
        let mut services = Vec::with_capacity(refs.len());
        for pair in refs.into_iter().filter(|p| !p.is_deleted()) {
            if pair.service_object(key).is_none()
                && !pair.get_service_object(key, &self.registry, self.consumer).await
            {
                continue;
            }
            if let Some(service) = pair.service_object(key) {
                services.push(service);
            }
        }
        services
    }
}

impl std::fmt::Debug for DependencyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyManager")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("min_cardinality", &self.min_cardinality())
            .field("target", &self.target())
            .finish()
    }
}
