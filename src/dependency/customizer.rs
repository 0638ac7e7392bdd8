//! Tracker callbacks of a dependency, dispatched per binding policy.

use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::dependency::{BindingPolicy, DependencyManager, RefPair};
use crate::registry::ServiceReference;
use crate::tracker::TrackerCustomizer;

pub(crate) struct DependencyCustomizer {
    dm: Weak<DependencyManager>,
}

impl DependencyCustomizer {
    pub(crate) fn new(dm: Weak<DependencyManager>) -> Self {
        Self { dm }
    }
}

#[async_trait]
impl TrackerCustomizer for DependencyCustomizer {
    type Item = Arc<RefPair>;

    async fn adding(&self, reference: &ServiceReference) -> Option<Arc<RefPair>> {
        self.dm.upgrade()?.on_adding(reference)
    }

    async fn added(
        &self,
        reference: &ServiceReference,
        pair: &Arc<RefPair>,
        tracking_count: u64,
        service_count: usize,
    ) {
        if let Some(dm) = self.dm.upgrade() {
            dm.on_added(reference, pair, tracking_count, service_count).await;
        }
    }

    async fn modified(&self, _reference: &ServiceReference, pair: &Arc<RefPair>, tracking_count: u64) {
        if let Some(dm) = self.dm.upgrade() {
            dm.on_modified(pair, tracking_count).await;
        }
    }

    async fn removed(&self, _reference: &ServiceReference, pair: &Arc<RefPair>, tracking_count: u64) {
        if let Some(dm) = self.dm.upgrade() {
            dm.on_removed(pair, tracking_count).await;
        }
    }
}

impl DependencyManager {
    fn on_adding(&self, reference: &ServiceReference) -> Option<Arc<RefPair>> {
        match self.policy {
            BindingPolicy::NoPermissions => None,
            BindingPolicy::SingleDynamic | BindingPolicy::MultipleDynamic => {
                let previous = self.state.lock().previous.get(reference).cloned();
                Some(previous.unwrap_or_else(|| self.new_ref_pair(reference)))
            }
            _ => Some(self.new_ref_pair(reference)),
        }
    }

    fn is_bound(&self, pair: &Arc<RefPair>) -> bool {
        self.state
            .lock()
            .bound
            .as_ref()
            .is_some_and(|bound| Arc::ptr_eq(bound, pair))
    }

    fn in_reluctant_set(&self, pair: &Arc<RefPair>) -> bool {
        self.state
            .lock()
            .reluctant
            .as_ref()
            .is_some_and(|refs| refs.iter().any(|p| Arc::ptr_eq(p, pair)))
    }

    /// Consumes the pair from the previous tracker's leftovers; `true` when the
    /// service is new to this dependency.
    fn take_previous(&self, reference: &ServiceReference) -> bool {
        self.state.lock().previous.remove(reference).is_none()
    }

    fn better_than_bound(&self, pair: &RefPair) -> bool {
        let bound = self.state.lock().bound.clone();
        match bound {
            None => true,
            Some(bound) => {
                !self.metadata.is_reluctant()
                    && pair.reference().rank_key() > bound.reference().rank_key()
            }
        }
    }

    async fn on_added(
        &self,
        reference: &ServiceReference,
        pair: &Arc<RefPair>,
        tracking_count: u64,
        service_count: usize,
    ) {
        let Some(owner) = self.owner() else {
            return;
        };
        let activates = self.tracker_opened() && self.cardinality_just_satisfied(service_count);
        match self.policy {
            BindingPolicy::NoPermissions => {}
            BindingPolicy::Factory => {
                owner.tracked(tracking_count);
                if activates {
                    owner.activate().await;
                }
            }
            BindingPolicy::MultipleDynamic => {
                if self.take_previous(reference) {
                    if self.is_active() {
                        owner.invoke_bind(self, pair, tracking_count).await;
                        if pair.is_failed() {
                            self.register_missing(reference, tracking_count);
                        }
                    } else if activates {
                        owner.tracked(tracking_count);
                        owner.activate().await;
                        return;
                    }
                }
                owner.tracked(tracking_count);
            }
            BindingPolicy::MultipleStaticGreedy => {
                owner.tracked(tracking_count);
                if self.is_active() {
                    tracing::debug!(reference = %self.name(), service_id = reference.id(), "greedy rebind");
                    owner.deactivate_for_reference().await;
                    owner.activate().await;
                } else if activates {
                    owner.activate().await;
                }
            }
            BindingPolicy::MultipleStaticReluctant => {
                owner.tracked(tracking_count);
                if !self.is_active() && activates {
                    owner.activate().await;
                }
            }
            BindingPolicy::SingleDynamic => {
                let mut reported = false;
                if self.take_previous(reference) {
                    if self.is_active() {
                        if self.better_than_bound(pair) {
                            let current = self.state.lock().bound.clone();
                            owner.invoke_bind(self, pair, tracking_count).await;
                            if !pair.is_failed() {
                                if let Some(old) = current {
                                    owner.invoke_unbind(self, &old, tracking_count).await;
                                    old.unget(None, &self.registry, self.consumer).await;
                                }
                                self.state.lock().bound = Some(pair.clone());
                            } else {
                                if self.cardinality_satisfied(0) {
                                    self.register_missing(reference, tracking_count);
                                }
                                let mut state = self.state.lock();
                                if state.bound.is_none() {
                                    state.bound = Some(pair.clone());
                                }
                            }
                        }
                    } else if activates {
                        self.state.lock().tracking_count = tracking_count;
                        owner.tracked(tracking_count);
                        reported = true;
                        owner.activate().await;
                    }
                }
                if !reported {
                    self.state.lock().tracking_count = tracking_count;
                    owner.tracked(tracking_count);
                }
            }
            BindingPolicy::SingleStatic => {
                self.state.lock().tracking_count = tracking_count;
                owner.tracked(tracking_count);
                if self.is_active() {
                    if self.better_than_bound(pair) {
                        owner.deactivate_for_reference().await;
                        owner.activate().await;
                    } else {
                        tracing::trace!(
                            reference = %self.name(),
                            service_id = reference.id(),
                            "ignoring added service, reference already bound"
                        );
                    }
                } else if activates {
                    owner.activate().await;
                }
            }
        }
    }

    async fn on_modified(&self, pair: &Arc<RefPair>, tracking_count: u64) {
        let Some(owner) = self.owner() else {
            return;
        };
        let notify = self.is_active()
            && match self.policy {
                BindingPolicy::NoPermissions | BindingPolicy::Factory => false,
                BindingPolicy::SingleDynamic | BindingPolicy::SingleStatic => self.is_bound(pair),
                BindingPolicy::MultipleStaticReluctant => self.in_reluctant_set(pair),
                BindingPolicy::MultipleDynamic | BindingPolicy::MultipleStaticGreedy => true,
            };
        let reactivate = notify && owner.invoke_updated(self, pair, tracking_count).await;
        if self.policy.is_single() {
            self.state.lock().tracking_count = tracking_count;
        }
        owner.tracked(tracking_count);
        if reactivate && self.metadata.is_static() {
            owner.deactivate_for_reference().await;
            owner.activate().await;
        }
    }

    async fn on_removed(&self, pair: &Arc<RefPair>, tracking_count: u64) {
        let Some(owner) = self.owner() else {
            return;
        };
        if self.policy == BindingPolicy::NoPermissions {
            return;
        }
        pair.mark_deleted();
        // Removed before it was ever reported as added.
        if tracking_count == 0 {
            pair.unget(None, &self.registry, self.consumer).await;
            return;
        }
        let active = self.is_active();
        let satisfied = self.cardinality_satisfied(self.service_count());
        match self.policy {
            BindingPolicy::NoPermissions => {}
            BindingPolicy::Factory => {
                owner.tracked(tracking_count);
                if !satisfied {
                    owner.deactivate_for_reference().await;
                }
            }
            BindingPolicy::MultipleDynamic => {
                if satisfied {
                    if active {
                        owner.invoke_unbind(self, pair, tracking_count).await;
                    }
                    owner.tracked(tracking_count);
                } else {
                    self.state.lock().last_removed = Some((pair.clone(), tracking_count));
                    owner.tracked(tracking_count);
                    owner.deactivate_for_reference().await;
                    self.state.lock().last_removed = None;
                }
                pair.unget(None, &self.registry, self.consumer).await;
            }
            BindingPolicy::MultipleStaticGreedy => {
                owner.tracked(tracking_count);
                if active {
                    owner.deactivate_for_reference().await;
                    owner.activate().await;
                } else if !satisfied {
                    owner.deactivate_for_reference().await;
                }
                pair.unget(None, &self.registry, self.consumer).await;
            }
            BindingPolicy::MultipleStaticReluctant => {
                owner.tracked(tracking_count);
                if active {
                    if self.in_reluctant_set(pair) {
                        owner.deactivate_for_reference().await;
                        owner.activate().await;
                    }
                } else if !satisfied {
                    owner.deactivate_for_reference().await;
                }
                pair.unget(None, &self.registry, self.consumer).await;
            }
            BindingPolicy::SingleDynamic => self.single_dynamic_removed(pair, tracking_count, active).await,
            BindingPolicy::SingleStatic => {
                self.state.lock().tracking_count = tracking_count;
                owner.tracked(tracking_count);
                let bound = self.is_bound(pair);
                let reactivate = (active && bound) || !satisfied;
                if reactivate {
                    owner.deactivate_for_reference().await;
                    {
                        let mut state = self.state.lock();
                        if state.bound.as_ref().is_some_and(|b| Arc::ptr_eq(b, pair)) {
                            state.bound = None;
                        }
                    }
                    owner.activate().await;
                } else if bound {
                    self.state.lock().bound = None;
                    pair.unget(None, &self.registry, self.consumer).await;
                }
            }
        }
    }

    /// Rebinds in place to the next best service, or deactivates when the
    /// reference becomes unsatisfied.
    async fn single_dynamic_removed(&self, pair: &Arc<RefPair>, tracking_count: u64, active: bool) {
        let Some(owner) = self.owner() else {
            return;
        };
        let bound = self.is_bound(pair);
        let has_bound = self.state.lock().bound.is_some();
        let mut next = None;
        let mut old = None;
        let mut deactivate = false;
        if bound && active {
            if let Some(tracker) = self.tracker() {
                if !tracker.is_empty() {
                    next = tracker.get_tracked(Some(true)).0.into_iter().next().map(|(_, p)| p);
                }
            }
            if self.min_cardinality() == 0 || next.is_some() {
                old = self.state.lock().bound.take();
            } else {
                deactivate = true;
            }
        } else if !self.is_satisfied() && !has_bound {
            deactivate = true;
        }

        if let Some(next) = &next {
            owner.invoke_bind(self, next, tracking_count).await;
        }
        let reported = if let Some(old) = &old {
            self.state.lock().tracking_count = tracking_count;
            owner.invoke_unbind(self, old, tracking_count).await;
            self.state.lock().bound = next.clone();
            owner.tracked(tracking_count);
            true
        } else if deactivate {
            self.state.lock().tracking_count = tracking_count;
            owner.tracked(tracking_count);
            owner.deactivate_for_reference().await;
            true
        } else {
            false
        };
        if let Some(old) = old {
            old.unget(None, &self.registry, self.consumer).await;
        }
        if !reported {
            owner.tracked(tracking_count);
        }
    }
}
