//! Lifecycle scenarios driven through a real runtime and registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::component::{
    BoundService, CallbackOutcome, Cardinality, Component, ComponentContext, ComponentFactoryHandle,
    ComponentInstance, ComponentMetadata, ConfigurationPolicy, DeactivationReason, Implementations,
    ReferenceMetadata, State,
};
use crate::core::{Runtime, RuntimeBuilder, RuntimeConfig};
use crate::dependency::BindingPolicy;
use crate::error::{ComponentError, RuntimeError};
use crate::events::{Event, EventKind};
use crate::registry::{
    downcast, ConsumerId, DenyList, Filter, Properties, PropertyValue, ServiceSource, COMPONENT_ID,
    COMPONENT_NAME, SERVICE_RANKING,
};
use crate::subscribers::Subscribe;

const RECORDER: &str = "test.Recorder";

#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    fn len(&self) -> usize {
        self.0.lock().len()
    }
}

struct Recorder {
    log: Log,
    bind_delay: Duration,
}

/// Service objects registered by tests are `&'static str`; component services
/// are named after their component.
fn label(service: &BoundService) -> String {
    if let Some(name) = service.downcast::<&'static str>() {
        return name.to_string();
    }
    service
        .reference
        .property(COMPONENT_NAME)
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "?".to_string())
}

#[async_trait]
impl Component for Recorder {
    async fn activate(&self, _ctx: &ComponentContext) -> Result<CallbackOutcome, ComponentError> {
        self.log.push("activate");
        Ok(CallbackOutcome::Done)
    }

    async fn deactivate(
        &self,
        _ctx: &ComponentContext,
        _reason: DeactivationReason,
    ) -> Result<CallbackOutcome, ComponentError> {
        self.log.push("deactivate");
        Ok(CallbackOutcome::Done)
    }

    async fn modified(&self, ctx: &ComponentContext) -> Result<CallbackOutcome, ComponentError> {
        let props = ctx.properties();
        let greeting = props.get("greeting").and_then(PropertyValue::as_str).unwrap_or("-");
        self.log.push(format!("modified:{greeting}"));
        Ok(CallbackOutcome::Done)
    }

    async fn bind(&self, service: &BoundService) -> Result<CallbackOutcome, ComponentError> {
        let name = label(service);
        self.log.push(format!("bind:{name}"));
        if !self.bind_delay.is_zero() {
            tokio::time::sleep(self.bind_delay).await;
            self.log.push(format!("bind-end:{name}"));
        }
        Ok(CallbackOutcome::Done)
    }

    async fn unbind(&self, service: &BoundService) -> Result<CallbackOutcome, ComponentError> {
        self.log.push(format!("unbind:{}", label(service)));
        Ok(CallbackOutcome::Done)
    }
}

fn recorder(
    log: &Log,
    bind_delay: Duration,
) -> impl Fn(&ComponentContext) -> Result<ComponentInstance, ComponentError> + Send + Sync + 'static {
    let log = log.clone();
    move |_: &ComponentContext| {
        Ok(ComponentInstance::new(Recorder {
            log: log.clone(),
            bind_delay,
        }))
    }
}

fn runtime(loader: Implementations) -> Arc<Runtime> {
    RuntimeBuilder::new(RuntimeConfig::default())
        .with_loader(Arc::new(loader))
        .build()
}

fn recording_runtime(log: &Log) -> Arc<Runtime> {
    runtime(Implementations::new().with(RECORDER, recorder(log, Duration::ZERO)))
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(check(), "condition not reached in time");
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

#[tokio::test]
async fn greedy_static_reference_rebinds_to_better_service() {
    let log = Log::default();
    let runtime = recording_runtime(&log);
    let consumer = runtime
        .add_component(
            ComponentMetadata::new("consumer", RECORDER).reference(ReferenceMetadata::new("svc", "Svc").greedy()),
        )
        .await
        .unwrap();
    assert_eq!(consumer.state(), State::Unsatisfied);

    let registry = runtime.registry();
    let _a = registry
        .register(&["Svc"], ServiceSource::object("A"), Properties::new())
        .unwrap();
    eventually(|| consumer.state() == State::Active && log.len() == 2).await;

    let b = registry
        .register(&["Svc"], ServiceSource::object("B"), Properties::new().with(SERVICE_RANKING, 10))
        .unwrap();
    eventually(|| log.len() == 6).await;

    b.unregister().await.unwrap();
    eventually(|| log.len() == 10).await;

    assert_eq!(
        log.entries(),
        [
            "bind:A",
            "activate",
            "deactivate",
            "unbind:A",
            "bind:B",
            "activate",
            "deactivate",
            "unbind:B",
            "bind:A",
            "activate"
        ]
    );
    assert_eq!(consumer.state(), State::Active);
    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disable_waits_for_in_flight_bind() {
    let log = Log::default();
    let runtime = runtime(Implementations::new().with(RECORDER, recorder(&log, Duration::from_millis(300))));
    let component = runtime
        .add_component(
            ComponentMetadata::new("slow", RECORDER).reference(
                ReferenceMetadata::new("svc", "Svc")
                    .cardinality(Cardinality::OptionalMultiple)
                    .dynamic(),
            ),
        )
        .await
        .unwrap();
    assert_eq!(component.state(), State::Active);
    assert_eq!(log.entries(), ["activate"]);

    runtime
        .registry()
        .register(&["Svc"], ServiceSource::object("A"), Properties::new())
        .unwrap();
    eventually(|| log.entries().iter().any(|e| e == "bind:A")).await;

    component.disable(false).await.unwrap();
    let entries = log.entries();
    let bind_end = entries.iter().position(|e| e == "bind-end:A").unwrap();
    let deactivate = entries.iter().position(|e| e == "deactivate").unwrap();
    assert!(bind_end < deactivate, "{entries:?}");
    assert_eq!(entries.last().map(String::as_str), Some("unbind:A"));
    assert_eq!(component.state(), State::Disabled);
    assert_eq!(component.id(), None);
    runtime.shutdown().await;
}

#[tokio::test]
async fn references_bind_best_ranked_service_first() {
    let single = Log::default();
    let multiple = Log::default();
    let runtime = runtime(
        Implementations::new()
            .with("single", recorder(&single, Duration::ZERO))
            .with("multiple", recorder(&multiple, Duration::ZERO)),
    );
    let registry = runtime.registry();
    let _a = registry
        .register(&["Svc"], ServiceSource::object("A"), Properties::new())
        .unwrap();
    let b = registry
        .register(&["Svc"], ServiceSource::object("B"), Properties::new().with(SERVICE_RANKING, 5))
        .unwrap();
    let _c = registry
        .register(&["Svc"], ServiceSource::object("C"), Properties::new().with(SERVICE_RANKING, 5))
        .unwrap();

    let one = runtime
        .add_component(ComponentMetadata::new("one", "single").reference(ReferenceMetadata::new("svc", "Svc")))
        .await
        .unwrap();
    assert_eq!(one.state(), State::Active);
    assert_eq!(single.entries(), ["bind:B", "activate"]);
    assert_eq!(one.dependencies()[0].bound_references(), [b.reference().clone()]);

    let all = runtime
        .add_component(
            ComponentMetadata::new("all", "multiple")
                .reference(ReferenceMetadata::new("svc", "Svc").cardinality(Cardinality::MandatoryMultiple)),
        )
        .await
        .unwrap();
    assert_eq!(all.state(), State::Active);
    assert_eq!(multiple.entries(), ["bind:B", "bind:C", "bind:A", "activate"]);
    runtime.shutdown().await;
}

#[tokio::test]
async fn enable_and_disable_are_idempotent() {
    let log = Log::default();
    let runtime = recording_runtime(&log);
    let component = runtime
        .add_component(ComponentMetadata::new("plain", RECORDER))
        .await
        .unwrap();
    assert_eq!(component.state(), State::Active);
    assert!(component.id().is_some());

    component.enable(false).await.unwrap();
    assert_eq!(log.entries(), ["activate"]);

    component.disable(false).await.unwrap();
    component.disable(false).await.unwrap();
    assert_eq!(component.state(), State::Disabled);
    assert_eq!(component.id(), None);
    assert_eq!(log.entries(), ["activate", "deactivate"]);

    let completion = component.enable(true).await.unwrap();
    completion.wait().await;
    assert!(completion.is_done());
    assert_eq!(component.state(), State::Active);
    assert_eq!(log.entries(), ["activate", "deactivate", "activate"]);
    runtime.shutdown().await;
}

#[tokio::test]
async fn reconfigure_calls_modified_or_reactivates() {
    let log = Log::default();
    let plain_log = Log::default();
    let runtime = runtime(
        Implementations::new()
            .with(RECORDER, recorder(&log, Duration::ZERO))
            .with("plain", recorder(&plain_log, Duration::ZERO)),
    );
    let modifiable = runtime
        .add_component(
            ComponentMetadata::new("modifiable", RECORDER)
                .property("greeting", "hello")
                .modified(),
        )
        .await
        .unwrap();
    let plain = runtime
        .add_component(ComponentMetadata::new("plain", "plain"))
        .await
        .unwrap();
    let mut rx = runtime.subscribe();

    modifiable
        .reconfigure(Some(Properties::new().with("greeting", "hi")))
        .await
        .unwrap();
    assert_eq!(log.entries(), ["activate", "modified:hi"]);
    assert_eq!(
        modifiable.properties().get("greeting").and_then(PropertyValue::as_str),
        Some("hi")
    );
    assert_eq!(modifiable.state(), State::Active);

    plain
        .reconfigure(Some(Properties::new().with("greeting", "hi")))
        .await
        .unwrap();
    assert_eq!(plain_log.entries(), ["activate", "deactivate", "activate"]);
    plain.reconfigure(None).await.unwrap();
    assert_eq!(plain.state(), State::Active);

    let reasons: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|ev| ev.kind == EventKind::ComponentReconfigured)
        .filter_map(|ev| ev.reason.map(|r| r.to_string()))
        .collect();
    assert_eq!(reasons, ["modified", "reactivated", "deleted"]);
    runtime.shutdown().await;
}

#[tokio::test]
async fn required_configuration_gates_activation() {
    let log = Log::default();
    let runtime = recording_runtime(&log);
    let component = runtime
        .add_component(
            ComponentMetadata::new("configured", RECORDER).configuration_policy(ConfigurationPolicy::Require),
        )
        .await
        .unwrap();
    assert_eq!(component.state(), State::Unsatisfied);
    assert_eq!(component.instance_count(), 0);

    component
        .reconfigure(Some(Properties::new().with("port", 8080)))
        .await
        .unwrap();
    assert_eq!(component.state(), State::Active);
    assert_eq!(
        component.properties().get("port").and_then(PropertyValue::as_long),
        Some(8080)
    );

    component.reconfigure(None).await.unwrap();
    assert_eq!(component.state(), State::Unsatisfied);
    assert_eq!(log.entries(), ["activate", "deactivate"]);
    runtime.shutdown().await;
}

#[tokio::test]
async fn component_factory_creates_and_disposes_instances() {
    let log = Log::default();
    let runtime = recording_runtime(&log);
    let factory = runtime
        .add_component(ComponentMetadata::new("maker", RECORDER).factory("demo.maker"))
        .await
        .unwrap();
    assert_eq!(factory.state(), State::Factory);
    assert!(log.entries().is_empty());

    let filter = Filter::parse("(component.factory=demo.maker)").unwrap();
    let references = runtime.registry().get_service_references(Some(&filter));
    assert_eq!(references.len(), 1);
    let handle = runtime
        .registry()
        .get_service(ConsumerId(900), &references[0])
        .await
        .and_then(|object| downcast::<ComponentFactoryHandle>(&object))
        .unwrap();
    assert_eq!(handle.factory_id().as_deref(), Some("demo.maker"));

    let instance = handle.new_instance(Properties::new().with("n", 1)).await.unwrap();
    assert_eq!(instance.state(), State::FactoryInstance);
    assert_eq!(instance.properties().get("n").and_then(PropertyValue::as_long), Some(1));
    assert_eq!(factory.factory_instances().len(), 1);

    instance.dispose(DeactivationReason::Disposed).await.unwrap();
    assert_eq!(instance.state(), State::Disposed);
    assert!(factory.factory_instances().is_empty());
    assert!(matches!(
        instance.enable(false).await,
        Err(RuntimeError::Disposed { .. })
    ));

    let second = factory.new_instance(Properties::new()).await.unwrap();
    factory.disable(false).await.unwrap();
    assert_eq!(second.state(), State::Disposed);
    assert_eq!(log.entries(), ["activate", "deactivate", "activate", "deactivate"]);

    let plain = runtime
        .add_component(ComponentMetadata::new("plain", RECORDER))
        .await
        .unwrap();
    assert!(matches!(
        plain.new_instance(Properties::new()).await,
        Err(RuntimeError::NotAFactory { .. })
    ));
    runtime.shutdown().await;
}

#[tokio::test]
async fn delayed_component_follows_service_usage() {
    let log = Log::default();
    let runtime = recording_runtime(&log);
    let service = runtime
        .add_component(ComponentMetadata::new("greeter", RECORDER).provides("Greeter"))
        .await
        .unwrap();
    assert_eq!(service.state(), State::Registered);
    assert_eq!(service.instance_count(), 0);

    let reference = service.service_reference().unwrap();
    let registry = runtime.registry();
    let first = registry.get_service(ConsumerId(901), &reference).await.unwrap();
    assert_eq!(service.state(), State::Active);
    let second = registry.get_service(ConsumerId(902), &reference).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(service.instance_count(), 1);

    registry.unget_service(ConsumerId(901), &reference).await;
    assert_eq!(service.state(), State::Active);
    registry.unget_service(ConsumerId(902), &reference).await;
    eventually(|| service.state() == State::Registered).await;
    assert_eq!(service.instance_count(), 0);
    assert_eq!(log.entries(), ["activate", "deactivate"]);
    runtime.shutdown().await;
}

#[tokio::test]
async fn circular_references_resolve_through_late_bind() {
    let a_log = Log::default();
    let b_log = Log::default();
    let runtime = runtime(
        Implementations::new()
            .with("a", recorder(&a_log, Duration::ZERO))
            .with("b", recorder(&b_log, Duration::ZERO)),
    );
    let b = runtime
        .add_component(
            ComponentMetadata::new("b", "b").provides("B").reference(
                ReferenceMetadata::new("a", "A")
                    .cardinality(Cardinality::OptionalUnary)
                    .dynamic(),
            ),
        )
        .await
        .unwrap();
    let a = runtime
        .add_component(
            ComponentMetadata::new("a", "a")
                .provides("A")
                .reference(ReferenceMetadata::new("b", "B")),
        )
        .await
        .unwrap();
    assert_eq!(a.state(), State::Registered);
    assert_eq!(b.state(), State::Registered);

    let reference = a.service_reference().unwrap();
    let service = runtime.registry().get_service(ConsumerId(903), &reference).await;
    assert!(service.is_some());
    assert_eq!(a.state(), State::Active);
    assert_eq!(b.state(), State::Active);
    assert_eq!(a_log.entries(), ["bind:b", "activate"]);

    eventually(|| b_log.entries() == ["activate", "bind:a"]).await;
    runtime.shutdown().await;
}

#[tokio::test]
async fn permissions_restrict_registration_and_binding() {
    let log = Log::default();
    let runtime = RuntimeBuilder::new(RuntimeConfig::default())
        .with_loader(Arc::new(Implementations::new().with(RECORDER, recorder(&log, Duration::ZERO))))
        .with_permissions(Arc::new(DenyList::new().deny_register("Secret").deny_get("Hidden")))
        .build();

    let secret = runtime
        .add_component(ComponentMetadata::new("secret", RECORDER).provides("Secret").immediate(true))
        .await
        .unwrap();
    assert_eq!(secret.state(), State::Unsatisfied);
    assert!(secret.service_reference().is_none());

    let _hidden_service = runtime
        .registry()
        .register(&["Hidden"], ServiceSource::object("H"), Properties::new())
        .unwrap();
    let optional = runtime
        .add_component(
            ComponentMetadata::new("optional", RECORDER)
                .reference(ReferenceMetadata::new("h", "Hidden").cardinality(Cardinality::OptionalUnary)),
        )
        .await
        .unwrap();
    assert_eq!(optional.dependencies()[0].policy(), BindingPolicy::NoPermissions);
    assert_eq!(optional.state(), State::Active);

    let mandatory = runtime
        .add_component(ComponentMetadata::new("mandatory", RECORDER).reference(ReferenceMetadata::new("h", "Hidden")))
        .await
        .unwrap();
    assert_eq!(mandatory.state(), State::Unsatisfied);
    assert_eq!(log.entries(), ["activate"]);
    runtime.shutdown().await;
}

struct Collect(Arc<Mutex<Vec<EventKind>>>);

#[async_trait]
impl Subscribe for Collect {
    async fn on_event(&self, event: &Event) {
        self.0.lock().push(event.kind);
    }
}

#[tokio::test]
async fn shutdown_disposes_components_and_flushes_subscribers() {
    let log = Log::default();
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let runtime = RuntimeBuilder::new(RuntimeConfig::default())
        .with_loader(Arc::new(Implementations::new().with(RECORDER, recorder(&log, Duration::ZERO))))
        .with_subscribers(vec![Arc::new(Collect(kinds.clone())) as Arc<dyn Subscribe>])
        .build();

    let component = runtime
        .add_component(ComponentMetadata::new("plain", RECORDER))
        .await
        .unwrap();
    assert!(matches!(
        runtime.add_component(ComponentMetadata::new("plain", RECORDER)).await,
        Err(RuntimeError::DuplicateComponent { .. })
    ));

    runtime.shutdown().await;
    assert_eq!(component.state(), State::Disposed);
    assert_eq!(log.entries(), ["activate", "deactivate"]);
    assert!(runtime.components().is_empty());

    let kinds = kinds.lock().clone();
    for expected in [
        EventKind::ComponentEnabled,
        EventKind::ComponentActivated,
        EventKind::ComponentDeactivated,
        EventKind::ComponentDisposed,
    ] {
        assert!(kinds.contains(&expected), "{expected:?} missing from {kinds:?}");
    }
    assert!(matches!(
        runtime.add_component(ComponentMetadata::new("late", RECORDER)).await,
        Err(RuntimeError::Inactive)
    ));
}

#[tokio::test]
async fn retargeting_static_reference_to_nothing_does_not_block() {
    let log = Log::default();
    let runtime = recording_runtime(&log);
    let registry = runtime.registry();
    let _red = registry
        .register(&["Svc"], ServiceSource::object("A"), Properties::new().with("color", "red"))
        .unwrap();
    let component = runtime
        .add_component(ComponentMetadata::new("colored", RECORDER).reference(ReferenceMetadata::new("svc", "Svc")))
        .await
        .unwrap();
    assert_eq!(component.dependencies()[0].policy(), BindingPolicy::SingleStatic);
    assert_eq!(component.state(), State::Active);
    let mut rx = runtime.subscribe();

    let started = tokio::time::Instant::now();
    component
        .reconfigure(Some(Properties::new().with("svc.target", "(color=blue)")))
        .await
        .unwrap();
    assert!(
        started.elapsed() < runtime.config().lock_timeout() / 2,
        "reconfigure took {:?}",
        started.elapsed()
    );
    assert_eq!(component.state(), State::Unsatisfied);
    assert_eq!(log.entries(), ["bind:A", "activate", "deactivate", "unbind:A"]);
    assert!(drain(&mut rx).iter().all(|ev| ev.kind != EventKind::LockTimeout));

    let _blue = registry
        .register(&["Svc"], ServiceSource::object("B"), Properties::new().with("color", "blue"))
        .unwrap();
    eventually(|| component.state() == State::Active).await;
    assert_eq!(log.entries()[4..], ["bind:B", "activate"]);
    runtime.shutdown().await;
}

#[tokio::test]
async fn single_dynamic_reference_follows_best_service_in_any_order() {
    let services: [(&'static str, i64); 3] = [("X", 0), ("Y", 5), ("Z", 5)];
    let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    for order in orders {
        let log = Log::default();
        let runtime = recording_runtime(&log);
        let component = runtime
            .add_component(
                ComponentMetadata::new("follower", RECORDER)
                    .reference(ReferenceMetadata::new("svc", "Svc").dynamic().greedy()),
            )
            .await
            .unwrap();
        let dm = component.dependencies()[0].clone();
        assert_eq!(dm.policy(), BindingPolicy::SingleDynamic);

        let best = |live: &[crate::registry::ServiceRegistration]| {
            live.iter()
                .map(|r| r.reference().clone())
                .max_by_key(|r| r.rank_key())
                .into_iter()
                .collect::<Vec<_>>()
        };

        let mut live = Vec::new();
        for index in order {
            let (label, ranking) = services[index];
            live.push(
                runtime
                    .registry()
                    .register(&["Svc"], ServiceSource::object(label), Properties::new().with(SERVICE_RANKING, ranking))
                    .unwrap(),
            );
            let expected = best(&live);
            eventually(|| dm.bound_references() == expected).await;
            assert_eq!(component.state(), State::Active, "order {order:?}");
        }

        while !live.is_empty() {
            let registration = live.remove(0);
            registration.unregister().await.unwrap();
            let expected = best(&live);
            eventually(|| dm.bound_references() == expected).await;
        }
        eventually(|| component.state() == State::Unsatisfied).await;
        assert_eq!(log.entries().iter().filter(|e| *e == "activate").count(), 1, "order {order:?}");
        runtime.shutdown().await;
    }
}

#[tokio::test]
async fn reluctant_multiple_reference_ignores_additions_until_a_bound_service_leaves() {
    let log = Log::default();
    let runtime = recording_runtime(&log);
    let component = runtime
        .add_component(
            ComponentMetadata::new("reluctant", RECORDER)
                .reference(ReferenceMetadata::new("svc", "Svc").cardinality(Cardinality::MandatoryMultiple)),
        )
        .await
        .unwrap();
    let dm = component.dependencies()[0].clone();
    assert_eq!(dm.policy(), BindingPolicy::MultipleStaticReluctant);
    assert_eq!(component.state(), State::Unsatisfied);

    let registry = runtime.registry();
    let a = registry
        .register(&["Svc"], ServiceSource::object("A"), Properties::new())
        .unwrap();
    eventually(|| component.state() == State::Active).await;
    assert_eq!(log.entries(), ["bind:A", "activate"]);

    let b = registry
        .register(&["Svc"], ServiceSource::object("B"), Properties::new())
        .unwrap();
    eventually(|| dm.service_count() == 2).await;
    tokio::task::yield_now().await;
    assert_eq!(log.entries(), ["bind:A", "activate"]);
    assert_eq!(dm.bound_references(), [a.reference().clone()]);

    a.unregister().await.unwrap();
    eventually(|| log.len() == 6).await;
    assert_eq!(log.entries()[2..], ["deactivate", "unbind:A", "bind:B", "activate"]);
    assert_eq!(dm.bound_references(), [b.reference().clone()]);
    assert_eq!(component.state(), State::Active);

    b.unregister().await.unwrap();
    eventually(|| component.state() == State::Unsatisfied).await;
    assert_eq!(log.entries()[6..], ["deactivate", "unbind:B"]);
    assert!(dm.bound_references().is_empty());
    runtime.shutdown().await;
}

#[tokio::test]
async fn missing_dependencies_are_dropped_with_their_service() {
    let log = Log::default();
    let runtime = recording_runtime(&log);
    let component = runtime
        .add_component(ComponentMetadata::new("needy", RECORDER).reference(ReferenceMetadata::new("other", "Other")))
        .await
        .unwrap();
    let dm = component.dependencies()[0].clone();
    let provider = runtime
        .registry()
        .register(
            &["Svc"],
            ServiceSource::object("P"),
            Properties::new().with(COMPONENT_NAME, "provider").with(COMPONENT_ID, 99u64),
        )
        .unwrap();

    runtime.register_missing(dm.clone(), provider.reference(), 1);
    assert_eq!(runtime.missing_count(), 1);

    let reference = provider.reference().clone();
    provider.unregister().await.unwrap();
    eventually(|| runtime.missing_count() == 0).await;

    // Recording after the service left keeps nothing.
    runtime.register_missing(dm, &reference, 2);
    assert_eq!(runtime.missing_count(), 0);
    runtime.shutdown().await;
}
