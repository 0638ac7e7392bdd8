//! # Example: greeter
//!
//! Two components wired through the service registry.
//!
//! Shows how to:
//! - Describe components with [`ComponentMetadata`] / [`ReferenceMetadata`].
//! - Implement [`Component`] callbacks and look up bound services.
//! - Watch lifecycle events with the built-in [`LogWriter`].
//! - Rebind a dynamic reference and reconfigure a running component.
//!
//! ## Flow
//! ```text
//! add "console" (delayed, provides Logger) ──► Registered
//! add "greeter" (immediate, needs Logger)  ──► gets Logger ──► console Active
//!                                               └─► greeter Active
//! register "shouting" Logger (ranking 10)  ──► greeter rebinds in place
//! reconfigure greeter                      ──► modified callback
//! shutdown                                 ──► everything disposed
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example greeter --features logging
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use dsvisor::{
    BoundService, CallbackOutcome, Component, ComponentContext, ComponentError, ComponentInstance,
    ComponentMetadata, Implementations, LogWriter, Properties, PropertyValue, ReferenceMetadata,
    RuntimeBuilder, RuntimeConfig, ServiceSource, State, Subscribe, SERVICE_RANKING,
};
use tracing_subscriber::EnvFilter;

/// Service interface published under the name `Logger`.
trait Logger: Send + Sync {
    fn log(&self, line: &str);
}

struct Console;

impl Logger for Console {
    fn log(&self, line: &str) {
        println!("[console] {line}");
    }
}

struct Shouting;

impl Logger for Shouting {
    fn log(&self, line: &str) {
        println!("[shouting] {}", line.to_uppercase());
    }
}

/// The `console` component: publishes an `Arc<dyn Logger>` as its service.
struct ConsoleComponent;

impl Component for ConsoleComponent {}

struct Greeter;

impl Greeter {
    async fn greet(ctx: &ComponentContext) {
        let props = ctx.properties();
        let greeting = props
            .get("greeting")
            .and_then(PropertyValue::as_str)
            .unwrap_or("hello")
            .to_string();
        let logger = ctx
            .locate_service("log")
            .await
            .and_then(|service| dsvisor::downcast::<Arc<dyn Logger>>(&service));
        match logger {
            Some(logger) => logger.log(&format!("{greeting} from {}", ctx.name())),
            None => println!("no logger bound"),
        }
    }
}

#[async_trait]
impl Component for Greeter {
    async fn activate(&self, ctx: &ComponentContext) -> Result<CallbackOutcome, ComponentError> {
        Self::greet(ctx).await;
        Ok(CallbackOutcome::Done)
    }

    async fn modified(&self, ctx: &ComponentContext) -> Result<CallbackOutcome, ComponentError> {
        Self::greet(ctx).await;
        Ok(CallbackOutcome::Done)
    }

    async fn bind(&self, service: &BoundService) -> Result<CallbackOutcome, ComponentError> {
        println!("[greeter] bound logger service {}", service.reference.id());
        Ok(CallbackOutcome::Done)
    }

    async fn unbind(&self, service: &BoundService) -> Result<CallbackOutcome, ComponentError> {
        println!("[greeter] unbound logger service {}", service.reference.id());
        Ok(CallbackOutcome::Done)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let loader = Implementations::new()
        .with("demo.Console", |_| {
            let logger: Arc<dyn Logger> = Arc::new(Console);
            Ok(ComponentInstance::with_service(Arc::new(ConsoleComponent), Arc::new(logger)))
        })
        .with("demo.Greeter", |_| Ok(ComponentInstance::new(Greeter)));

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let runtime = RuntimeBuilder::new(RuntimeConfig::default())
        .with_subscribers(subs)
        .with_loader(Arc::new(loader))
        .build();

    let console = runtime
        .add_component(ComponentMetadata::new("console", "demo.Console").provides("Logger"))
        .await?;
    println!("console: {}", console.state());

    let greeter = runtime
        .add_component(
            ComponentMetadata::new("greeter", "demo.Greeter")
                .immediate(true)
                .modified()
                .reference(ReferenceMetadata::new("log", "Logger").dynamic().greedy()),
        )
        .await?;
    println!("greeter: {}, console: {}", greeter.state(), console.state());

    // A better ranked logger replaces the bound one without reactivation.
    let shouting: Arc<dyn Logger> = Arc::new(Shouting);
    let registration = runtime.registry().register(
        &["Logger"],
        ServiceSource::object(shouting),
        Properties::new().with(SERVICE_RANKING, 10),
    )?;
    while greeter.dependencies()[0].bound_references() != [registration.reference().clone()] {
        tokio::task::yield_now().await;
    }

    greeter
        .reconfigure(Some(Properties::new().with("greeting", "good evening")))
        .await?;

    registration.unregister().await?;
    while greeter.dependencies()[0].bound_references().len() != 1
        || greeter.dependencies()[0].bound_references()[0] == *registration.reference()
    {
        tokio::task::yield_now().await;
    }
    assert_eq!(greeter.state(), State::Active);

    runtime.shutdown().await;
    println!("greeter: {}, console: {}", greeter.state(), console.state());
    Ok(())
}
