//! # LogWriter
//!
//! Writes every [`Event`] through `tracing`: diagnostics at `warn`, failures at
//! `error`, everything else at `info`. Install any `tracing` subscriber to see
//! the output.
//!
//! ## Example output
//! ```text
//! INFO  [enabled] component="greeter" id=Some(1)
//! INFO  [state] component="greeter" state=registered
//! INFO  [registered] component="greeter" service_id=Some(4)
//! ERROR [activation-failed] component="greeter" reason="activate callback failed: ..."
//! WARN  [lock-timeout] component="greeter" lock="state" timeout_ms=Some(5000)
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let component = e.component.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::ComponentEnabled => {
                tracing::info!("[enabled] component={component:?} id={:?}", e.component_id);
            }
            EventKind::ComponentDisabled => {
                tracing::info!("[disabled] component={component:?} id={:?}", e.component_id);
            }
            EventKind::ComponentDisposed => {
                tracing::info!("[disposed] component={component:?}");
            }
            EventKind::StateChanged => {
                let state = e.state.map(|s| s.as_str()).unwrap_or("-");
                tracing::info!("[state] component={component:?} state={state}");
            }
            EventKind::ComponentActivated => {
                tracing::info!("[activated] component={component:?} id={:?}", e.component_id);
            }
            EventKind::ComponentDeactivated => {
                tracing::info!("[deactivated] component={component:?} reason={reason}");
            }
            EventKind::ComponentReconfigured => {
                tracing::info!("[reconfigured] component={component:?} how={reason}");
            }
            EventKind::ServiceRegistered => {
                tracing::info!("[registered] component={component:?} service_id={:?}", e.service_id);
            }
            EventKind::ServiceUnregistered => {
                tracing::info!("[unregistered] component={component:?} service_id={:?}", e.service_id);
            }
            EventKind::ActivationFailed => {
                tracing::error!("[activation-failed] component={component:?} reason={reason:?}");
            }
            EventKind::BindFailed => {
                tracing::error!(
                    "[bind-failed] component={component:?} reference={:?} service_id={:?} reason={reason:?}",
                    e.reference,
                    e.service_id
                );
            }
            EventKind::LockTimeout => {
                tracing::warn!(
                    "[lock-timeout] component={component:?} lock={reason:?} timeout_ms={:?}",
                    e.timeout_ms
                );
            }
            EventKind::TrackedTimeout => {
                tracing::warn!(
                    "[tracked-timeout] component={component:?} tracking_count={reason} timeout_ms={:?}",
                    e.timeout_ms
                );
            }
            EventKind::RegistrationTimeout => {
                tracing::warn!(
                    "[registration-timeout] component={component:?} desired={reason} timeout_ms={:?}",
                    e.timeout_ms
                );
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!("[subscriber-overflow] subscriber={component} reason={reason}");
            }
            EventKind::SubscriberPanicked => {
                tracing::warn!("[subscriber-panicked] subscriber={component} info={reason}");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
