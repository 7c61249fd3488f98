use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use admin_service_core::events::{Notification, APPLICATION_CREATED, DOMAIN_CREATED};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Value) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// Payload was not JSON or had no `event_type` tag.
    Malformed,
    Unhandled,
    Failed,
}

impl DispatchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Handled => "handled",
            Self::Malformed => "malformed",
            Self::Unhandled => "unhandled",
            Self::Failed => "failed",
        }
    }
}

/// Routes consumed events to the handler registered for their `event_type`.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event_type`, replacing any earlier one.
    pub fn register(mut self, event_type: &str, handler: Arc<dyn EventHandler>) -> Self {
        if self.handlers.insert(event_type.to_string(), handler).is_some() {
            warn!(stage = "dispatcher", event_type, "handler replaced");
        }
        self
    }

    /// Dispatcher wired with the built-in `domain_created` and
    /// `application_created` handlers.
    pub fn with_default_handlers() -> Self {
        let logger: Arc<dyn EventHandler> = Arc::new(CreatedEventLogger);
        Self::new()
            .register(DOMAIN_CREATED, logger.clone())
            .register(APPLICATION_CREATED, logger)
    }

    pub async fn dispatch_bytes(&self, payload: &[u8]) -> DispatchOutcome {
        match serde_json::from_slice::<Value>(payload) {
            Ok(event) => self.dispatch(&event).await,
            Err(err) => {
                warn!(stage = "dispatcher", error = %err, size = payload.len(), "skipping malformed message");
                record("unknown", DispatchOutcome::Malformed)
            }
        }
    }

    /// Handler failures are logged and reported in the outcome, never raised.
    pub async fn dispatch(&self, event: &Value) -> DispatchOutcome {
        let Some(event_type) = event.get("event_type").and_then(Value::as_str) else {
            warn!(stage = "dispatcher", "event has no event_type");
            return record("unknown", DispatchOutcome::Malformed);
        };
        let Some(handler) = self.handlers.get(event_type) else {
            warn!(stage = "dispatcher", event_type, "no handler registered");
            return record("unknown", DispatchOutcome::Unhandled);
        };

        match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
            Ok(Ok(())) => {
                debug!(stage = "dispatcher", event_type, "event handled");
                record(known_label(event_type), DispatchOutcome::Handled)
            }
            Ok(Err(err)) => {
                warn!(stage = "dispatcher", event_type, error = %err, "event handler failed");
                record(known_label(event_type), DispatchOutcome::Failed)
            }
            Err(_) => {
                warn!(stage = "dispatcher", event_type, "event handler panicked");
                record(known_label(event_type), DispatchOutcome::Failed)
            }
        }
    }
}

fn known_label(event_type: &str) -> &'static str {
    match event_type {
        DOMAIN_CREATED => DOMAIN_CREATED,
        APPLICATION_CREATED => APPLICATION_CREATED,
        _ => "other",
    }
}

fn record(event: &'static str, outcome: DispatchOutcome) -> DispatchOutcome {
    counter!("events_dispatched_total", "event" => event, "result" => outcome.as_str())
        .increment(1);
    outcome
}

/// Logs entity-created notifications.
struct CreatedEventLogger;

#[async_trait]
impl EventHandler for CreatedEventLogger {
    async fn handle(&self, event: &Value) -> Result<(), HandlerError> {
        match Notification::deserialize(event)? {
            Notification::DomainCreated {
                domain_id,
                domain_name,
            } => {
                info!(stage = "dispatcher", domain_id, domain_name = %domain_name, "domain created event received");
            }
            Notification::ApplicationCreated {
                application_id,
                application_name,
                domain_id,
            } => {
                info!(
                    stage = "dispatcher",
                    application_id,
                    application_name = %application_name,
                    domain_id,
                    "application created event received"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _event: &Value) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl EventHandler for Broken {
        async fn handle(&self, _event: &Value) -> Result<(), HandlerError> {
            Err(HandlerError::Failed("boom".into()))
        }
    }

    #[tokio::test]
    async fn routes_by_event_type() {
        let counting = Arc::new(Counting::default());
        let dispatcher = Dispatcher::new().register("domain_created", counting.clone());

        let outcome = dispatcher
            .dispatch(&json!({"event_type": "domain_created", "domain_id": 1, "domain_name": "billing"}))
            .await;

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_or_unknown_type_is_dropped() {
        let dispatcher = Dispatcher::with_default_handlers();

        assert_eq!(
            dispatcher.dispatch(&json!({"domain_id": 1})).await,
            DispatchOutcome::Malformed
        );
        assert_eq!(
            dispatcher.dispatch(&json!({"event_type": "domain_deleted"})).await,
            DispatchOutcome::Unhandled
        );
        assert_eq!(
            dispatcher.dispatch_bytes(b"not json").await,
            DispatchOutcome::Malformed
        );
    }

    #[tokio::test]
    async fn handler_failure_is_contained() {
        let dispatcher = Dispatcher::new().register("domain_created", Arc::new(Broken));
        let outcome = dispatcher
            .dispatch(&json!({"event_type": "domain_created"}))
            .await;
        assert_eq!(outcome, DispatchOutcome::Failed);
    }

    struct Panicking;

    #[async_trait]
    impl EventHandler for Panicking {
        async fn handle(&self, _event: &Value) -> Result<(), HandlerError> {
            panic!("handler bug");
        }
    }

    #[tokio::test]
    async fn panicking_handler_is_reported_as_failed() {
        let counting = Arc::new(Counting::default());
        let dispatcher = Dispatcher::new()
            .register("domain_created", Arc::new(Panicking))
            .register("application_created", counting.clone());

        let outcome = dispatcher
            .dispatch(&json!({"event_type": "domain_created"}))
            .await;
        assert_eq!(outcome, DispatchOutcome::Failed);

        let outcome = dispatcher
            .dispatch(&json!({"event_type": "application_created"}))
            .await;
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn default_handlers_accept_created_events() {
        let dispatcher = Dispatcher::with_default_handlers();

        let domain = json!({"event_type": "domain_created", "domain_id": 1, "domain_name": "billing"});
        let application = json!({
            "event_type": "application_created",
            "application_id": 4,
            "application_name": "invoice-svc",
            "domain_id": 1
        });
        assert_eq!(dispatcher.dispatch(&domain).await, DispatchOutcome::Handled);
        assert_eq!(dispatcher.dispatch(&application).await, DispatchOutcome::Handled);

        let truncated = json!({"event_type": "domain_created"});
        assert_eq!(dispatcher.dispatch(&truncated).await, DispatchOutcome::Failed);
    }

    #[tokio::test]
    async fn later_registration_replaces_handler() {
        let first = Arc::new(Counting::default());
        let second = Arc::new(Counting::default());
        let dispatcher = Dispatcher::new()
            .register("domain_created", first.clone())
            .register("domain_created", second.clone());

        dispatcher
            .dispatch(&json!({"event_type": "domain_created"}))
            .await;

        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }
}
