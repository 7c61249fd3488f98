use std::{sync::Arc, time::Duration};

use metrics::counter;
use tracing::{info, warn};

use admin_service_bus::MessageBus;
use admin_service_core::{
    events::Notification,
    types::{Application, Domain, DomainId},
};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort publisher of entity-created notifications. Failures are
/// logged and never reach the caller.
#[derive(Clone)]
pub struct Notifier {
    bus: Arc<dyn MessageBus>,
    publish_timeout: Duration,
}

impl Notifier {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            publish_timeout: PUBLISH_TIMEOUT,
        }
    }

    pub async fn domain_created(&self, domain: &Domain) {
        self.publish(Notification::DomainCreated {
            domain_id: domain.id,
            domain_name: domain.domain_name.clone(),
        })
        .await;
    }

    pub async fn application_created(&self, application: &Application, domain_id: DomainId) {
        self.publish(Notification::ApplicationCreated {
            application_id: application.id,
            application_name: application.application_name.clone(),
            domain_id,
        })
        .await;
    }

    async fn publish(&self, notification: Notification) {
        let event = notification.event_type();
        let topic = notification.topic();
        let key = notification.key();

        let payload = match notification.to_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(stage = "notifier", event, error = %err, "failed to encode notification");
                counter!("notifications_published_total", "event" => event, "result" => "error")
                    .increment(1);
                return;
            }
        };

        let result = tokio::time::timeout(
            self.publish_timeout,
            self.bus.publish(topic, &key, payload),
        )
        .await;
        let outcome = match result {
            Ok(Ok(receipt)) => {
                info!(
                    stage = "notifier",
                    event,
                    topic,
                    key = %key,
                    offset = receipt.offset,
                    "notification published"
                );
                "ok"
            }
            Ok(Err(err)) => {
                warn!(stage = "notifier", event, topic, key = %key, error = %err, "notification publish failed");
                "error"
            }
            Err(_) => {
                warn!(stage = "notifier", event, topic, key = %key, "notification publish timed out");
                "timeout"
            }
        };
        counter!("notifications_published_total", "event" => event, "result" => outcome)
            .increment(1);
    }
}
