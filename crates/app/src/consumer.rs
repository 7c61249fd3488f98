use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use admin_service_bus::{BusError, MessageBus, Subscription};

use crate::dispatcher::{DispatchOutcome, Dispatcher};

const POLL_TIMEOUT: Duration = Duration::from_millis(1000);
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Background task feeding one topic into the shared dispatcher.
pub struct EventConsumer {
    bus: Arc<dyn MessageBus>,
    topic: String,
    dispatcher: Arc<Dispatcher>,
    poll_timeout: Duration,
    retry_delay: Duration,
}

impl EventConsumer {
    pub fn new(bus: Arc<dyn MessageBus>, topic: &str, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            bus,
            topic: topic.to_string(),
            dispatcher,
            poll_timeout: POLL_TIMEOUT,
            retry_delay: RETRY_DELAY,
        }
    }

    #[cfg(test)]
    pub fn with_timings(mut self, poll_timeout: Duration, retry_delay: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self.retry_delay = retry_delay;
        self
    }

    /// Subscribes before returning so nothing published afterwards is missed,
    /// then runs the poll loop in the background until the bus closes.
    pub async fn start(self) -> Result<JoinHandle<()>, BusError> {
        let subscription = self.bus.subscribe(&self.topic).await?;
        info!(stage = "consumer", topic = %self.topic, "consumer started");
        Ok(tokio::spawn(async move {
            self.run_loop(subscription).await;
        }))
    }

    async fn run_loop(self, mut subscription: Box<dyn Subscription>) {
        loop {
            match subscription.poll(self.poll_timeout).await {
                Ok(batch) => {
                    for message in batch {
                        let outcome = self.dispatcher.dispatch_bytes(&message.payload).await;
                        debug!(
                            stage = "consumer",
                            topic = %self.topic,
                            key = %message.key,
                            message_id = %message.id,
                            outcome = outcome.as_str(),
                            "message consumed"
                        );
                        if outcome == DispatchOutcome::Malformed {
                            warn!(stage = "consumer", topic = %self.topic, key = %message.key, "skipped malformed message");
                        }
                    }
                }
                Err(err) if err.is_transient() => {
                    warn!(stage = "consumer", topic = %self.topic, error = %err, "poll failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(_) => break,
            }
        }
        info!(stage = "consumer", topic = %self.topic, "consumer stopped");
    }
}
