//! Background delivery of queued notifications to out-of-process consumers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::queue::{NotificationQueue, QueuedNotification};
use super::retry::RetryPolicy;
use crate::errors::ServiceError;
use crate::observability::QUEUE_EVENTS_TOTAL;
use crate::router::{Operation, ServiceRegistry};

/// Messages handled per poll.
const BATCH_SIZE: usize = 50;

pub struct Dispatcher {
    queue: Arc<dyn NotificationQueue>,
    registry: Arc<ServiceRegistry>,
    /// topic -> consuming services
    consumers: HashMap<String, Vec<String>>,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        registry: Arc<ServiceRegistry>,
        consumers: HashMap<String, Vec<String>>,
        retry: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self { queue, registry, consumers, retry, poll_interval }
    }

    /// Consumers the queue is responsible for. In-process consumers already got
    /// the envelope synchronously from the producer's subscriber list.
    fn remote_consumers(&self, topic: &str) -> Vec<&str> {
        self.consumers
            .get(topic)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .filter(|c| !self.registry.is_local(c))
            .collect()
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(backend = self.queue.backend(), interval_ms = self.poll_interval.as_millis() as u64, "notification dispatcher started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "notification dispatcher poll failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("notification dispatcher stopped");
    }

    /// Deliver one batch; returns how many messages were acknowledged.
    pub async fn run_once(&self) -> Result<usize, ServiceError> {
        let batch = self.queue.pending(BATCH_SIZE).await?;
        if !batch.is_empty() {
            debug!(count = batch.len(), "dispatching queued notifications");
        }
        let mut delivered = 0;
        for message in batch {
            match self.deliver(&message).await {
                Ok(()) => {
                    self.queue.ack(message.id).await?;
                    QUEUE_EVENTS_TOTAL.with_label_values(&[&message.topic, "delivered"]).inc();
                    delivered += 1;
                }
                Err((attempts, e)) => {
                    warn!(
                        event = "queue_delivery_failed",
                        topic = %message.topic,
                        id = %message.id,
                        attempts,
                        error = %e,
                        "giving up on queued notification"
                    );
                    QUEUE_EVENTS_TOTAL.with_label_values(&[&message.topic, "failed"]).inc();
                    self.queue.fail(message.id, message.attempts + attempts, &e.to_string()).await?;
                }
            }
        }
        Ok(delivered)
    }

    /// Every remote consumer of the topic, each with its own retry budget.
    async fn deliver(&self, message: &QueuedNotification) -> Result<(), (u32, ServiceError)> {
        let ctx = message.context();
        let mut used = 0;
        for consumer in self.remote_consumers(&message.topic) {
            let mut attempt = 0;
            loop {
                self.retry.wait_before_retry(attempt).await;
                attempt += 1;
                let op = Operation::Notify { envelope: message.envelope.clone() };
                match self.registry.invoke(consumer, op, &ctx).await {
                    Ok(_) => break,
                    Err(e) if attempt >= self.retry.max_attempts() => return Err((used + attempt, e)),
                    Err(e) => debug!(%consumer, attempt, error = %e, "delivery attempt failed"),
                }
            }
            used += attempt;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{Reply, ServiceResult};
    use crate::notifications::queue::MemoryQueue;
    use crate::router::{RegistryConfig, ServiceHandler};
    use async_trait::async_trait;
    use configs::RestEndpointConfig;
    use models::{NotificationEnvelope, NotificationType, RequestContext};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl ServiceHandler for Recorder {
        fn name(&self) -> &str { "school-users" }

        async fn handle(&self, _op: Operation, _ctx: &RequestContext) -> ServiceResult {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(Reply::ok(json!(true)))
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2))
    }

    fn envelope() -> NotificationEnvelope {
        NotificationEnvelope::new("users", NotificationType::Modified, vec![json!({"id": "u1"})])
    }

    #[tokio::test]
    async fn local_consumers_are_skipped() -> Result<(), anyhow::Error> {
        let handler = Arc::new(Recorder { seen: AtomicUsize::new(0) });
        let registry = ServiceRegistry::new();
        registry.init(RegistryConfig::default().with_local(handler.clone()))?;
        let queue = Arc::new(MemoryQueue::new());
        queue.publish(&envelope(), &RequestContext::for_tenant("s1")).await?;

        let consumers = HashMap::from([("users".to_string(), vec!["school-users".to_string()])]);
        let d = Dispatcher::new(queue.clone(), registry, consumers, policy(), Duration::from_millis(10));
        assert_eq!(d.run_once().await?, 1);
        assert_eq!(handler.seen.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_consumer_is_retried_then_dropped() -> Result<(), anyhow::Error> {
        let registry = ServiceRegistry::new();
        let endpoint = RestEndpointConfig {
            protocol: "http".into(),
            host: "127.0.0.1".into(),
            port: 1,
            path: "/api".into(),
            internal_path: "/internal".into(),
        };
        registry.init(RegistryConfig::default().with_rest("school-users", endpoint))?;
        let queue = Arc::new(MemoryQueue::new());
        queue.publish(&envelope(), &RequestContext::for_tenant("s1")).await?;

        let consumers = HashMap::from([("users".to_string(), vec!["school-users".to_string()])]);
        let d = Dispatcher::new(queue.clone(), registry, consumers, policy(), Duration::from_millis(10));
        assert_eq!(d.run_once().await?, 0);
        assert_eq!(queue.len().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn stops_on_shutdown_signal() {
        let registry = ServiceRegistry::new();
        registry.init(RegistryConfig::default()).unwrap();
        let d = Dispatcher::new(Arc::new(MemoryQueue::new()), registry, HashMap::new(), policy(), Duration::from_secs(60));
        let (tx, rx) = watch::channel(false);
        let handle = d.spawn(rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
