//! Notification fan-out.
//!
//! Outbound, a producer raises one typed envelope per write: every registered
//! subscriber receives it synchronously (projected through the subscriber's own
//! projection) while the same envelope is published onto the durable queue for
//! consumers living in other processes. Inbound application lives with the
//! facade in [`inbound`].

pub mod dispatcher;
pub mod inbound;
pub mod outbox;
pub mod queue;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use models::{NotificationEnvelope, NotificationType, Projection, RequestContext};

use crate::errors::ServiceError;
use crate::observability::NOTIFICATIONS_RAISED_TOTAL;
use crate::router::{Operation, ServiceRegistry};

pub use dispatcher::Dispatcher;
pub use outbox::OutboxQueue;
pub use queue::{MemoryQueue, NotificationQueue, QueuedNotification};
pub use retry::RetryPolicy;

#[async_trait]
pub trait SubscriberCallback: Send + Sync {
    async fn notify(&self, envelope: NotificationEnvelope, ctx: &RequestContext) -> Result<(), ServiceError>;
}

/// A synchronous receiver of one producer's envelopes.
#[derive(Clone)]
pub struct Subscriber {
    pub name: String,
    pub projection: Projection,
    pub callback: Arc<dyn SubscriberCallback>,
}

/// Delivers to another service's notification endpoint through the router.
pub struct RouterSubscriber {
    registry: Arc<ServiceRegistry>,
    service: String,
}

impl RouterSubscriber {
    pub fn new(registry: Arc<ServiceRegistry>, service: impl Into<String>) -> Self {
        Self { registry, service: service.into() }
    }

    pub fn subscriber(registry: Arc<ServiceRegistry>, service: &str, projection: Projection) -> Subscriber {
        Subscriber {
            name: service.to_string(),
            projection,
            callback: Arc::new(Self::new(registry, service)),
        }
    }
}

#[async_trait]
impl SubscriberCallback for RouterSubscriber {
    async fn notify(&self, envelope: NotificationEnvelope, ctx: &RequestContext) -> Result<(), ServiceError> {
        self.registry.invoke(&self.service, Operation::Notify { envelope }, ctx).await?;
        Ok(())
    }
}

/// Producer-side fan-out for one service. The subscriber list is fixed at construction.
pub struct Notifier {
    service_name: String,
    subscribers: Vec<Subscriber>,
    queue: Option<Arc<dyn NotificationQueue>>,
}

impl Notifier {
    pub fn new(
        service_name: impl Into<String>,
        subscribers: Vec<Subscriber>,
        queue: Option<Arc<dyn NotificationQueue>>,
    ) -> Self {
        Self { service_name: service_name.into(), subscribers, queue }
    }

    /// Producer without subscribers or queue.
    pub fn silent(service_name: impl Into<String>) -> Self {
        Self::new(service_name, Vec::new(), None)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    /// Raise `kind` for `objs`. Subscribers are called in registration order;
    /// the queue publish runs concurrently with them. The first failure is
    /// returned unchanged.
    pub async fn raise(&self, kind: NotificationType, objs: &[Value], ctx: &RequestContext) -> Result<(), ServiceError> {
        if objs.is_empty() {
            return Ok(());
        }
        let envelope = NotificationEnvelope::new(self.service_name.clone(), kind, objs.to_vec());
        let fan_out = async {
            for sub in &self.subscribers {
                let projected = NotificationEnvelope::new(self.service_name.clone(), kind, sub.projection.apply_all(objs));
                debug!(producer = %self.service_name, subscriber = %sub.name, %kind, "notifying subscriber");
                sub.callback.notify(projected, ctx).await?;
            }
            Ok::<(), ServiceError>(())
        };
        let publish = async {
            match &self.queue {
                Some(queue) => queue.publish(&envelope, ctx).await,
                None => Ok(()),
            }
        };
        let (fanned, published) = tokio::join!(fan_out, publish);
        fanned?;
        published?;
        NOTIFICATIONS_RAISED_TOTAL
            .with_label_values(&[self.service_name.as_str(), kind.as_str()])
            .inc_by(objs.len() as u64);
        info!(
            event = "notification_raised",
            service = %self.service_name,
            %kind,
            count = objs.len(),
            tenant = ?ctx.tenant,
            "notification raised"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        received: Mutex<Vec<NotificationEnvelope>>,
        fail: bool,
    }

    #[async_trait]
    impl SubscriberCallback for Recording {
        async fn notify(&self, envelope: NotificationEnvelope, _ctx: &RequestContext) -> Result<(), ServiceError> {
            if self.fail {
                return Err(ServiceError::unreachable("professors", "down"));
            }
            self.received.lock().await.push(envelope);
            Ok(())
        }
    }

    fn sub(name: &str, projection: &str, cb: Arc<Recording>) -> Subscriber {
        Subscriber { name: name.into(), projection: Projection::parse(projection), callback: cb }
    }

    #[tokio::test]
    async fn subscribers_get_their_projection_and_queue_gets_everything() -> Result<(), anyhow::Error> {
        let a = Arc::new(Recording::default());
        let b = Arc::new(Recording::default());
        let queue = Arc::new(MemoryQueue::new());
        let notifier = Notifier::new(
            "school-users",
            vec![sub("professors", "name", a.clone()), sub("students", "", b.clone())],
            Some(queue.clone()),
        );
        let objs = vec![json!({"id": "u1", "name": "Ada", "status": "active"})];
        notifier.raise(NotificationType::Modified, &objs, &RequestContext::for_tenant("s1")).await?;

        let got_a = a.received.lock().await.clone();
        assert_eq!(got_a.len(), 1);
        assert_eq!(got_a[0].service_name, "school-users");
        assert_eq!(got_a[0].entries(NotificationType::Modified), &[json!({"id": "u1", "name": "Ada"})]);
        assert_eq!(b.received.lock().await[0].entries(NotificationType::Modified), objs.as_slice());

        let queued = queue.pending(10).await?;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].envelope.entries(NotificationType::Modified), objs.as_slice());
        Ok(())
    }

    #[tokio::test]
    async fn empty_raise_is_a_no_op() -> Result<(), anyhow::Error> {
        let queue = Arc::new(MemoryQueue::new());
        let notifier = Notifier::new("users", vec![], Some(queue.clone()));
        notifier.raise(NotificationType::Added, &[], &RequestContext::new()).await?;
        assert_eq!(queue.len().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn subscriber_failure_is_returned_unchanged() {
        let failing = Arc::new(Recording { fail: true, ..Default::default() });
        let notifier = Notifier::new("school-users", vec![sub("professors", "", failing)], None);
        let err = notifier
            .raise(NotificationType::Removed, &[json!({"id": "u1"})], &RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::unreachable("professors", "down"));
    }
}
