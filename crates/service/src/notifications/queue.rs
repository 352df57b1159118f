//! Durable notification queue.
//!
//! Delivery is at-least-once with no ordering guarantee across messages:
//! a message is only acknowledged after every consumer accepted it, and a
//! consumer may see the same envelope again after a partial failure.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use models::{NotificationEnvelope, RequestContext};

use crate::errors::ServiceError;
use crate::observability::QUEUE_EVENTS_TOTAL;

/// One published envelope; the topic is the producing service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedNotification {
    pub id: Uuid,
    pub topic: String,
    pub tenant: Option<String>,
    pub request_id: String,
    pub envelope: NotificationEnvelope,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl QueuedNotification {
    pub fn new(envelope: NotificationEnvelope, ctx: &RequestContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: envelope.service_name.clone(),
            tenant: ctx.tenant.clone(),
            request_id: ctx.request_id.clone(),
            envelope,
            attempts: 0,
            created_at: Utc::now(),
        }
    }

    /// Context the consumers are called with: the producer's tenant and request id.
    pub fn context(&self) -> RequestContext {
        RequestContext { tenant: self.tenant.clone(), request_id: self.request_id.clone() }
    }
}

#[async_trait]
pub trait NotificationQueue: Send + Sync {
    fn backend(&self) -> &'static str;
    async fn publish(&self, envelope: &NotificationEnvelope, ctx: &RequestContext) -> Result<(), ServiceError>;
    /// Up to `limit` undelivered messages, oldest first.
    async fn pending(&self, limit: usize) -> Result<Vec<QueuedNotification>, ServiceError>;
    async fn ack(&self, id: Uuid) -> Result<(), ServiceError>;
    /// Give up on a message after its retries ran out.
    async fn fail(&self, id: Uuid, attempts: u32, error: &str) -> Result<(), ServiceError>;
}

/// Process-local queue; contents are lost on restart.
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<VecDeque<QueuedNotification>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }
}

#[async_trait]
impl NotificationQueue for MemoryQueue {
    fn backend(&self) -> &'static str { "memory" }

    async fn publish(&self, envelope: &NotificationEnvelope, ctx: &RequestContext) -> Result<(), ServiceError> {
        let message = QueuedNotification::new(envelope.clone(), ctx);
        QUEUE_EVENTS_TOTAL.with_label_values(&[&message.topic, "published"]).inc();
        self.messages.lock().await.push_back(message);
        Ok(())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<QueuedNotification>, ServiceError> {
        Ok(self.messages.lock().await.iter().take(limit).cloned().collect())
    }

    async fn ack(&self, id: Uuid) -> Result<(), ServiceError> {
        self.messages.lock().await.retain(|m| m.id != id);
        Ok(())
    }

    async fn fail(&self, id: Uuid, attempts: u32, error: &str) -> Result<(), ServiceError> {
        let mut messages = self.messages.lock().await;
        if let Some(pos) = messages.iter().position(|m| m.id == id) {
            if let Some(dropped) = messages.remove(pos) {
                warn!(event = "queue_dead_letter", topic = %dropped.topic, %id, attempts, error, "dropping undeliverable notification");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::NotificationType;
    use serde_json::json;

    #[tokio::test]
    async fn publish_pending_ack() -> Result<(), anyhow::Error> {
        let q = MemoryQueue::new();
        let ctx = RequestContext::for_tenant("s1");
        for id in ["a", "b", "c"] {
            let env = NotificationEnvelope::new("users", NotificationType::Added, vec![json!({"id": id})]);
            q.publish(&env, &ctx).await?;
        }
        let pending = q.pending(2).await?;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].topic, "users");
        assert_eq!(pending[0].context().tenant(), Some("s1"));
        assert_eq!(pending[0].envelope.entries(NotificationType::Added)[0]["id"], "a");

        q.ack(pending[0].id).await?;
        q.fail(pending[1].id, 3, "consumer down").await?;
        assert_eq!(q.len().await, 1);
        Ok(())
    }
}
