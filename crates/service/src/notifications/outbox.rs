use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use models::outbox::{self, Entity as OutboxEntity};
use models::{NotificationEnvelope, RequestContext};

use super::queue::{NotificationQueue, QueuedNotification};
use crate::errors::ServiceError;
use crate::observability::QUEUE_EVENTS_TOTAL;
use crate::store::seaorm::db_err;

/// Transactional-outbox queue over `notification_outbox`. Rows survive
/// restarts; a row is pending until delivered or dead-lettered with `last_error`.
pub struct OutboxQueue {
    db: DatabaseConnection,
}

impl OutboxQueue {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_message(row: outbox::Model) -> Result<QueuedNotification, ServiceError> {
    let envelope: NotificationEnvelope =
        serde_json::from_value(row.envelope).map_err(|e| ServiceError::Unexpected(format!("outbox row {}: {e}", row.id)))?;
    Ok(QueuedNotification {
        id: row.id,
        topic: row.topic,
        tenant: row.tenant_id,
        request_id: row.request_id,
        envelope,
        attempts: row.attempts.max(0) as u32,
        created_at: row.created_at.with_timezone(&Utc),
    })
}

#[async_trait]
impl NotificationQueue for OutboxQueue {
    fn backend(&self) -> &'static str { "outbox" }

    async fn publish(&self, envelope: &NotificationEnvelope, ctx: &RequestContext) -> Result<(), ServiceError> {
        let message = QueuedNotification::new(envelope.clone(), ctx);
        let body = serde_json::to_value(&message.envelope).map_err(|e| ServiceError::Unexpected(e.to_string()))?;
        let am = outbox::ActiveModel {
            id: Set(message.id),
            topic: Set(message.topic.clone()),
            tenant_id: Set(message.tenant),
            request_id: Set(message.request_id),
            envelope: Set(body),
            attempts: Set(0),
            last_error: Set(None),
            delivered_at: Set(None),
            created_at: Set(message.created_at.into()),
        };
        am.insert(&self.db).await.map_err(db_err)?;
        QUEUE_EVENTS_TOTAL.with_label_values(&[&message.topic, "published"]).inc();
        Ok(())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<QueuedNotification>, ServiceError> {
        let rows = OutboxEntity::find()
            .filter(outbox::Column::DeliveredAt.is_null())
            .filter(outbox::Column::LastError.is_null())
            .order_by_asc(outbox::Column::CreatedAt)
            .limit(limit as u64)
            .all(&self.db)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(to_message).collect()
    }

    async fn ack(&self, id: Uuid) -> Result<(), ServiceError> {
        OutboxEntity::update_many()
            .col_expr(outbox::Column::DeliveredAt, sea_orm::sea_query::Expr::value(Utc::now()))
            .filter(outbox::Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn fail(&self, id: Uuid, attempts: u32, error: &str) -> Result<(), ServiceError> {
        OutboxEntity::update_many()
            .col_expr(outbox::Column::Attempts, sea_orm::sea_query::Expr::value(attempts as i32))
            .col_expr(outbox::Column::LastError, sea_orm::sea_query::Expr::value(error.to_string()))
            .filter(outbox::Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
