//! Create `notification_outbox` table.
//! Pending rows (`delivered_at IS NULL`) are picked up by the queue dispatcher.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(NotificationOutbox::Table)
                    .if_not_exists()
                    .col(uuid(NotificationOutbox::Id).primary_key())
                    .col(string_len(NotificationOutbox::Topic, 64))
                    .col(string_len_null(NotificationOutbox::TenantId, 128))
                    .col(string_len(NotificationOutbox::RequestId, 64))
                    .col(json_binary(NotificationOutbox::Envelope))
                    .col(integer(NotificationOutbox::Attempts).default(0))
                    .col(text_null(NotificationOutbox::LastError))
                    .col(timestamp_with_time_zone_null(NotificationOutbox::DeliveredAt))
                    .col(timestamp_with_time_zone(NotificationOutbox::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notification_outbox_pending")
                    .table(NotificationOutbox::Table)
                    .col(NotificationOutbox::DeliveredAt)
                    .col(NotificationOutbox::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(NotificationOutbox::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum NotificationOutbox {
    Table,
    Id,
    Topic,
    TenantId,
    RequestId,
    Envelope,
    Attempts,
    LastError,
    DeliveredAt,
    CreatedAt,
}
