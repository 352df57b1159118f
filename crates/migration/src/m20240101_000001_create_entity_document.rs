//! Create `entity_document` table.
//! Every resource collection lives here, partitioned by tenant and collection name.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EntityDocument::Table)
                    .if_not_exists()
                    .col(string_len(EntityDocument::TenantId, 128))
                    .col(string_len(EntityDocument::Collection, 64))
                    .col(string_len(EntityDocument::Id, 128))
                    .col(json_binary(EntityDocument::Body))
                    .col(timestamp_with_time_zone(EntityDocument::CreatedAt))
                    .col(timestamp_with_time_zone(EntityDocument::UpdatedAt))
                    .primary_key(
                        Index::create()
                            .col(EntityDocument::TenantId)
                            .col(EntityDocument::Collection)
                            .col(EntityDocument::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // List queries always scan one tenant's collection
        manager
            .create_index(
                Index::create()
                    .name("idx_entity_document_scope")
                    .table(EntityDocument::Table)
                    .col(EntityDocument::TenantId)
                    .col(EntityDocument::Collection)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(EntityDocument::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum EntityDocument {
    Table,
    TenantId,
    Collection,
    Id,
    Body,
    CreatedAt,
    UpdatedAt,
}
