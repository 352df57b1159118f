//! Migrator registering the document store and outbox tables.
pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_entity_document;
mod m20240101_000002_create_notification_outbox;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_entity_document::Migration),
            Box::new(m20240101_000002_create_notification_outbox::Migration),
        ]
    }
}
