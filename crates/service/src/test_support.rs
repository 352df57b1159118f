#![cfg(test)]
use std::collections::HashMap;
use std::sync::Arc;

use migration::MigratorTrait;
use sea_orm::DatabaseConnection;
use tokio::sync::OnceCell;

use models::db::connect_from_env;

use crate::resources::{build_local_services, catalog};
use crate::router::{RegistryConfig, ServiceRegistry};
use crate::store::{CollectionProvider, MemoryStore};

// Ensure migrations run only once across the entire test process
static MIGRATED: OnceCell<()> = OnceCell::const_new();

pub async fn get_db() -> Result<DatabaseConnection, anyhow::Error> {
    MIGRATED
        .get_or_init(|| async {
            let db = connect_from_env().await.expect("connect db for migration");
            migration::Migrator::up(&db, None).await.expect("migrate up");
            drop(db);
        })
        .await;

    // Fresh connection for the current test's runtime
    connect_from_env().await
}

/// Every resource service in one process over the memory store.
pub struct Monolith {
    pub registry: Arc<ServiceRegistry>,
    pub store: Arc<MemoryStore>,
}

pub fn monolith() -> Monolith {
    let registry = ServiceRegistry::new();
    let store = MemoryStore::new();
    let local: Vec<String> = catalog().iter().map(|d| d.service_name().to_string()).collect();
    let provider: Arc<dyn CollectionProvider> = store.clone();
    let services = build_local_services(&local, provider, &registry, None, &HashMap::new()).expect("build services");
    let mut config = RegistryConfig::default();
    for service in services {
        config = config.with_local(service);
    }
    registry.init(config).expect("init registry");
    Monolith { registry, store }
}
