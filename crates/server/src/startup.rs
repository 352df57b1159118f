use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use configs::{AppConfig, QueueBackend, StorageBackend};
use dotenvy::dotenv;
use sea_orm::DatabaseConnection;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use common::admin_http::spawn_admin_server;
use common::utils::logging::init_logging_from_env;
use service::notifications::{Dispatcher, MemoryQueue, NotificationQueue, OutboxQueue, RetryPolicy};
use service::observability::encode_metrics;
use service::resources::build_local_services;
use service::router::{RegistryConfig, ServiceRegistry};
use service::store::{CollectionProvider, MemoryStore, SeaOrmStore};

use crate::errors::StartupError;
use crate::routes::{self, AppState};

/// A wired process: the HTTP router, the registry behind it and the queue
/// dispatcher when some consumer lives in another process.
pub struct App {
    pub router: Router,
    pub registry: Arc<ServiceRegistry>,
    pub dispatcher: Option<Dispatcher>,
}

fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

async fn connect(cfg: &AppConfig) -> Result<Option<DatabaseConnection>, StartupError> {
    if cfg.storage.backend != StorageBackend::Postgres && cfg.queue.backend != QueueBackend::Outbox {
        return Ok(None);
    }
    let db = models::db::connect_with_config(&cfg.database)
        .await
        .map_err(|e| StartupError::Storage(e.to_string()))?;
    Ok(Some(db))
}

/// Wire storage, queue, local services and remote endpoints from `cfg`.
pub async fn build_app(cfg: &AppConfig) -> Result<App, StartupError> {
    let db = connect(cfg).await?;
    let store: Arc<dyn CollectionProvider> = match (cfg.storage.backend, &db) {
        (StorageBackend::Postgres, Some(db)) => SeaOrmStore::new(db.clone()),
        (StorageBackend::Postgres, None) => return Err(StartupError::Storage("no database connection".into())),
        (StorageBackend::Memory, _) => MemoryStore::new(),
    };

    let local = &cfg.services.local;
    let queued = cfg
        .queue
        .consumers
        .values()
        .flatten()
        .any(|consumer| !local.contains(consumer));
    let queue: Option<Arc<dyn NotificationQueue>> = match (queued, cfg.queue.backend, &db) {
        (false, _, _) => None,
        (true, QueueBackend::Memory, _) => Some(Arc::new(MemoryQueue::new()) as Arc<dyn NotificationQueue>),
        (true, QueueBackend::Outbox, Some(db)) => Some(Arc::new(OutboxQueue::new(db.clone())) as Arc<dyn NotificationQueue>),
        (true, QueueBackend::Outbox, None) => return Err(StartupError::Storage("no database connection".into())),
    };

    let registry = ServiceRegistry::new();
    let services = build_local_services(local, store, &registry, queue.clone(), &cfg.queue.consumers)?;
    let mut topology = RegistryConfig::default();
    for service in services {
        topology = topology.with_local(service);
    }
    for (name, endpoint) in &cfg.services.rest {
        topology = topology.with_rest(name.clone(), endpoint.clone());
    }
    registry.init(topology)?;

    let dispatcher = queue.map(|queue| {
        Dispatcher::new(
            queue,
            Arc::clone(&registry),
            cfg.queue.consumers.clone(),
            RetryPolicy::from(&cfg.queue.retry),
            Duration::from_millis(cfg.queue.poll_interval_ms),
        )
    });

    let state = AppState::new(Arc::clone(&registry), local.iter().cloned());
    let router = routes::build_router(state, &cfg.server.base_path, &cfg.server.internal_path, build_cors());
    info!(local = ?local, rest = ?cfg.services.rest.keys().collect::<Vec<_>>(), queued, "application wired");
    Ok(App { router, registry, dispatcher })
}

fn load_config() -> Result<AppConfig, StartupError> {
    AppConfig::load_and_validate().map_err(|e| StartupError::InvalidConfig(e.to_string()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Public entry: build the app and run the HTTP server until ctrl-c.
pub async fn run() -> Result<(), StartupError> {
    dotenv().ok();
    init_logging_from_env();

    let cfg = load_config()?;
    let app = build_app(&cfg).await?;

    if let Some(admin_addr) = &cfg.server.admin_addr {
        spawn_admin_server(admin_addr, encode_metrics);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = app.dispatcher.map(|d| d.spawn(shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .map_err(|e| StartupError::InvalidConfig(format!("server address: {e}")))?;
    info!(%addr, base_path = %cfg.server.base_path, "starting server");
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(anyhow::Error::from)?;
    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(anyhow::Error::from)?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = dispatcher {
        if let Err(e) = handle.await {
            warn!(error = %e, "dispatcher task ended abnormally");
        }
    }
    info!("server stopped");
    Ok(())
}
