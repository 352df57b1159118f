//! Service registry / call router.
//!
//! Maps a logical service name to either an in-process handler or an HTTP
//! endpoint. Callers only see [`ServiceRegistry::invoke`] and cannot tell the
//! two transports apart: both return the same `{ status, value }` replies and
//! the same error bodies.

pub mod http;
pub mod local;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use configs::RestEndpointConfig;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use models::{NotificationEnvelope, Patch, Projection, Query, RequestContext};

use crate::errors::{ServiceError, ServiceResult};
use crate::observability::ROUTER_CALLS_TOTAL;

pub use http::HttpClient;
pub use local::InProcessClient;

/// Logical operation on a resource service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operation {
    List { query: Query },
    ReadMany { ids: Vec<String>, projection: Projection },
    Read { id: String, projection: Projection },
    Create { body: Value },
    Replace { id: String, body: Value },
    PartialUpdate { id: String, patch: Patch },
    Remove { id: String },
    Notify { envelope: NotificationEnvelope },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::List { .. } => "list",
            Self::ReadMany { .. } => "read_many",
            Self::Read { .. } => "read",
            Self::Create { .. } => "create",
            Self::Replace { .. } => "replace",
            Self::PartialUpdate { .. } => "partial_update",
            Self::Remove { .. } => "remove",
            Self::Notify { .. } => "notify",
        }
    }
}

/// The in-process side of a service: what the HTTP surface and the
/// in-process client both dispatch to.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, op: Operation, ctx: &RequestContext) -> ServiceResult;
}

/// Transport used to reach a registered service.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    fn transport(&self) -> &'static str;
    async fn call(&self, op: Operation, ctx: &RequestContext) -> ServiceResult;
}

/// Startup topology: `{ local: {name: handler}, rest: {name: endpoint} }`.
#[derive(Default)]
pub struct RegistryConfig {
    pub local: HashMap<String, Arc<dyn ServiceHandler>>,
    pub rest: HashMap<String, RestEndpointConfig>,
}

impl RegistryConfig {
    pub fn with_local(mut self, handler: Arc<dyn ServiceHandler>) -> Self {
        self.local.insert(handler.name().to_string(), handler);
        self
    }

    pub fn with_rest(mut self, name: impl Into<String>, endpoint: RestEndpointConfig) -> Self {
        self.rest.insert(name.into(), endpoint);
        self
    }
}

/// Populated once by [`ServiceRegistry::init`]; read-only afterwards.
#[derive(Default)]
pub struct ServiceRegistry {
    clients: OnceCell<HashMap<String, Arc<dyn ServiceClient>>>,
}

impl ServiceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn init(&self, config: RegistryConfig) -> Result<(), ServiceError> {
        let mut clients: HashMap<String, Arc<dyn ServiceClient>> = HashMap::new();
        for (name, handler) in config.local {
            clients.insert(name, Arc::new(InProcessClient::new(handler)));
        }
        let http = reqwest::Client::new();
        for (name, endpoint) in config.rest {
            if clients.contains_key(&name) {
                return Err(ServiceError::Unexpected(format!("service `{name}` registered both local and rest")));
            }
            let client = HttpClient::new(http.clone(), name.clone(), endpoint);
            clients.insert(name, Arc::new(client));
        }
        let names: Vec<String> = clients.keys().cloned().collect();
        self.clients
            .set(clients)
            .map_err(|_| ServiceError::Unexpected("service registry already initialized".into()))?;
        debug!(services = ?names, "service registry initialized");
        Ok(())
    }

    /// Whether `service` runs inside this process.
    pub fn is_local(&self, service: &str) -> bool {
        self.clients
            .get()
            .and_then(|c| c.get(service))
            .is_some_and(|client| client.transport() == "local")
    }

    #[instrument(skip(self, op, ctx), fields(op = op.name(), tenant = ?ctx.tenant, request_id = %ctx.request_id))]
    pub async fn invoke(&self, service: &str, op: Operation, ctx: &RequestContext) -> ServiceResult {
        let Some(client) = self.clients.get().and_then(|c| c.get(service)) else {
            warn!(%service, "call to unregistered service");
            ROUTER_CALLS_TOTAL.with_label_values(&[service, "none", "unregistered"]).inc();
            return Err(ServiceError::Downstream {
                service: service.to_string(),
                status: 502,
                message: format!("service `{service}` is not registered"),
                error: Value::String("unregistered service".into()),
            });
        };
        let result = client.call(op, ctx).await;
        let outcome = match &result {
            Ok(_) => "ok".to_string(),
            Err(e) => e.status().to_string(),
        };
        ROUTER_CALLS_TOTAL.with_label_values(&[service, client.transport(), &outcome]).inc();
        result
    }
}
