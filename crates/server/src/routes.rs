use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query as Params, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use common::types::Health;
use models::context::{REQUEST_ID_HEADER, TENANT_HEADER};
use models::{NotificationEnvelope, Patch, Projection, Query, RequestContext};
use service::errors::{Reply, ServiceError};
use service::router::{Operation, ServiceRegistry};

use crate::errors::ApiError;

/// Shared by every handler: the call router plus the services this process serves.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub local: Arc<HashSet<String>>,
}

impl AppState {
    pub fn new(registry: Arc<ServiceRegistry>, local: impl IntoIterator<Item = String>) -> Self {
        Self { registry, local: Arc::new(local.into_iter().collect()) }
    }

    /// Route `op` to `resource` when it is served by this process.
    async fn call(&self, resource: &str, op: Operation, headers: &HeaderMap) -> Result<Response, ApiError> {
        if !self.local.contains(resource) {
            return Err(ServiceError::NotFound(format!("resource `{resource}` is not served here")).into());
        }
        let reply = self.registry.invoke(resource, op, &context(headers)).await?;
        Ok(into_response(reply))
    }
}

fn context(headers: &HeaderMap) -> RequestContext {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    RequestContext::from_headers(header(TENANT_HEADER), header(REQUEST_ID_HEADER))
}

fn into_response(reply: Reply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::OK);
    (status, Json(reply.value)).into_response()
}

fn json_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|e| ServiceError::validation("", format!("invalid JSON body: {e}")).into())
}

fn projection_param(params: &HashMap<String, String>) -> Projection {
    params.get("projection").map(|p| Projection::parse(p)).unwrap_or_default()
}

pub async fn health() -> Json<Health> {
    Json(Health::ok())
}

/// `?ids=a&ids=b` reads those ids; anything else is a filtered list.
async fn list(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Params(pairs): Params<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let mut ids: Option<Vec<String>> = None;
    let mut params = HashMap::new();
    for (k, v) in pairs {
        if k == "ids" {
            let ids = ids.get_or_insert_with(Vec::new);
            if !v.is_empty() {
                ids.push(v);
            }
        } else {
            params.insert(k, v);
        }
    }
    let op = match ids {
        Some(ids) => Operation::ReadMany { ids, projection: projection_param(&params) },
        None => Operation::List { query: Query::from_params(&params)? },
    };
    state.call(&resource, op, &headers).await
}

async fn create(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let op = Operation::Create { body: json_body(&body)? };
    state.call(&resource, op, &headers).await
}

async fn read(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    Params(params): Params<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let op = Operation::Read { id, projection: projection_param(&params) };
    state.call(&resource, op, &headers).await
}

async fn replace(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let op = Operation::Replace { id, body: json_body(&body)? };
    state.call(&resource, op, &headers).await
}

async fn partial_update(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let patch = Patch::from_value(json_body(&body)?)?;
    state.call(&resource, Operation::PartialUpdate { id, patch }, &headers).await
}

async fn remove(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    state.call(&resource, Operation::Remove { id }, &headers).await
}

async fn notifications(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let envelope = NotificationEnvelope::parse(&json_body(&body)?)?;
    state.call(&resource, Operation::Notify { envelope }, &headers).await
}

/// Build the full application router: the public resource API under
/// `base_path`, the notification endpoints under `internal_path` and `/health`.
pub fn build_router(state: AppState, base_path: &str, internal_path: &str, cors: CorsLayer) -> Router {
    let api = Router::new()
        .route("/:resource", get(list).post(create))
        .route("/:resource/:id", get(read).put(replace).patch(partial_update).delete(remove));

    let internal = Router::new().route("/:resource/notifications", post(notifications));

    Router::new()
        .route("/health", get(health))
        .nest(base_path, api)
        .nest(internal_path, internal)
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO).include_headers(false))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}
