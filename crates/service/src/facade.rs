//! Generic service facade.
//!
//! Every resource service is an [`EntityService`] driven by an
//! [`EntityDefinition`]. Writes run the same lifecycle: tenant precondition,
//! schema validation, reference resolution, pre-persist hook, persistence,
//! domain event log, notification raise, response projection. The first
//! failing step ends the call with its error; nothing is rolled back.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, instrument};
use uuid::Uuid;

use models::context::TENANT_HEADER;
use models::entity::{entity_id, merge_snapshot, ID_FIELD};
use models::{NotificationType, Patch, Projection, Query, ReferenceDeclaration, ReferenceKey, RequestContext};

use crate::errors::{Reply, ServiceError, ServiceResult};
use crate::notifications::Notifier;
use crate::references::populate_references;
use crate::router::{Operation, ServiceHandler, ServiceRegistry};
use crate::schema::Schema;
use crate::store::{adapter, CollectionProvider, StoreConfig};

/// What a consumer does with its copy when the source entity is removed.
#[derive(Clone, Debug, PartialEq)]
pub enum RemovalPolicy {
    Delete,
    /// Keep the copy and set `field` to `value` instead.
    Disable { field: String, value: Value },
}

/// Synchronous subscription to another service's notifications.
#[derive(Clone, Debug, PartialEq)]
pub struct Subscription {
    pub source: String,
    pub projection: Projection,
}

/// Static description of one resource type plus its lifecycle hooks.
pub trait EntityDefinition: Send + Sync {
    fn service_name(&self) -> &str;
    fn entity_type(&self) -> &str;
    fn schema(&self) -> &Schema;

    fn collection(&self) -> &str {
        self.service_name()
    }

    fn tenant_scoped(&self) -> bool {
        true
    }

    /// Denormalized copies are maintained only by notifications.
    fn writable(&self) -> bool {
        true
    }

    fn references(&self) -> Vec<ReferenceDeclaration> {
        Vec::new()
    }

    /// Derived fields, defaults.
    fn before_persist(&self, _entity: &mut Value) {}

    fn notification_projection(&self) -> Projection {
        Projection::all()
    }

    /// Used when the caller does not ask for a projection.
    fn response_projection(&self) -> Projection {
        Projection::all()
    }

    /// Never returned nor notified. Keys starting with `_` are always hidden.
    fn storage_only_fields(&self) -> &[&str] {
        &[]
    }

    fn removal_policy(&self) -> RemovalPolicy {
        RemovalPolicy::Delete
    }

    /// By default every single-valued reference subscribes to its target.
    fn subscriptions(&self) -> Vec<Subscription> {
        self.references()
            .into_iter()
            .filter(|r| !r.is_array)
            .map(|r| Subscription { source: r.target_service, projection: r.projection })
            .collect()
    }

    /// Tenants an inbound foreign entity is copied into. `None` is the global partition.
    fn target_tenants(
        &self,
        _source: &str,
        _foreign: &Value,
        ctx: &RequestContext,
    ) -> Result<Vec<Option<String>>, ServiceError> {
        if !self.tenant_scoped() {
            return Ok(vec![None]);
        }
        match ctx.tenant() {
            Some(t) => Ok(vec![Some(t.to_string())]),
            None => Err(ServiceError::Precondition(format!(
                "`{}` notifications require the {TENANT_HEADER} header",
                self.service_name()
            ))),
        }
    }

    /// Map a foreign entity onto the local copy; `None` leaves the store untouched.
    ///
    /// When a reference points at `source`, only existing records are
    /// refreshed: the foreign snapshot replaces the reference field. Otherwise
    /// the entity itself is a copy and is created or merged.
    fn absorb(&self, source: &str, existing: Option<&Value>, foreign: &Value, _ctx: &RequestContext) -> Option<Value> {
        let references = self.references();
        let Some(decl) = references.iter().find(|r| r.target_service == source) else {
            return Some(match existing {
                Some(current) => merge_snapshot(current, foreign),
                None => foreign.clone(),
            });
        };
        debug_assert!(!decl.is_array);
        let mut local = existing?.clone();
        local.as_object_mut()?.insert(decl.field.clone(), decl.projection.apply(foreign));
        Some(local)
    }

    /// Notifications a write raises, in order, one envelope each.
    fn plan_notifications(&self, before: Option<&Value>, after: Option<&Value>) -> Vec<(NotificationType, Value)> {
        match (before, after) {
            (None, Some(a)) => vec![(NotificationType::Added, a.clone())],
            (Some(b), Some(a)) if b != a => vec![(NotificationType::Modified, a.clone())],
            (Some(b), None) => vec![(NotificationType::Removed, b.clone())],
            _ => Vec::new(),
        }
    }
}

pub struct EntityService {
    pub(crate) def: Arc<dyn EntityDefinition>,
    pub(crate) store: Arc<dyn CollectionProvider>,
    pub(crate) registry: Arc<ServiceRegistry>,
    pub(crate) notifier: Notifier,
}

impl EntityService {
    pub fn new(
        def: Arc<dyn EntityDefinition>,
        store: Arc<dyn CollectionProvider>,
        registry: Arc<ServiceRegistry>,
        notifier: Notifier,
    ) -> Self {
        Self { def, store, registry, notifier }
    }

    pub fn definition(&self) -> &dyn EntityDefinition {
        self.def.as_ref()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn scope<'a>(&self, ctx: &'a RequestContext) -> Result<Option<&'a str>, ServiceError> {
        if !self.def.tenant_scoped() {
            return Ok(None);
        }
        ctx.tenant().map(Some).ok_or_else(|| {
            ServiceError::Precondition(format!("`{}` requires the {TENANT_HEADER} header", self.def.service_name()))
        })
    }

    fn ensure_writable(&self) -> Result<(), ServiceError> {
        if self.def.writable() {
            return Ok(());
        }
        Err(ServiceError::Precondition(format!(
            "`{}` is maintained from notifications and cannot be written directly",
            self.def.service_name()
        )))
    }

    pub(crate) fn store_config(&self, tenant: Option<&str>) -> StoreConfig {
        StoreConfig::new(
            self.def.service_name(),
            self.def.entity_type(),
            self.store.collection(tenant, self.def.collection()),
        )
    }

    /// With `skip_references`, reference fields are left for after resolution.
    fn validate(&self, entity: &Value, skip_references: bool) -> Result<(), ServiceError> {
        let references = self.def.references();
        let skip: Vec<&str> = if skip_references {
            references.iter().map(|r| r.field.as_str()).collect()
        } else {
            Vec::new()
        };
        let errors = self.def.schema().validate(entity, &skip);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::validation_many(&errors))
        }
    }

    pub(crate) async fn resolve(&self, objs: &mut [&mut Value], ctx: &RequestContext) -> Result<(), ServiceError> {
        let references = self.def.references();
        if references.is_empty() {
            return Ok(());
        }
        populate_references(&self.registry, &references, objs, ctx).await
    }

    pub(crate) fn strip_storage(&self, doc: &Value) -> Value {
        let Value::Object(map) = doc else { return doc.clone() };
        let hidden = self.def.storage_only_fields();
        Value::Object(
            map.iter()
                .filter(|(k, _)| !k.starts_with('_') && !hidden.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    fn respond(&self, doc: &Value, requested: &Projection) -> Value {
        let projection = if requested.is_all() { self.def.response_projection() } else { requested.clone() };
        projection.apply(&self.strip_storage(doc))
    }

    /// Raise `kind` for already persisted documents, through the notification projection.
    pub(crate) async fn raise(&self, kind: NotificationType, docs: &[Value], ctx: &RequestContext) -> Result<(), ServiceError> {
        let projection = self.def.notification_projection();
        let objs: Vec<Value> = docs.iter().map(|d| projection.apply(&self.strip_storage(d))).collect();
        self.notifier.raise(kind, &objs, ctx).await
    }

    async fn raise_planned(&self, before: Option<&Value>, after: Option<&Value>, ctx: &RequestContext) -> Result<(), ServiceError> {
        for (kind, entity) in self.def.plan_notifications(before, after) {
            self.raise(kind, std::slice::from_ref(&entity), ctx).await?;
        }
        Ok(())
    }

    fn not_found(&self, id: &str) -> ServiceError {
        ServiceError::not_found(self.def.entity_type(), id)
    }

    pub async fn list(&self, mut query: Query, ctx: &RequestContext) -> ServiceResult {
        let tenant = self.scope(ctx)?;
        let requested = std::mem::take(&mut query.projection);
        let mut reply = adapter::get_all(&self.store_config(tenant), &query).await?;
        if let Some(Value::Array(items)) = reply.value.get_mut("data") {
            for item in items.iter_mut() {
                *item = self.respond(item, &requested);
            }
        }
        Ok(reply)
    }

    pub async fn read(&self, id: &str, projection: &Projection, ctx: &RequestContext) -> ServiceResult {
        let tenant = self.scope(ctx)?;
        let reply = adapter::get_one(&self.store_config(tenant), id, &Projection::all()).await?;
        if reply.value.is_null() {
            return Err(self.not_found(id));
        }
        Ok(Reply::ok(self.respond(&reply.value, projection)))
    }

    pub async fn read_many(&self, ids: &[String], projection: &Projection, ctx: &RequestContext) -> ServiceResult {
        let tenant = self.scope(ctx)?;
        let reply = adapter::get_all_by_ids(&self.store_config(tenant), ids, &Projection::all()).await?;
        let items: Vec<Value> = reply
            .value
            .as_array()
            .map(|docs| docs.iter().map(|d| self.respond(d, projection)).collect())
            .unwrap_or_default();
        Ok(Reply::ok(Value::Array(items)))
    }

    #[instrument(skip_all, fields(service = %self.def.service_name(), tenant = ?ctx.tenant))]
    pub async fn create(&self, body: Value, ctx: &RequestContext) -> ServiceResult {
        let tenant = self.scope(ctx)?;
        self.ensure_writable()?;
        let mut entity = body;
        self.validate(&entity, true)?;
        if let Value::Object(map) = &mut entity {
            if map.get(ID_FIELD).map_or(true, Value::is_null) {
                map.insert(ID_FIELD.to_string(), Value::String(Uuid::new_v4().to_string()));
            }
        }
        self.resolve(&mut [&mut entity], ctx).await?;
        self.validate(&entity, false)?;
        self.def.before_persist(&mut entity);

        let reply = adapter::post(&self.store_config(tenant), entity).await?;
        info!(event = "entity_created", service = %self.def.service_name(), id = ?entity_id(&reply.value), tenant = ?tenant);
        self.raise_planned(None, Some(&reply.value), ctx).await?;
        Ok(Reply { status: reply.status, value: self.respond(&reply.value, &Projection::all()) })
    }

    #[instrument(skip_all, fields(service = %self.def.service_name(), tenant = ?ctx.tenant, id = %id))]
    pub async fn replace(&self, id: &str, body: Value, ctx: &RequestContext) -> ServiceResult {
        let tenant = self.scope(ctx)?;
        self.ensure_writable()?;
        let mut entity = body;
        self.validate(&entity, true)?;
        let cfg = self.store_config(tenant);
        let before = cfg.collection.find_one(id).await?.ok_or_else(|| self.not_found(id))?;
        if let Value::Object(map) = &mut entity {
            map.entry(ID_FIELD.to_string()).or_insert_with(|| Value::String(id.to_string()));
        }
        self.resolve(&mut [&mut entity], ctx).await?;
        self.validate(&entity, false)?;
        self.def.before_persist(&mut entity);

        let reply = adapter::put(&cfg, id, entity).await?;
        if reply.value.is_null() {
            return Err(self.not_found(id));
        }
        info!(event = "entity_updated", service = %self.def.service_name(), %id, tenant = ?tenant, op = "put");
        self.raise_planned(Some(&before), Some(&reply.value), ctx).await?;
        Ok(Reply::ok(self.respond(&reply.value, &Projection::all())))
    }

    #[instrument(skip_all, fields(service = %self.def.service_name(), tenant = ?ctx.tenant, id = %id))]
    pub async fn update(&self, id: &str, patch: Patch, ctx: &RequestContext) -> ServiceResult {
        let tenant = self.scope(ctx)?;
        self.ensure_writable()?;
        patch.validate()?;
        let cfg = self.store_config(tenant);
        let before = cfg.collection.find_one(id).await?.ok_or_else(|| self.not_found(id))?;
        let mut candidate = before.clone();
        patch.apply(&mut candidate)?;
        self.validate(&candidate, true)?;

        let mut patch = patch;
        self.resolve_patch(id, &mut patch, ctx).await?;
        let mut candidate = before.clone();
        patch.apply(&mut candidate)?;
        self.validate(&candidate, false)?;
        let mut transformed = candidate.clone();
        self.def.before_persist(&mut transformed);
        carry_derived(&candidate, &transformed, &mut patch);

        let reply = adapter::patch(&cfg, id, &patch).await?;
        if reply.value.is_null() {
            return Err(self.not_found(id));
        }
        info!(event = "entity_updated", service = %self.def.service_name(), %id, tenant = ?tenant, op = "patch");
        self.raise_planned(Some(&before), Some(&reply.value), ctx).await?;
        Ok(Reply::ok(self.respond(&reply.value, &Projection::all())))
    }

    /// Resolve references named in `set` and `add` together. Self-keyed
    /// references are always refreshed.
    async fn resolve_patch(&self, id: &str, patch: &mut Patch, ctx: &RequestContext) -> Result<(), ServiceError> {
        let references = self.def.references();
        if references.is_empty() {
            return Ok(());
        }
        let mut set = patch.set.take().unwrap_or_default();
        for decl in references.iter().filter(|r| r.key == ReferenceKey::OwnId) {
            set.entry(decl.field.clone()).or_insert_with(|| json!({ "id": id }));
        }
        let mut set = Value::Object(set);
        let mut add = Value::Object(patch.add.take().unwrap_or_default());
        populate_references(&self.registry, &references, &mut [&mut set, &mut add], ctx).await?;
        patch.set = non_empty(set);
        patch.add = non_empty(add);
        Ok(())
    }

    #[instrument(skip_all, fields(service = %self.def.service_name(), tenant = ?ctx.tenant, id = %id))]
    pub async fn remove(&self, id: &str, ctx: &RequestContext) -> ServiceResult {
        let tenant = self.scope(ctx)?;
        self.ensure_writable()?;
        let reply = adapter::delete(&self.store_config(tenant), id).await?;
        if reply.value.is_null() {
            return Err(self.not_found(id));
        }
        info!(event = "entity_deleted", service = %self.def.service_name(), %id, tenant = ?tenant);
        self.raise_planned(Some(&reply.value), None, ctx).await?;
        Ok(Reply::ok(self.respond(&reply.value, &Projection::all())))
    }
}

fn non_empty(section: Value) -> Option<Map<String, Value>> {
    match section {
        Value::Object(map) if !map.is_empty() => Some(map),
        _ => None,
    }
}

/// Fields the pre-persist hook changed travel with the patch.
fn carry_derived(candidate: &Value, transformed: &Value, patch: &mut Patch) {
    let (Value::Object(old), Value::Object(new)) = (candidate, transformed) else { return };
    for (key, value) in new {
        if old.get(key) != Some(value) {
            patch.set.get_or_insert_with(Map::new).insert(key.clone(), value.clone());
        }
    }
    for key in old.keys().filter(|k| !new.contains_key(*k)) {
        patch.unset.get_or_insert_with(Vec::new).push(key.clone());
    }
}

#[async_trait]
impl ServiceHandler for EntityService {
    fn name(&self) -> &str {
        self.def.service_name()
    }

    async fn handle(&self, op: Operation, ctx: &RequestContext) -> ServiceResult {
        match op {
            Operation::List { query } => self.list(query, ctx).await,
            Operation::ReadMany { ids, projection } => self.read_many(&ids, &projection, ctx).await,
            Operation::Read { id, projection } => self.read(&id, &projection, ctx).await,
            Operation::Create { body } => self.create(body, ctx).await,
            Operation::Replace { id, body } => self.replace(&id, body, ctx).await,
            Operation::PartialUpdate { id, patch } => self.update(&id, patch, ctx).await,
            Operation::Remove { id } => self.remove(&id, ctx).await,
            Operation::Notify { envelope } => self.notification(envelope, ctx).await,
        }
    }
}
