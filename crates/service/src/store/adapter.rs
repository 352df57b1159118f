//! CRUD contract over a resolved collection handle.
//!
//! Single-entity reads and writes that miss return success with a `null`
//! value; turning that into a 404 is the facade's job.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use models::entity::{entity_id, ID_FIELD, TYPE_FIELD};
use models::{Patch, Projection, Query};

use super::Collection;
use crate::errors::{Reply, ServiceError, ServiceResult};

/// `{ serviceName, collection }`; the collection is already scoped to the tenant.
#[derive(Clone)]
pub struct StoreConfig {
    pub service_name: String,
    pub entity_type: String,
    pub collection: Arc<dyn Collection>,
}

impl StoreConfig {
    pub fn new(service_name: impl Into<String>, entity_type: impl Into<String>, collection: Arc<dyn Collection>) -> Self {
        Self { service_name: service_name.into(), entity_type: entity_type.into(), collection }
    }
}

/// List envelope: `{ data, meta: { count, limit, skip } }`.
pub fn list_value(data: Vec<Value>, count: u64, query: &Query) -> Value {
    let page = query.page.normalize();
    json!({ "data": data, "meta": { "count": count, "limit": page.limit, "skip": page.skip } })
}

pub async fn get_all(cfg: &StoreConfig, query: &Query) -> ServiceResult {
    query.validate()?;
    let (data, count) = cfg.collection.find(query).await?;
    Ok(Reply::ok(list_value(data, count, query)))
}

pub async fn get_all_count(cfg: &StoreConfig, filter: &Map<String, Value>) -> ServiceResult {
    let count = cfg.collection.count(filter).await?;
    Ok(Reply::ok(json!(count)))
}

/// Entities for `ids` that exist, in the order of `ids`, projected.
pub async fn get_all_by_ids(cfg: &StoreConfig, ids: &[String], projection: &Projection) -> ServiceResult {
    let docs = cfg.collection.find_by_ids(ids).await?;
    Ok(Reply::ok(Value::Array(projection.apply_all(&docs))))
}

pub async fn get_one(cfg: &StoreConfig, id: &str, projection: &Projection) -> ServiceResult {
    let doc = cfg.collection.find_one(id).await?;
    Ok(Reply::ok(doc.map(|d| projection.apply(&d)).unwrap_or(Value::Null)))
}

/// Create. Assigns a uuid when `id` is absent and stamps the entity type.
pub async fn post(cfg: &StoreConfig, entity: Value) -> ServiceResult {
    let Value::Object(mut map) = entity else {
        return Err(ServiceError::validation("", "entity must be an object"));
    };
    let id = match map.get(ID_FIELD) {
        None | Some(Value::Null) => Uuid::new_v4().to_string(),
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(_) => return Err(ServiceError::validation(ID_FIELD, "must be a non-empty string")),
    };
    map.insert(ID_FIELD.to_string(), Value::String(id.clone()));
    map.insert(TYPE_FIELD.to_string(), Value::String(cfg.entity_type.clone()));
    let doc = Value::Object(map);
    if !cfg.collection.insert(&id, doc.clone()).await? {
        return Err(ServiceError::validation(ID_FIELD, format!("`{id}` already exists")));
    }
    debug!(service = %cfg.service_name, %id, "document inserted");
    Ok(Reply::created(doc))
}

/// Full replacement of mutable fields; `id` and `type` are preserved.
pub async fn put(cfg: &StoreConfig, id: &str, entity: Value) -> ServiceResult {
    let Value::Object(mut map) = entity else {
        return Err(ServiceError::validation("", "entity must be an object"));
    };
    if let Some(body_id) = map.get(ID_FIELD).and_then(Value::as_str) {
        if body_id != id {
            return Err(ServiceError::validation(ID_FIELD, "does not match the addressed entity"));
        }
    }
    map.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    map.insert(TYPE_FIELD.to_string(), Value::String(cfg.entity_type.clone()));
    let doc = Value::Object(map);
    if !cfg.collection.replace(id, doc.clone()).await? {
        return Ok(Reply::ok(Value::Null));
    }
    Ok(Reply::ok(doc))
}

/// `{ set, add, remove, unset }` applied atomically by the collection.
pub async fn patch(cfg: &StoreConfig, id: &str, patch: &Patch) -> ServiceResult {
    patch.validate()?;
    let doc = cfg.collection.update(id, patch).await?;
    Ok(Reply::ok(doc.unwrap_or(Value::Null)))
}

/// Hard delete; the value is the removed entity.
pub async fn delete(cfg: &StoreConfig, id: &str) -> ServiceResult {
    let removed = cfg.collection.delete(id).await?;
    Ok(Reply::ok(removed.unwrap_or(Value::Null)))
}

/// Create-if-absent or replace, used when applying inbound notifications.
/// Replies 201 when the document was created.
pub async fn upsert(cfg: &StoreConfig, entity: Value) -> ServiceResult {
    let Some(id) = entity_id(&entity).map(str::to_string) else {
        return Err(ServiceError::validation(ID_FIELD, "is required"));
    };
    let Value::Object(mut map) = entity else {
        return Err(ServiceError::validation("", "entity must be an object"));
    };
    map.insert(TYPE_FIELD.to_string(), Value::String(cfg.entity_type.clone()));
    let doc = Value::Object(map);
    let created = cfg.collection.upsert(&id, doc.clone()).await?;
    Ok(if created { Reply::created(doc) } else { Reply::ok(doc) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCollection;

    fn cfg() -> StoreConfig {
        StoreConfig::new("professors", "professor", Arc::new(MemoryCollection::new("professors")))
    }

    #[tokio::test]
    async fn post_assigns_id_and_type() -> Result<(), anyhow::Error> {
        let cfg = cfg();
        let reply = post(&cfg, json!({"classes": []})).await?;
        assert_eq!(reply.status, 201);
        assert!(reply.value["id"].as_str().is_some_and(|s| !s.is_empty()));
        assert_eq!(reply.value["type"], "professor");
        Ok(())
    }

    #[tokio::test]
    async fn post_rejects_duplicate_id() -> Result<(), anyhow::Error> {
        let cfg = cfg();
        post(&cfg, json!({"id": "p1"})).await?;
        let err = post(&cfg, json!({"id": "p1"})).await.unwrap_err();
        assert_eq!(err.status(), 400);
        Ok(())
    }

    #[tokio::test]
    async fn missing_entities_are_null_not_errors() -> Result<(), anyhow::Error> {
        let cfg = cfg();
        assert_eq!(get_one(&cfg, "nope", &Projection::all()).await?.value, Value::Null);
        assert_eq!(put(&cfg, "nope", json!({})).await?.value, Value::Null);
        let p = Patch::from_value(json!({"set": {"a": 1}}))?;
        assert_eq!(patch(&cfg, "nope", &p).await?.value, Value::Null);
        assert_eq!(delete(&cfg, "nope").await?.value, Value::Null);
        Ok(())
    }

    #[tokio::test]
    async fn put_replaces_but_keeps_identity() -> Result<(), anyhow::Error> {
        let cfg = cfg();
        post(&cfg, json!({"id": "p1", "classes": [{"id": "c1"}], "office": "B12"})).await?;
        let reply = put(&cfg, "p1", json!({"classes": []})).await?;
        assert_eq!(reply.value, json!({"id": "p1", "type": "professor", "classes": []}));
        assert!(put(&cfg, "p1", json!({"id": "p2"})).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn list_reports_total_count_and_page() -> Result<(), anyhow::Error> {
        let cfg = cfg();
        for i in 0..5 {
            post(&cfg, json!({"id": format!("p{i}"), "active": i % 2 == 0})).await?;
        }
        let q = Query::default().with_filter("active", json!(true)).with_page(2, 0);
        let reply = get_all(&cfg, &q).await?;
        assert_eq!(reply.value["meta"], json!({"count": 3, "limit": 2, "skip": 0}));
        assert_eq!(reply.value["data"].as_array().map(Vec::len), Some(2));
        assert_eq!(get_all_count(&cfg, &q.filter).await?.value, json!(3));
        Ok(())
    }

    #[tokio::test]
    async fn by_ids_skips_unknown_and_projects() -> Result<(), anyhow::Error> {
        let cfg = cfg();
        post(&cfg, json!({"id": "p1", "name": "A", "office": "B"})).await?;
        let reply = get_all_by_ids(&cfg, &["p1".into(), "p9".into()], &Projection::parse("name")).await?;
        assert_eq!(reply.value, json!([{"id": "p1", "name": "A"}]));
        Ok(())
    }
}
