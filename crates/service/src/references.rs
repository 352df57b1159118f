//! Reference resolution and keyed deltas.
//!
//! Resolution gathers every foreign id a reference field names across all the
//! input objects, fetches them with one call per field through the router and
//! writes the projected snapshots back in place.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use models::entity::{element_key, entity_id, merge_snapshot};
use models::{ReferenceDeclaration, ReferenceKey, RequestContext};

use crate::errors::ServiceError;
use crate::router::{Operation, ServiceRegistry};

/// Foreign ids named by `decl` in one object, in field order.
fn referenced_ids(decl: &ReferenceDeclaration, obj: &Value) -> Vec<String> {
    let field = obj.get(&decl.field);
    if decl.key == ReferenceKey::OwnId {
        let own = entity_id(obj).or_else(|| field.and_then(element_key));
        return own.map(|id| vec![id.to_string()]).unwrap_or_default();
    }
    match field {
        Some(Value::Array(items)) => items.iter().filter_map(element_key).map(str::to_string).collect(),
        Some(value) => element_key(value).map(|id| vec![id.to_string()]).unwrap_or_default(),
        None => Vec::new(),
    }
}

async fn fetch_snapshots(
    registry: &ServiceRegistry,
    decl: &ReferenceDeclaration,
    ids: Vec<String>,
    ctx: &RequestContext,
) -> Result<HashMap<String, Value>, ServiceError> {
    let snapshots: Vec<Value> = if !decl.is_array && ids.len() == 1 {
        let op = Operation::Read { id: ids[0].clone(), projection: decl.projection.clone() };
        match registry.invoke(&decl.target_service, op, ctx).await {
            Ok(reply) if reply.value.is_null() => Vec::new(),
            Ok(reply) => vec![reply.value],
            Err(ServiceError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        }
    } else {
        let op = Operation::ReadMany { ids, projection: decl.projection.clone() };
        let reply = registry.invoke(&decl.target_service, op, ctx).await?;
        match reply.value {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    };
    Ok(snapshots
        .into_iter()
        .filter_map(|s| entity_id(&s).map(str::to_string).map(|id| (id, s)))
        .collect())
}

/// Embed fresh snapshots for every declared reference.
///
/// A single-valued reference that cannot be found is removed from the object,
/// leaving schema validation to reject it when it is required. Array elements
/// that cannot be found are dropped; the ones kept are merged over the caller's
/// element so per-link data survives. Any failing lookup aborts before anything
/// is written.
pub async fn populate_references(
    registry: &ServiceRegistry,
    references: &[ReferenceDeclaration],
    objs: &mut [&mut Value],
    ctx: &RequestContext,
) -> Result<(), ServiceError> {
    let mut resolved: Vec<(usize, HashMap<String, Value>)> = Vec::new();
    for (i, decl) in references.iter().enumerate() {
        let mut seen = HashSet::new();
        let ids: Vec<String> = objs
            .iter()
            .flat_map(|obj| referenced_ids(decl, &**obj))
            .filter(|id| seen.insert(id.clone()))
            .collect();
        if ids.is_empty() {
            continue;
        }
        debug!(field = %decl.field, target = %decl.target_service, count = ids.len(), "resolving references");
        resolved.push((i, fetch_snapshots(registry, decl, ids, ctx).await?));
    }

    for (i, snapshots) in resolved {
        let decl = &references[i];
        for obj in objs.iter_mut() {
            let ids = referenced_ids(decl, &**obj);
            if ids.is_empty() {
                continue;
            }
            let Value::Object(map) = &mut **obj else { continue };
            if decl.is_array {
                let current = map.get(&decl.field).and_then(Value::as_array).cloned().unwrap_or_default();
                let items: Vec<Value> = current
                    .iter()
                    .filter_map(|item| {
                        let snapshot = snapshots.get(element_key(item)?)?;
                        Some(merge_snapshot(item, snapshot))
                    })
                    .collect();
                map.insert(decl.field.clone(), Value::Array(items));
            } else {
                match snapshots.get(&ids[0]) {
                    Some(snapshot) => {
                        map.insert(decl.field.clone(), snapshot.clone());
                    }
                    None => {
                        map.remove(&decl.field);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Keyed difference between two versions of an array-valued reference.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Delta {
    /// Keys only in the new version, with the new value.
    pub added: Vec<Value>,
    /// Keys in both versions whose value changed, with the new value.
    pub modified: Vec<Value>,
    /// Keys only in the old version, with the old value.
    pub removed: Vec<Value>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Compare `before` and `after` by element key, never by position.
pub fn diff_keyed(before: &[Value], after: &[Value]) -> Delta {
    let old: HashMap<&str, &Value> = before.iter().filter_map(|v| element_key(v).map(|k| (k, v))).collect();
    let new_keys: HashSet<&str> = after.iter().filter_map(element_key).collect();
    let mut delta = Delta::default();
    for item in after {
        let Some(key) = element_key(item) else { continue };
        match old.get(key) {
            None => delta.added.push(item.clone()),
            Some(prev) if *prev != item => delta.modified.push(item.clone()),
            Some(_) => {}
        }
    }
    for item in before {
        if let Some(key) = element_key(item) {
            if !new_keys.contains(key) {
                delta.removed.push(item.clone());
            }
        }
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{Reply, ServiceResult};
    use crate::router::{RegistryConfig, ServiceHandler};
    use async_trait::async_trait;
    use models::Projection;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Directory {
        name: &'static str,
        entries: Vec<Value>,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ServiceHandler for Directory {
        fn name(&self) -> &str { self.name }

        async fn handle(&self, op: Operation, _ctx: &RequestContext) -> ServiceResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ServiceError::Unexpected("directory offline".into()));
            }
            let find = |id: &str| self.entries.iter().find(|e| e["id"] == id).cloned();
            match op {
                Operation::Read { id, projection } => match find(id.as_str()) {
                    Some(e) => Ok(Reply::ok(projection.apply(&e))),
                    None => Err(ServiceError::not_found(self.name, &id)),
                },
                Operation::ReadMany { ids, projection } => {
                    let found: Vec<Value> = ids.iter().filter_map(|id| find(id.as_str())).collect();
                    Ok(Reply::ok(Value::Array(projection.apply_all(&found))))
                }
                other => Err(ServiceError::Unexpected(format!("unsupported {}", other.name()))),
            }
        }
    }

    fn registry(dir: Arc<Directory>) -> Arc<ServiceRegistry> {
        let registry = ServiceRegistry::new();
        registry.init(RegistryConfig::default().with_local(dir)).unwrap();
        registry
    }

    fn schools(fail: bool) -> Arc<Directory> {
        Arc::new(Directory {
            name: "schools",
            entries: vec![
                json!({"id": "s1", "name": "North", "city": "Oslo"}),
                json!({"id": "s2", "name": "South", "city": "Rome"}),
            ],
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn one_call_per_field_across_all_objects() {
        let dir = schools(false);
        let reg = registry(dir.clone());
        let decl = vec![ReferenceDeclaration::many("schools", "schools").with_projection(Projection::parse("name"))];
        let mut a = json!({"schools": [{"id": "s1", "roles": ["admin"]}, {"id": "s9"}]});
        let mut b = json!({"schools": ["s2", "s1"]});
        populate_references(&reg, &decl, &mut [&mut a, &mut b], &RequestContext::new()).await.unwrap();

        assert_eq!(dir.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a["schools"], json!([{"id": "s1", "name": "North", "roles": ["admin"]}]));
        assert_eq!(b["schools"], json!([{"id": "s2", "name": "South"}, {"id": "s1", "name": "North"}]));
    }

    #[tokio::test]
    async fn scalar_reference_is_replaced_or_dropped() {
        let reg = registry(schools(false));
        let decl = vec![ReferenceDeclaration::one("school", "schools")];
        let mut found = json!({"school": "s1"});
        populate_references(&reg, &decl, &mut [&mut found], &RequestContext::new()).await.unwrap();
        assert_eq!(found["school"]["city"], "Oslo");

        let mut missing = json!({"school": {"id": "s9"}});
        populate_references(&reg, &decl, &mut [&mut missing], &RequestContext::new()).await.unwrap();
        assert!(missing.get("school").is_none());
    }

    #[tokio::test]
    async fn own_id_key_uses_the_entity_id() {
        let reg = registry(schools(false));
        let decl = vec![ReferenceDeclaration::one("home", "schools").keyed_by_own_id()];
        let mut obj = json!({"id": "s2"});
        populate_references(&reg, &decl, &mut [&mut obj], &RequestContext::new()).await.unwrap();
        assert_eq!(obj["home"]["name"], "South");
    }

    #[tokio::test]
    async fn failed_lookup_aborts_without_writes() {
        let reg = registry(schools(true));
        let decl = vec![ReferenceDeclaration::many("schools", "schools")];
        let mut obj = json!({"schools": [{"id": "s1"}]});
        let before = obj.clone();
        let err = populate_references(&reg, &decl, &mut [&mut obj], &RequestContext::new()).await.unwrap_err();
        assert_eq!(err.status(), 500);
        assert_eq!(obj, before);
    }

    #[tokio::test]
    async fn unregistered_target_is_502() {
        let reg = registry(schools(false));
        let decl = vec![ReferenceDeclaration::one("user", "users")];
        let mut obj = json!({"user": "u1"});
        let err = populate_references(&reg, &decl, &mut [&mut obj], &RequestContext::new()).await.unwrap_err();
        assert_eq!(err.status(), 502);
    }

    #[test]
    fn diff_is_key_based() {
        let before = vec![json!({"id": "s1", "roles": ["teacher", "admin"]}), json!({"id": "s2", "roles": []}), json!({"id": "s3"})];
        let after = vec![json!({"id": "s3"}), json!({"id": "s1", "roles": ["teacher"]}), json!({"id": "s4"})];
        let delta = diff_keyed(&before, &after);
        assert_eq!(delta.added, vec![json!({"id": "s4"})]);
        assert_eq!(delta.modified, vec![json!({"id": "s1", "roles": ["teacher"]})]);
        assert_eq!(delta.removed, vec![json!({"id": "s2", "roles": []})]);
    }

    #[test]
    fn identical_versions_produce_empty_delta() {
        let v = vec![json!({"id": "s1"}), json!({"id": "s2"})];
        let reordered = vec![json!({"id": "s2"}), json!({"id": "s1"})];
        assert!(diff_keyed(&v, &reordered).is_empty());
    }
}
