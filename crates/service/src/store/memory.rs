use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use models::query::matches_filter;
use models::{Patch, Query};

use super::{Collection, CollectionProvider};
use crate::errors::ServiceError;

/// In-process collection. Documents are kept ordered by id.
#[derive(Default)]
pub struct MemoryCollection {
    name: String,
    docs: RwLock<BTreeMap<String, Value>>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), docs: RwLock::new(BTreeMap::new()) }
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str { &self.name }

    async fn find(&self, query: &Query) -> Result<(Vec<Value>, u64), ServiceError> {
        let docs = self.docs.read().await;
        Ok(query.run(docs.values()))
    }

    async fn count(&self, filter: &Map<String, Value>) -> Result<u64, ServiceError> {
        let docs = self.docs.read().await;
        Ok(docs.values().filter(|d| matches_filter(filter, d)).count() as u64)
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Value>, ServiceError> {
        let docs = self.docs.read().await;
        Ok(ids.iter().filter_map(|id| docs.get(id).cloned()).collect())
    }

    async fn find_one(&self, id: &str) -> Result<Option<Value>, ServiceError> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn insert(&self, id: &str, doc: Value) -> Result<bool, ServiceError> {
        let mut docs = self.docs.write().await;
        if docs.contains_key(id) {
            return Ok(false);
        }
        docs.insert(id.to_string(), doc);
        Ok(true)
    }

    async fn replace(&self, id: &str, doc: Value) -> Result<bool, ServiceError> {
        let mut docs = self.docs.write().await;
        match docs.get_mut(id) {
            Some(slot) => {
                *slot = doc;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update(&self, id: &str, patch: &Patch) -> Result<Option<Value>, ServiceError> {
        let mut docs = self.docs.write().await;
        let Some(current) = docs.get(id) else { return Ok(None) };
        // apply on a copy so a failing patch leaves the stored document untouched
        let mut next = current.clone();
        patch.apply(&mut next)?;
        docs.insert(id.to_string(), next.clone());
        Ok(Some(next))
    }

    async fn upsert(&self, id: &str, doc: Value) -> Result<bool, ServiceError> {
        let mut docs = self.docs.write().await;
        Ok(docs.insert(id.to_string(), doc).is_none())
    }

    async fn delete(&self, id: &str) -> Result<Option<Value>, ServiceError> {
        Ok(self.docs.write().await.remove(id))
    }
}

/// Memory backend: one [`MemoryCollection`] per (tenant, collection), created on first use.
#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<(String, String), Arc<MemoryCollection>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl CollectionProvider for MemoryStore {
    fn collection(&self, tenant: Option<&str>, name: &str) -> Arc<dyn Collection> {
        let key = (tenant.unwrap_or_default().to_string(), name.to_string());
        let handle = self
            .collections
            .entry(key)
            .or_insert_with(|| Arc::new(MemoryCollection::new(name)))
            .clone();
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn tenants_are_isolated() -> Result<(), anyhow::Error> {
        let store = MemoryStore::new();
        let s1 = store.collection(Some("s1"), "professors");
        let s2 = store.collection(Some("s2"), "professors");
        assert!(s1.insert("p1", json!({"id": "p1"})).await?);
        assert!(s2.find_one("p1").await?.is_none());
        // same handle on repeated lookup
        assert!(store.collection(Some("s1"), "professors").find_one("p1").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn failing_patch_leaves_document_untouched() -> Result<(), anyhow::Error> {
        let c = MemoryCollection::new("professors");
        c.insert("p1", json!({"id": "p1", "classes": "not-an-array"})).await?;
        let patch = Patch::from_value(json!({"set": {"name": "x"}, "add": {"classes": ["c1"]}}))?;
        assert!(c.update("p1", &patch).await.is_err());
        assert_eq!(c.find_one("p1").await?, Some(json!({"id": "p1", "classes": "not-an-array"})));
        Ok(())
    }

    #[tokio::test]
    async fn upsert_reports_creation() -> Result<(), anyhow::Error> {
        let c = MemoryCollection::new("users");
        assert!(c.upsert("u1", json!({"id": "u1", "v": 1})).await?);
        assert!(!c.upsert("u1", json!({"id": "u1", "v": 2})).await?);
        assert_eq!(c.find_one("u1").await?.unwrap()["v"], 2);
        Ok(())
    }
}
