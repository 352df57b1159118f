//! Generic entity store adapter.
//!
//! Storage is a set of per-tenant document collections behind the
//! [`Collection`] trait. The adapter functions in [`adapter`] put the CRUD
//! contract on top: ids, entity type stamping, patch semantics and the uniform
//! `{ status, value }` result.

pub mod adapter;
pub mod memory;
pub mod seaorm;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use models::{Patch, Query};

use crate::errors::ServiceError;

pub use adapter::StoreConfig;
pub use memory::MemoryStore;
pub use seaorm::SeaOrmStore;

/// One tenant's handle on one collection. Every single-document write is atomic.
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    /// Matching documents for the page, plus the total match count.
    async fn find(&self, query: &Query) -> Result<(Vec<Value>, u64), ServiceError>;
    async fn count(&self, filter: &Map<String, Value>) -> Result<u64, ServiceError>;
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Value>, ServiceError>;
    async fn find_one(&self, id: &str) -> Result<Option<Value>, ServiceError>;
    /// Insert a new document; `false` when the id is already taken.
    async fn insert(&self, id: &str, doc: Value) -> Result<bool, ServiceError>;
    /// Replace an existing document; `false` when it does not exist.
    async fn replace(&self, id: &str, doc: Value) -> Result<bool, ServiceError>;
    /// Apply a patch in place and return the new document.
    async fn update(&self, id: &str, patch: &Patch) -> Result<Option<Value>, ServiceError>;
    /// Insert or replace; `true` when the document was created.
    async fn upsert(&self, id: &str, doc: Value) -> Result<bool, ServiceError>;
    /// Remove and return the previous document.
    async fn delete(&self, id: &str) -> Result<Option<Value>, ServiceError>;
}

/// Resolves collection handles per tenant. `None` addresses the global partition.
pub trait CollectionProvider: Send + Sync {
    fn collection(&self, tenant: Option<&str>, name: &str) -> Arc<dyn Collection>;
}
