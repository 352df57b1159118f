use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QuerySelect, Set, SqlErr,
    TransactionTrait,
};
use serde_json::{Map, Value};
use tracing::error;

use models::document::{self, Entity as DocumentEntity, GLOBAL_TENANT};
use models::entity::ID_FIELD;
use models::query::matches_filter;
use models::{Patch, Query};

use super::{Collection, CollectionProvider};
use crate::errors::ServiceError;

pub(crate) fn db_err(e: DbErr) -> ServiceError {
    error!(error = %e, "document store failure");
    ServiceError::Unexpected(e.to_string())
}

/// Postgres-backed collection stored in `entity_document`. Tenant, collection and
/// `id` filters (plain or `$in`) run in SQL; other field filters and sorting run
/// over the loaded bodies, so a query without an `id` filter reads the whole
/// collection of its tenant.
pub struct SeaOrmCollection {
    db: DatabaseConnection,
    tenant: String,
    name: String,
}

impl SeaOrmCollection {
    fn scoped(&self) -> sea_orm::Select<DocumentEntity> {
        DocumentEntity::find()
            .filter(document::Column::TenantId.eq(self.tenant.clone()))
            .filter(document::Column::Collection.eq(self.name.clone()))
    }

    fn key(&self, id: &str) -> (String, String, String) {
        (self.tenant.clone(), self.name.clone(), id.to_string())
    }

    async fn bodies(&self, filter: &Map<String, Value>) -> Result<Vec<Value>, ServiceError> {
        let mut select = self.scoped();
        if let Some(ids) = id_condition(filter) {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            select = select.filter(document::Column::Id.is_in(ids));
        }
        let rows = select.all(&self.db).await.map_err(db_err)?;
        Ok(rows.into_iter().map(|r| r.body).collect())
    }
}

/// Ids an `id` filter can match, when it restricts them at all.
fn id_condition(filter: &Map<String, Value>) -> Option<Vec<String>> {
    let ids = match filter.get(ID_FIELD)? {
        Value::String(id) => vec![id.clone()],
        Value::Object(ops) => ops
            .get("$in")?
            .as_array()?
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => return None,
    };
    Some(ids)
}

#[async_trait]
impl Collection for SeaOrmCollection {
    fn name(&self) -> &str { &self.name }

    async fn find(&self, query: &Query) -> Result<(Vec<Value>, u64), ServiceError> {
        let bodies = self.bodies(&query.filter).await?;
        Ok(query.run(&bodies))
    }

    async fn count(&self, filter: &Map<String, Value>) -> Result<u64, ServiceError> {
        let bodies = self.bodies(filter).await?;
        Ok(bodies.iter().filter(|b| matches_filter(filter, b)).count() as u64)
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Value>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .scoped()
            .filter(document::Column::Id.is_in(ids.iter().cloned()))
            .all(&self.db)
            .await
            .map_err(db_err)?;
        // keep the caller's id order
        Ok(ids
            .iter()
            .filter_map(|id| rows.iter().find(|r| &r.id == id).map(|r| r.body.clone()))
            .collect())
    }

    async fn find_one(&self, id: &str) -> Result<Option<Value>, ServiceError> {
        let row = DocumentEntity::find_by_id(self.key(id)).one(&self.db).await.map_err(db_err)?;
        Ok(row.map(|r| r.body))
    }

    async fn insert(&self, id: &str, doc: Value) -> Result<bool, ServiceError> {
        let now = Utc::now();
        let am = document::ActiveModel {
            tenant_id: Set(self.tenant.clone()),
            collection: Set(self.name.clone()),
            id: Set(id.to_string()),
            body: Set(doc),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        match am.insert(&self.db).await {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => Ok(false),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn replace(&self, id: &str, doc: Value) -> Result<bool, ServiceError> {
        let res = DocumentEntity::update_many()
            .col_expr(document::Column::Body, sea_orm::sea_query::Expr::value(doc))
            .col_expr(document::Column::UpdatedAt, sea_orm::sea_query::Expr::value(Utc::now()))
            .filter(document::Column::TenantId.eq(self.tenant.clone()))
            .filter(document::Column::Collection.eq(self.name.clone()))
            .filter(document::Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected > 0)
    }

    async fn update(&self, id: &str, patch: &Patch) -> Result<Option<Value>, ServiceError> {
        let txn = self.db.begin().await.map_err(db_err)?;
        let row = DocumentEntity::find_by_id(self.key(id))
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(db_err)?;
        let Some(row) = row else {
            txn.rollback().await.map_err(db_err)?;
            return Ok(None);
        };
        let mut body = row.body.clone();
        patch.apply(&mut body)?;
        let mut am: document::ActiveModel = row.into();
        am.body = Set(body.clone());
        am.updated_at = Set(Utc::now().into());
        am.update(&txn).await.map_err(db_err)?;
        txn.commit().await.map_err(db_err)?;
        Ok(Some(body))
    }

    async fn upsert(&self, id: &str, doc: Value) -> Result<bool, ServiceError> {
        let existed = self.find_one(id).await?.is_some();
        let now = Utc::now();
        let am = document::ActiveModel {
            tenant_id: Set(self.tenant.clone()),
            collection: Set(self.name.clone()),
            id: Set(id.to_string()),
            body: Set(doc),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        DocumentEntity::insert(am)
            .on_conflict(
                OnConflict::columns([
                    document::Column::TenantId,
                    document::Column::Collection,
                    document::Column::Id,
                ])
                .update_columns([document::Column::Body, document::Column::UpdatedAt])
                .to_owned(),
            )
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(!existed)
    }

    async fn delete(&self, id: &str) -> Result<Option<Value>, ServiceError> {
        let txn = self.db.begin().await.map_err(db_err)?;
        let row = DocumentEntity::find_by_id(self.key(id))
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(db_err)?;
        let Some(row) = row else {
            txn.rollback().await.map_err(db_err)?;
            return Ok(None);
        };
        DocumentEntity::delete_by_id(self.key(id)).exec(&txn).await.map_err(db_err)?;
        txn.commit().await.map_err(db_err)?;
        Ok(Some(row.body))
    }
}

/// Postgres backend sharing one connection pool across all collections.
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Arc<Self> {
        Arc::new(Self { db })
    }
}

impl CollectionProvider for SeaOrmStore {
    fn collection(&self, tenant: Option<&str>, name: &str) -> Arc<dyn Collection> {
        Arc::new(SeaOrmCollection {
            db: self.db.clone(),
            tenant: tenant.unwrap_or(GLOBAL_TENANT).to_string(),
            name: name.to_string(),
        })
    }
}
