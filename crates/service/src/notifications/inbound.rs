//! Applying inbound notification envelopes to local denormalized copies.
//!
//! Application is keyed by entity id and converges: re-delivering an entry
//! that was already applied finds the copy unchanged and raises nothing.

use serde_json::Value;
use tracing::{debug, info, instrument};

use models::entity::{entity_id, TYPE_FIELD};
use models::{NotificationEnvelope, NotificationType, Projection, RequestContext};

use crate::errors::{Reply, ServiceError, ServiceResult};
use crate::facade::{EntityService, RemovalPolicy};
use crate::observability::NOTIFICATIONS_APPLIED_TOTAL;
use crate::store::adapter;

impl EntityService {
    /// Validate `envelope` and apply every entry, list by list, then raise the
    /// resulting changes to this service's own subscribers.
    #[instrument(skip_all, fields(service = %self.def.service_name(), source = %envelope.service_name))]
    pub async fn notification(&self, envelope: NotificationEnvelope, ctx: &RequestContext) -> ServiceResult {
        let raw = serde_json::to_value(&envelope).map_err(|e| ServiceError::Unexpected(e.to_string()))?;
        let envelope = NotificationEnvelope::parse(&raw)?;
        let source = envelope.service_name.as_str();

        for kind in NotificationType::ALL {
            let entries = envelope.entries(kind);
            if entries.is_empty() {
                continue;
            }
            let mut groups: Vec<(Option<String>, Vec<&Value>)> = Vec::new();
            for foreign in entries {
                for tenant in self.def.target_tenants(source, foreign, ctx)? {
                    match groups.iter_mut().find(|(t, _)| *t == tenant) {
                        Some((_, items)) => items.push(foreign),
                        None => groups.push((tenant, vec![foreign])),
                    }
                }
            }
            for (tenant, items) in groups {
                let scoped = RequestContext { tenant, request_id: ctx.request_id.clone() };
                self.apply_entries(source, kind, &items, &scoped).await?;
            }
        }
        Ok(Reply::ok(Value::Bool(true)))
    }

    async fn apply_entries(
        &self,
        source: &str,
        kind: NotificationType,
        items: &[&Value],
        ctx: &RequestContext,
    ) -> Result<(), ServiceError> {
        let cfg = self.store_config(ctx.tenant());
        let ids: Vec<String> = items.iter().filter_map(|v| entity_id(v)).map(str::to_string).collect();
        let existing = adapter::get_all_by_ids(&cfg, &ids, &Projection::all()).await?.value;
        let existing = existing.as_array().cloned().unwrap_or_default();
        let current_of = |id: &str| existing.iter().find(|e| entity_id(e) == Some(id));

        let mut changed: Vec<Value> = Vec::new();
        let mut out_kind = kind;
        for foreign in items {
            let Some(id) = entity_id(foreign) else { continue };
            let current = current_of(id);

            if kind == NotificationType::Removed {
                let Some(current) = current else { continue };
                match self.def.removal_policy() {
                    RemovalPolicy::Delete => {
                        let reply = adapter::delete(&cfg, id).await?;
                        if !reply.value.is_null() {
                            changed.push(reply.value);
                        }
                    }
                    RemovalPolicy::Disable { field, value } => {
                        out_kind = NotificationType::Modified;
                        if current.get(&field) == Some(&value) {
                            continue;
                        }
                        let mut next = current.clone();
                        if let Some(map) = next.as_object_mut() {
                            map.insert(field, value);
                        }
                        changed.push(adapter::upsert(&cfg, next).await?.value);
                    }
                }
                continue;
            }

            let Some(mut next) = self.def.absorb(source, current, foreign, ctx) else {
                debug!(%id, "no local copy to refresh");
                continue;
            };
            self.resolve(&mut [&mut next], ctx).await?;
            self.def.before_persist(&mut next);
            if let Some(map) = next.as_object_mut() {
                map.insert(TYPE_FIELD.to_string(), Value::String(self.def.entity_type().to_string()));
            }
            if current == Some(&next) {
                continue;
            }
            changed.push(adapter::upsert(&cfg, next).await?.value);
        }

        if changed.is_empty() {
            return Ok(());
        }
        NOTIFICATIONS_APPLIED_TOTAL
            .with_label_values(&[self.def.service_name(), source, kind.as_str()])
            .inc_by(changed.len() as u64);
        info!(
            event = "notification_applied",
            service = %self.def.service_name(),
            %source,
            %kind,
            tenant = ?ctx.tenant,
            count = changed.len(),
            "denormalized copies updated"
        );
        self.raise(out_kind, &changed, ctx).await
    }
}
