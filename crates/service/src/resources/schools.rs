use models::Projection;

use crate::facade::EntityDefinition;
use crate::schema::{FieldRule, Schema};

pub const SERVICE: &str = "schools";

/// Schools are global: they define the tenants everything else lives in.
pub struct Schools {
    schema: Schema,
}

impl Schools {
    pub fn new() -> Self {
        let schema = Schema::new()
            .field(FieldRule::string("name").required().len(1, 128))
            .field(FieldRule::string("city").len(1, 128))
            .field(FieldRule::string("status").one_of(["active", "closed"]));
        Self { schema }
    }
}

impl Default for Schools {
    fn default() -> Self { Self::new() }
}

impl EntityDefinition for Schools {
    fn service_name(&self) -> &str { SERVICE }
    fn entity_type(&self) -> &str { "school" }
    fn schema(&self) -> &Schema { &self.schema }
    fn tenant_scoped(&self) -> bool { false }

    fn before_persist(&self, entity: &mut serde_json::Value) {
        if let Some(map) = entity.as_object_mut() {
            map.entry("status").or_insert_with(|| "active".into());
        }
    }

    fn notification_projection(&self) -> Projection {
        Projection::of(["name", "city", "status"])
    }
}
