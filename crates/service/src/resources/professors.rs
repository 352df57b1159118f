use serde_json::Value;

use models::{Projection, ReferenceDeclaration};

use crate::facade::EntityDefinition;
use crate::resources::{class_list, user_reference, user_snapshot};
use crate::schema::{FieldRule, Schema};

pub const SERVICE: &str = "professors";

/// A professor is keyed by the id of the school user it extends.
pub struct Professors {
    schema: Schema,
}

impl Professors {
    pub fn new() -> Self {
        let schema = Schema::new()
            .field(FieldRule::object("user", user_snapshot()).required())
            .field(class_list().required())
            .field(FieldRule::string("office").len(1, 64))
            .field(FieldRule::string("displayName"));
        Self { schema }
    }
}

impl Default for Professors {
    fn default() -> Self { Self::new() }
}

impl EntityDefinition for Professors {
    fn service_name(&self) -> &str { SERVICE }
    fn entity_type(&self) -> &str { "professor" }
    fn schema(&self) -> &Schema { &self.schema }

    fn references(&self) -> Vec<ReferenceDeclaration> {
        vec![user_reference()]
    }

    fn before_persist(&self, entity: &mut Value) {
        let name = entity.pointer("/user/name").cloned();
        if let (Some(map), Some(name)) = (entity.as_object_mut(), name) {
            map.insert("displayName".to_string(), name);
        }
    }

    fn response_projection(&self) -> Projection {
        Projection::of(["user.id", "user.name", "classes", "office", "displayName"])
    }
}
