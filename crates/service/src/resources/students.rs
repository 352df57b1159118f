use models::ReferenceDeclaration;

use crate::facade::EntityDefinition;
use crate::resources::{class_list, user_reference, user_snapshot};
use crate::schema::{FieldRule, Schema};

pub const SERVICE: &str = "students";

pub struct Students {
    schema: Schema,
}

impl Students {
    pub fn new() -> Self {
        let schema = Schema::new()
            .field(FieldRule::object("user", user_snapshot()).required())
            .field(class_list())
            .field(FieldRule::integer("grade"))
            .field(FieldRule::boolean("boarding"));
        Self { schema }
    }
}

impl Default for Students {
    fn default() -> Self { Self::new() }
}

impl EntityDefinition for Students {
    fn service_name(&self) -> &str { SERVICE }
    fn entity_type(&self) -> &str { "student" }
    fn schema(&self) -> &Schema { &self.schema }

    fn references(&self) -> Vec<ReferenceDeclaration> {
        vec![user_reference()]
    }
}
