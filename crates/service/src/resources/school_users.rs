use serde_json::{Map, Value};

use models::entity::{element_key, ID_FIELD};
use models::{Projection, RequestContext};

use crate::errors::ServiceError;
use crate::facade::{EntityDefinition, RemovalPolicy, Subscription};
use crate::resources::users;
use crate::schema::Schema;

pub const SERVICE: &str = "school-users";

/// Fields copied from the global user into each school's copy.
const USER_FIELDS: [&str; 3] = ["name", "email", "status"];
const ROLES_FIELD: &str = "roles";

/// Per-school copy of a user, flattened with that school's roles. Copies are
/// never deleted: a user leaving a school is kept as `disabled` so records
/// pointing at it stay readable.
pub struct SchoolUsers {
    schema: Schema,
}

impl SchoolUsers {
    pub fn new() -> Self {
        Self { schema: Schema::new().open() }
    }
}

impl Default for SchoolUsers {
    fn default() -> Self { Self::new() }
}

impl EntityDefinition for SchoolUsers {
    fn service_name(&self) -> &str { SERVICE }
    fn entity_type(&self) -> &str { "school-user" }
    fn schema(&self) -> &Schema { &self.schema }
    fn writable(&self) -> bool { false }

    fn notification_projection(&self) -> Projection {
        Projection::of(["name", "email", "status", "roles"])
    }

    fn removal_policy(&self) -> RemovalPolicy {
        RemovalPolicy::Disable { field: "status".into(), value: Value::String("disabled".into()) }
    }

    fn subscriptions(&self) -> Vec<Subscription> {
        vec![Subscription {
            source: users::SERVICE.into(),
            projection: Projection::of(["name", "email", "status", users::SCHOOLS_FIELD]),
        }]
    }

    /// One copy per school listed on the user.
    fn target_tenants(&self, _source: &str, foreign: &Value, _ctx: &RequestContext) -> Result<Vec<Option<String>>, ServiceError> {
        Ok(foreign
            .get(users::SCHOOLS_FIELD)
            .and_then(Value::as_array)
            .map(|schools| schools.iter().filter_map(element_key).map(|id| Some(id.to_string())).collect())
            .unwrap_or_default())
    }

    /// The user fields and roles are rebuilt from the foreign user, so a
    /// field or role the user no longer carries is cleared. Anything else on
    /// the copy is kept.
    fn absorb(&self, _source: &str, existing: Option<&Value>, foreign: &Value, ctx: &RequestContext) -> Option<Value> {
        let mut copy = match existing.and_then(Value::as_object) {
            Some(current) => current.clone(),
            None => Map::new(),
        };
        copy.insert(ID_FIELD.to_string(), foreign.get(ID_FIELD)?.clone());
        for field in USER_FIELDS {
            match foreign.get(field) {
                Some(v) => copy.insert(field.to_string(), v.clone()),
                None => copy.remove(field),
            };
        }
        let roles = foreign
            .get(users::SCHOOLS_FIELD)
            .and_then(Value::as_array)
            .and_then(|schools| schools.iter().find(|s| element_key(s) == ctx.tenant()))
            .and_then(|m| m.get(ROLES_FIELD));
        match roles {
            Some(roles) => copy.insert(ROLES_FIELD.to_string(), roles.clone()),
            None => copy.remove(ROLES_FIELD),
        };
        Some(Value::Object(copy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn copies_land_in_every_listed_school() {
        let user = json!({"id": "u1", "schools": [{"id": "s1"}, "s2"]});
        let tenants = SchoolUsers::new().target_tenants("users", &user, &RequestContext::new()).unwrap();
        assert_eq!(tenants, vec![Some("s1".to_string()), Some("s2".to_string())]);
    }

    #[test]
    fn absorb_flattens_roles_of_the_target_school() {
        let user = json!({
            "id": "u1", "name": "Ada", "status": "active",
            "schools": [{"id": "s1", "roles": ["teacher"]}, {"id": "s2", "roles": ["admin"]}],
        });
        let copy = SchoolUsers::new().absorb("users", None, &user, &RequestContext::for_tenant("s2")).unwrap();
        assert_eq!(copy, json!({"id": "u1", "name": "Ada", "status": "active", "roles": ["admin"]}));
    }

    #[test]
    fn refresh_clears_what_the_user_dropped() {
        let existing = json!({
            "id": "u1", "type": "school-user", "name": "Ada", "email": "ada@school.test",
            "status": "active", "roles": ["admin"], "locker": "B12",
        });
        let update = json!({"id": "u1", "name": "Ada", "status": "disabled", "schools": [{"id": "s1"}]});
        let copy = SchoolUsers::new()
            .absorb("users", Some(&existing), &update, &RequestContext::for_tenant("s1"))
            .unwrap();
        assert_eq!(
            copy,
            json!({"id": "u1", "type": "school-user", "name": "Ada", "status": "disabled", "locker": "B12"})
        );
    }
}
