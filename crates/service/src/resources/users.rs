use serde_json::Value;

use models::entity::element_key;
use models::{NotificationType, Projection, ReferenceDeclaration};

use crate::facade::EntityDefinition;
use crate::references::diff_keyed;
use crate::resources::schools;
use crate::schema::{FieldKind, FieldRule, Schema};

pub const SERVICE: &str = "users";
pub const SCHOOLS_FIELD: &str = "schools";

/// Global user accounts. `schools[]` links a user to each school with
/// per-school roles; school services keep a copy of the user per school.
pub struct Users {
    schema: Schema,
}

impl Users {
    pub fn new() -> Self {
        let membership = Schema::new()
            .field(FieldRule::string("id").required())
            .field(FieldRule::string("name"))
            .field(FieldRule::array_of_kind("roles", FieldKind::String));
        let schema = Schema::new()
            .field(FieldRule::string("name").required().len(1, 128))
            .field(FieldRule::string("email").len(3, 254))
            .field(FieldRule::string("status").one_of(["active", "disabled"]))
            .field(FieldRule::array_of(SCHOOLS_FIELD, membership));
        Self { schema }
    }
}

impl Default for Users {
    fn default() -> Self { Self::new() }
}

fn memberships(user: &Value) -> Vec<Value> {
    user.get(SCHOOLS_FIELD).and_then(Value::as_array).cloned().unwrap_or_default()
}

fn with_memberships(user: &Value, schools: Vec<Value>) -> Value {
    let mut out = user.clone();
    if let Some(map) = out.as_object_mut() {
        map.insert(SCHOOLS_FIELD.to_string(), Value::Array(schools));
    }
    out
}

fn without_memberships(user: &Value) -> Value {
    let mut out = user.clone();
    if let Some(map) = out.as_object_mut() {
        map.remove(SCHOOLS_FIELD);
    }
    out
}

impl EntityDefinition for Users {
    fn service_name(&self) -> &str { SERVICE }
    fn entity_type(&self) -> &str { "user" }
    fn schema(&self) -> &Schema { &self.schema }
    fn tenant_scoped(&self) -> bool { false }

    fn references(&self) -> Vec<ReferenceDeclaration> {
        vec![ReferenceDeclaration::many(SCHOOLS_FIELD, schools::SERVICE).with_projection(Projection::of(["name"]))]
    }

    fn before_persist(&self, entity: &mut Value) {
        let Some(map) = entity.as_object_mut() else { return };
        map.entry("status").or_insert_with(|| "active".into());
        if let Some(name) = map.get("name").and_then(Value::as_str) {
            let search = name.to_lowercase();
            map.insert("_search".to_string(), Value::String(search));
        }
    }

    fn notification_projection(&self) -> Projection {
        Projection::of(["name", "email", "status", SCHOOLS_FIELD])
    }

    /// Each notification carries the user with only the memberships it is
    /// about, so a school sees exactly one entry per change: memberships that
    /// went away are `removed`, new ones `added`, changed ones `modified`.
    /// A change to the user's own fields touches every kept membership.
    fn plan_notifications(&self, before: Option<&Value>, after: Option<&Value>) -> Vec<(NotificationType, Value)> {
        match (before, after) {
            (None, Some(a)) => vec![(NotificationType::Added, a.clone())],
            (Some(b), None) => vec![(NotificationType::Removed, b.clone())],
            (Some(b), Some(a)) => {
                let old = memberships(b);
                let new = memberships(a);
                let delta = diff_keyed(&old, &new);
                let mut plan = Vec::new();
                if !delta.removed.is_empty() {
                    plan.push((NotificationType::Removed, with_memberships(b, delta.removed)));
                }
                let modified = if without_memberships(b) != without_memberships(a) {
                    let added: Vec<&str> = delta.added.iter().filter_map(element_key).collect();
                    new.iter()
                        .filter(|m| element_key(m).is_some_and(|k| !added.contains(&k)))
                        .cloned()
                        .collect()
                } else {
                    delta.modified
                };
                if !modified.is_empty() {
                    plan.push((NotificationType::Modified, with_memberships(a, modified)));
                }
                if !delta.added.is_empty() {
                    plan.push((NotificationType::Added, with_memberships(a, delta.added)));
                }
                plan
            }
            (None, None) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(schools: Value) -> Value {
        json!({"id": "u1", "name": "Ada", "status": "active", "schools": schools})
    }

    #[test]
    fn membership_changes_split_by_kind() {
        let before = user(json!([{"id": "s1", "roles": ["teacher", "admin"]}, {"id": "s2", "roles": ["teacher"]}]));
        let after = user(json!([{"id": "s1", "roles": ["teacher"]}, {"id": "s3", "roles": []}]));
        let plan = Users::new().plan_notifications(Some(&before), Some(&after));
        let kinds: Vec<NotificationType> = plan.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![NotificationType::Removed, NotificationType::Modified, NotificationType::Added]);
        assert_eq!(plan[0].1["schools"], json!([{"id": "s2", "roles": ["teacher"]}]));
        assert_eq!(plan[1].1["schools"], json!([{"id": "s1", "roles": ["teacher"]}]));
        assert_eq!(plan[2].1["schools"], json!([{"id": "s3", "roles": []}]));
    }

    #[test]
    fn own_field_change_touches_kept_memberships() {
        let before = user(json!([{"id": "s1"}, {"id": "s2"}]));
        let mut after = user(json!([{"id": "s1"}, {"id": "s2"}, {"id": "s3"}]));
        after["status"] = json!("disabled");
        let plan = Users::new().plan_notifications(Some(&before), Some(&after));
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].0, NotificationType::Modified);
        assert_eq!(plan[0].1["schools"], json!([{"id": "s1"}, {"id": "s2"}]));
        assert_eq!(plan[1].0, NotificationType::Added);
    }

    #[test]
    fn unchanged_user_raises_nothing() {
        let u = user(json!([{"id": "s1"}]));
        assert!(Users::new().plan_notifications(Some(&u), Some(&u)).is_empty());
    }

    #[test]
    fn search_key_is_derived() {
        let mut u = json!({"name": "Ada LOVELACE"});
        Users::new().before_persist(&mut u);
        assert_eq!(u["_search"], "ada lovelace");
        assert_eq!(u["status"], "active");
    }
}
