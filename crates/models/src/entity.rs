//! Helpers over entity documents.
//!
//! Entities travel as JSON objects: `{ id, type, fields..., embedded snapshots }`.
//! Keeping them as `serde_json::Value` lets one generic engine serve every
//! resource type; per-type shape is enforced by the resource schema.

use serde_json::{Map, Value};

pub const ID_FIELD: &str = "id";
pub const TYPE_FIELD: &str = "type";

/// `id` of an entity document, if present and a string.
pub fn entity_id(entity: &Value) -> Option<&str> {
    entity.get(ID_FIELD).and_then(Value::as_str)
}

/// Key of an array element: the `id` of an object, or the string itself.
pub fn element_key(element: &Value) -> Option<&str> {
    match element {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get(ID_FIELD).and_then(Value::as_str),
        _ => None,
    }
}

/// Resolve a dotted path to every value it reaches. Arrays on the way are
/// traversed element-wise, so `schools.id` yields the id of each school.
pub fn lookup_all<'a>(value: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let mut out = Vec::new();
    collect(value, &segments, &mut out);
    out
}

fn collect<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(*head) {
                collect(child, rest, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, segments, out);
            }
        }
        _ => {}
    }
}

/// Set a dotted path, creating intermediate objects. Fails when an
/// intermediate segment exists and is not an object.
pub fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), String> {
    let mut segments = path.split('.').filter(|s| !s.is_empty()).peekable();
    let mut cursor = target;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            cursor.insert(segment.to_string(), value);
            return Ok(());
        }
        let slot = cursor
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        cursor = slot
            .as_object_mut()
            .ok_or_else(|| format!("`{segment}` is not an object"))?;
    }
    Err("empty path".into())
}

/// Remove a dotted path; returns whether something was removed.
pub fn remove_path(target: &mut Map<String, Value>, path: &str) -> bool {
    match path.rsplit_once('.') {
        None => target.remove(path).is_some(),
        Some((parent, leaf)) => {
            let mut cursor = target;
            for segment in parent.split('.') {
                match cursor.get_mut(segment).and_then(Value::as_object_mut) {
                    Some(next) => cursor = next,
                    None => return false,
                }
            }
            cursor.remove(leaf).is_some()
        }
    }
}

/// Overlay `snapshot` on top of `base`: snapshot fields win, fields only
/// present in `base` (e.g. per-link data such as roles) are kept.
pub fn merge_snapshot(base: &Value, snapshot: &Value) -> Value {
    match (base, snapshot) {
        (Value::Object(b), Value::Object(s)) => {
            let mut merged = b.clone();
            for (k, v) in s {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => snapshot.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_traverses_arrays() {
        let doc = json!({"schools": [{"id": "s1"}, {"id": "s2"}], "user": {"name": "Ada"}});
        let ids: Vec<_> = lookup_all(&doc, "schools.id").into_iter().cloned().collect();
        assert_eq!(ids, vec![json!("s1"), json!("s2")]);
        assert_eq!(lookup_all(&doc, "user.name"), vec![&json!("Ada")]);
        assert!(lookup_all(&doc, "missing.path").is_empty());
    }

    #[test]
    fn set_and_remove_nested_paths() {
        let mut doc = Map::new();
        set_path(&mut doc, "address.city", json!("Lyon")).unwrap();
        assert_eq!(Value::Object(doc.clone()), json!({"address": {"city": "Lyon"}}));
        assert!(remove_path(&mut doc, "address.city"));
        assert!(!remove_path(&mut doc, "address.zip"));
        assert_eq!(Value::Object(doc), json!({"address": {}}));
    }

    #[test]
    fn set_path_rejects_scalar_parent() {
        let mut doc = json!({"name": "x"}).as_object().cloned().unwrap();
        assert!(set_path(&mut doc, "name.first", json!("y")).is_err());
    }

    #[test]
    fn merge_keeps_link_fields() {
        let merged = merge_snapshot(&json!({"id": "s1", "roles": ["admin"]}), &json!({"id": "s1", "name": "North"}));
        assert_eq!(merged, json!({"id": "s1", "roles": ["admin"], "name": "North"}));
    }
}
