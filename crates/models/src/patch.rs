//! Partial updates: `{ set?, add?, remove?, unset? }`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::{element_key, remove_path, set_path, ID_FIELD, TYPE_FIELD};
use crate::errors::ModelError;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Patch {
    /// Overwrite fields (dotted paths allowed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<Map<String, Value>>,
    /// Array union keyed by sub-entity id: `{ field: [items] }`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add: Option<Map<String, Value>>,
    /// Array difference keyed by sub-entity id: `{ field: [ids or items] }`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<Map<String, Value>>,
    /// Optional fields to clear.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unset: Option<Vec<String>>,
}

impl Patch {
    pub fn from_value(value: Value) -> Result<Self, ModelError> {
        let patch: Patch =
            serde_json::from_value(value).map_err(|e| ModelError::validation("", format!("invalid patch: {e}")))?;
        patch.validate()?;
        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        self.set.as_ref().map_or(true, Map::is_empty)
            && self.add.as_ref().map_or(true, Map::is_empty)
            && self.remove.as_ref().map_or(true, Map::is_empty)
            && self.unset.as_ref().map_or(true, Vec::is_empty)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.is_empty() {
            return Err(ModelError::validation("", "patch must contain at least one of set, add, remove, unset"));
        }
        let immutable = |path: &str| path == ID_FIELD || path == TYPE_FIELD;
        for (section, keys) in [
            ("set", self.set.as_ref().map(|m| m.keys().cloned().collect::<Vec<_>>())),
            ("add", self.add.as_ref().map(|m| m.keys().cloned().collect())),
            ("remove", self.remove.as_ref().map(|m| m.keys().cloned().collect())),
            ("unset", self.unset.clone()),
        ] {
            for key in keys.unwrap_or_default() {
                if immutable(&key) {
                    return Err(ModelError::validation(format!("{section}.{key}"), "field is immutable"));
                }
            }
        }
        for (section, map) in [("add", &self.add), ("remove", &self.remove)] {
            for (field, items) in map.iter().flat_map(|m| m.iter()) {
                let Value::Array(items) = items else {
                    return Err(ModelError::validation(format!("{section}.{field}"), "must be an array"));
                };
                for (i, item) in items.iter().enumerate() {
                    if element_key(item).is_none() {
                        return Err(ModelError::validation(
                            format!("{section}.{field}[{i}]"),
                            "must be an id or an object with an id",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply in order set, add, remove, unset. `id` and `type` are never touched.
    pub fn apply(&self, doc: &mut Value) -> Result<(), ModelError> {
        let Value::Object(target) = doc else {
            return Err(ModelError::validation("", "entity is not an object"));
        };
        if let Some(set) = &self.set {
            for (path, value) in set {
                set_path(target, path, value.clone()).map_err(|m| ModelError::validation(format!("set.{path}"), m))?;
            }
        }
        if let Some(add) = &self.add {
            for (field, items) in add {
                let existing = target.entry(field.clone()).or_insert_with(|| Value::Array(Vec::new()));
                let Value::Array(current) = existing else {
                    return Err(ModelError::validation(format!("add.{field}"), "target field is not an array"));
                };
                for item in items.as_array().into_iter().flatten() {
                    let key = element_key(item).map(str::to_string);
                    match current.iter_mut().find(|c| element_key(c).map(str::to_string) == key) {
                        Some(slot) => *slot = item.clone(),
                        None => current.push(item.clone()),
                    }
                }
            }
        }
        if let Some(remove) = &self.remove {
            for (field, items) in remove {
                let keys: Vec<&str> = items.as_array().into_iter().flatten().filter_map(element_key).collect();
                match target.get_mut(field) {
                    Some(Value::Array(current)) => {
                        current.retain(|c| element_key(c).map_or(true, |k| !keys.contains(&k)));
                    }
                    Some(_) => {
                        return Err(ModelError::validation(format!("remove.{field}"), "target field is not an array"))
                    }
                    None => {}
                }
            }
        }
        if let Some(unset) = &self.unset {
            for path in unset {
                remove_path(target, path);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn applies_all_sections() {
        let mut doc = json!({
            "id": "u1",
            "name": "Ada",
            "nickname": "A",
            "schools": [{"id": "s1", "roles": ["teacher"]}, {"id": "s2", "roles": []}],
        });
        let patch = Patch::from_value(json!({
            "set": {"name": "Ada L."},
            "add": {"schools": [{"id": "s1", "roles": ["admin"]}, {"id": "s3", "roles": []}]},
            "remove": {"schools": ["s2"]},
            "unset": ["nickname"],
        }))
        .unwrap();
        patch.apply(&mut doc).unwrap();
        assert_eq!(
            doc,
            json!({
                "id": "u1",
                "name": "Ada L.",
                "schools": [{"id": "s1", "roles": ["admin"]}, {"id": "s3", "roles": []}],
            })
        );
    }

    #[test]
    fn add_creates_missing_array() {
        let mut doc = json!({"id": "p1"});
        Patch::from_value(json!({"add": {"classes": [{"id": "c1"}]}})).unwrap().apply(&mut doc).unwrap();
        assert_eq!(doc["classes"], json!([{"id": "c1"}]));
    }

    #[test]
    fn rejects_id_changes_and_empty_patch() {
        assert!(Patch::from_value(json!({"set": {"id": "other"}})).is_err());
        assert!(Patch::from_value(json!({})).is_err());
        assert!(Patch::from_value(json!({"replace": {}})).is_err());
    }

    #[test]
    fn rejects_items_without_key() {
        let err = Patch::from_value(json!({"add": {"classes": [{"name": "no id"}]}})).unwrap_err();
        assert!(err.to_string().contains("add.classes[0]"));
    }

    #[test]
    fn add_on_scalar_field_fails() {
        let mut doc = json!({"id": "p1", "classes": "c1"});
        let patch = Patch::from_value(json!({"add": {"classes": ["c2"]}})).unwrap();
        assert!(patch.apply(&mut doc).is_err());
    }
}
