//! Field-inclusion projections over entity documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::entity::ID_FIELD;

/// A list of dotted include paths. The empty projection keeps everything.
/// `id` is always kept on the projected root object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Projection {
    paths: Vec<String>,
}

#[derive(Default)]
struct Node {
    whole: bool,
    children: BTreeMap<String, Node>,
}

impl Projection {
    pub fn all() -> Self { Self::default() }

    pub fn of<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut paths: Vec<String> = paths
            .into_iter()
            .map(Into::into)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        paths.sort();
        paths.dedup();
        Self { paths }
    }

    /// Parse the comma separated `?projection=` form.
    pub fn parse(raw: &str) -> Self {
        Self::of(raw.split(','))
    }

    pub fn is_all(&self) -> bool { self.paths.is_empty() }

    pub fn paths(&self) -> &[String] { &self.paths }

    /// Comma separated form, inverse of [`Projection::parse`].
    pub fn to_param(&self) -> String { self.paths.join(",") }

    pub fn apply(&self, value: &Value) -> Value {
        if self.is_all() {
            return value.clone();
        }
        let tree = self.tree();
        match value {
            Value::Object(map) => {
                let mut projected = project_object(map, &tree);
                if let Some(id) = map.get(ID_FIELD) {
                    projected.insert(ID_FIELD.to_string(), id.clone());
                }
                Value::Object(projected)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.apply(v)).collect()),
            other => other.clone(),
        }
    }

    pub fn apply_all(&self, values: &[Value]) -> Vec<Value> {
        values.iter().map(|v| self.apply(v)).collect()
    }

    fn tree(&self) -> Node {
        let mut root = Node::default();
        for path in &self.paths {
            let mut node = &mut root;
            for segment in path.split('.').filter(|s| !s.is_empty()) {
                node = node.children.entry(segment.to_string()).or_default();
            }
            node.whole = true;
        }
        root
    }
}

fn project_object(map: &Map<String, Value>, node: &Node) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, child) in &node.children {
        if let Some(value) = map.get(key) {
            out.insert(key.clone(), project_value(value, child));
        }
    }
    out
}

fn project_value(value: &Value, node: &Node) -> Value {
    if node.whole || node.children.is_empty() {
        return value.clone();
    }
    match value {
        Value::Object(map) => Value::Object(project_object(map, node)),
        Value::Array(items) => Value::Array(items.iter().map(|v| project_value(v, node)).collect()),
        other => other.clone(),
    }
}

impl Serialize for Projection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.paths.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Projection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let paths = Vec::<String>::deserialize(deserializer)?;
        Ok(Self::of(paths))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_projection_is_identity() {
        let doc = json!({"id": "p1", "secret": 1});
        assert_eq!(Projection::all().apply(&doc), doc);
    }

    #[test]
    fn keeps_id_and_nested_paths() {
        let doc = json!({
            "id": "u1",
            "name": "Ada",
            "password": "x",
            "schools": [{"id": "s1", "name": "North", "roles": ["admin"]}],
        });
        let p = Projection::parse("name,schools.id,schools.roles");
        assert_eq!(
            p.apply(&doc),
            json!({"id": "u1", "name": "Ada", "schools": [{"id": "s1", "roles": ["admin"]}]})
        );
    }

    #[test]
    fn parent_path_wins_over_child() {
        let doc = json!({"id": "1", "user": {"id": "u", "name": "n"}});
        let p = Projection::of(["user", "user.name"]);
        assert_eq!(p.apply(&doc), doc);
    }

    #[test]
    fn param_round_trips() {
        let p = Projection::parse(" b , a,,a");
        assert_eq!(p.paths(), ["a", "b"]);
        assert_eq!(Projection::parse(&p.to_param()), p);
    }
}
