//! Declarative per-entity field validation.
//!
//! A [`Schema`] is a list of [`FieldRule`]s composed from required/optional,
//! type, length, enum and nested-shape constraints. Validation returns
//! `(fieldPath, message)` pairs rather than failing on the first problem.

use serde_json::Value;

use models::entity::{ID_FIELD, TYPE_FIELD};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Number => "a number",
            Self::Integer => "an integer",
            Self::Boolean => "a boolean",
            Self::Object => "an object",
            Self::Array => "an array",
            Self::Any => "a value",
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldRule {
    name: String,
    kind: FieldKind,
    required: bool,
    nullable: bool,
    min_len: Option<usize>,
    max_len: Option<usize>,
    one_of: Vec<Value>,
    /// Shape of an object field, or of every element of an array field.
    shape: Option<Schema>,
    item_kind: Option<FieldKind>,
}

impl FieldRule {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            nullable: false,
            min_len: None,
            max_len: None,
            one_of: Vec::new(),
            shape: None,
            item_kind: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self { Self::new(name, FieldKind::String) }
    pub fn boolean(name: impl Into<String>) -> Self { Self::new(name, FieldKind::Boolean) }
    pub fn integer(name: impl Into<String>) -> Self { Self::new(name, FieldKind::Integer) }
    pub fn object(name: impl Into<String>, shape: Schema) -> Self {
        Self { shape: Some(shape), ..Self::new(name, FieldKind::Object) }
    }
    pub fn array_of(name: impl Into<String>, shape: Schema) -> Self {
        Self { shape: Some(shape), item_kind: Some(FieldKind::Object), ..Self::new(name, FieldKind::Array) }
    }
    pub fn array_of_kind(name: impl Into<String>, kind: FieldKind) -> Self {
        Self { item_kind: Some(kind), ..Self::new(name, FieldKind::Array) }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Length bounds: characters for strings, elements for arrays.
    pub fn len(mut self, min: usize, max: usize) -> Self {
        self.min_len = Some(min);
        self.max_len = Some(max);
        self
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.one_of = values.into_iter().map(Into::into).collect();
        self
    }

    fn check(&self, path: &str, value: &Value, out: &mut Vec<(String, String)>) {
        if value.is_null() {
            if self.required && !self.nullable {
                out.push((path.to_string(), "is required".into()));
            }
            return;
        }
        if !self.kind.accepts(value) {
            out.push((path.to_string(), format!("must be {}", self.kind.label())));
            return;
        }
        let len = match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            _ => None,
        };
        if let (Some(len), Some(min)) = (len, self.min_len) {
            if len < min {
                out.push((path.to_string(), format!("length must be at least {min}")));
            }
        }
        if let (Some(len), Some(max)) = (len, self.max_len) {
            if len > max {
                out.push((path.to_string(), format!("length must be at most {max}")));
            }
        }
        if !self.one_of.is_empty() && !self.one_of.contains(value) {
            let allowed: Vec<String> = self.one_of.iter().map(Value::to_string).collect();
            out.push((path.to_string(), format!("must be one of {}", allowed.join(", "))));
        }
        match value {
            Value::Object(_) => {
                if let Some(shape) = &self.shape {
                    shape.check(path, value, &[], out);
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{path}[{i}]");
                    if let Some(kind) = self.item_kind {
                        if !kind.accepts(item) {
                            out.push((item_path, format!("must be {}", kind.label())));
                            continue;
                        }
                    }
                    if let (Some(shape), true) = (&self.shape, item.is_object()) {
                        shape.check(&item_path, item, &[], out);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Closed by default: unknown fields are rejected, except `id` and `type` on the root.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    rules: Vec<FieldRule>,
    open: bool,
}

impl Schema {
    pub fn new() -> Self { Self::default() }

    pub fn field(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Accept fields without a rule (e.g. embedded snapshots whose projection may grow).
    pub fn open(mut self) -> Self {
        self.open = true;
        self
    }

    /// Validate a root entity. Fields listed in `skip` are not checked at all.
    pub fn validate(&self, value: &Value, skip: &[&str]) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if !value.is_object() {
            out.push((String::new(), "entity must be an object".into()));
            return out;
        }
        self.check("", value, skip, &mut out);
        out
    }

    fn check(&self, prefix: &str, value: &Value, skip: &[&str], out: &mut Vec<(String, String)>) {
        let Value::Object(map) = value else { return };
        let join = |name: &str| if prefix.is_empty() { name.to_string() } else { format!("{prefix}.{name}") };
        for rule in &self.rules {
            if skip.contains(&rule.name.as_str()) {
                continue;
            }
            rule.check(&join(&rule.name), map.get(&rule.name).unwrap_or(&Value::Null), out);
        }
        if self.open {
            return;
        }
        for key in map.keys() {
            let is_root_meta = prefix.is_empty() && (key == ID_FIELD || key == TYPE_FIELD);
            let known = self.rules.iter().any(|r| &r.name == key) || skip.contains(&key.as_str());
            if !known && !is_root_meta {
                out.push((join(key), "is not allowed".into()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn professor() -> Schema {
        Schema::new()
            .field(FieldRule::object("user", Schema::new().field(FieldRule::string("id").required()).open()).required())
            .field(FieldRule::array_of("classes", Schema::new().field(FieldRule::string("id").required()).open()).required())
            .field(FieldRule::string("status").one_of(["active", "disabled"]))
    }

    #[test]
    fn accepts_valid_entity() {
        let errs = professor().validate(&json!({"id": "p1", "user": {"id": "p1", "name": "Ada"}, "classes": []}), &[]);
        assert!(errs.is_empty(), "{errs:?}");
    }

    #[test]
    fn reports_field_paths() {
        let errs = professor().validate(
            &json!({"id": "p1", "classes": [{"name": "x"}, 3], "status": "gone", "extra": 1}),
            &[],
        );
        let paths: Vec<&str> = errs.iter().map(|(p, _)| p.as_str()).collect();
        assert!(paths.contains(&"user"));
        assert!(paths.contains(&"classes[0].id"));
        assert!(paths.contains(&"classes[1]"));
        assert!(paths.contains(&"status"));
        assert!(paths.contains(&"extra"));
    }

    #[test]
    fn skipped_fields_are_ignored() {
        let errs = professor().validate(&json!({"classes": []}), &["user"]);
        assert!(errs.is_empty(), "{errs:?}");
    }

    #[test]
    fn length_bounds_apply_to_strings_and_arrays() {
        let schema = Schema::new()
            .field(FieldRule::string("name").required().len(1, 3))
            .field(FieldRule::array_of_kind("tags", FieldKind::String).len(0, 1));
        let errs = schema.validate(&json!({"name": "", "tags": ["a", "b"]}), &[]);
        assert_eq!(errs.len(), 2);
    }
}
