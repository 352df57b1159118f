//! List queries: filter, sort and paging evaluated over entity documents.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::lookup_all;
use crate::errors::ModelError;
use crate::projection::Projection;

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

/// Paging parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// items per page
    pub limit: u32,
    /// items skipped from the start of the sorted result
    pub skip: u64,
}

impl Page {
    /// Clamp to sane bounds
    pub fn normalize(self) -> Self {
        Self { limit: self.limit.clamp(1, MAX_LIMIT), skip: self.skip }
    }
}

impl Default for Page {
    fn default() -> Self { Self { limit: DEFAULT_LIMIT, skip: 0 } }
}

/// Filter is a map of dotted path to condition. A condition is either a plain
/// value (equality; an array field matches when any element is equal) or an
/// operator object: `{"$in": [..]}` or `{"$ne": v}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub filter: Map<String, Value>,
    #[serde(default)]
    pub projection: Projection,
    /// Dotted paths, `-` prefix for descending.
    #[serde(default)]
    pub sort: Vec<String>,
    #[serde(default)]
    pub page: Page,
}

const RESERVED_PARAMS: [&str; 6] = ["filter", "projection", "sort", "limit", "skip", "ids"];

impl Query {
    pub fn with_filter(mut self, path: impl Into<String>, condition: Value) -> Self {
        self.filter.insert(path.into(), condition);
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_sort(mut self, key: impl Into<String>) -> Self {
        self.sort.push(key.into());
        self
    }

    pub fn with_page(mut self, limit: u32, skip: u64) -> Self {
        self.page = Page { limit, skip };
        self
    }

    /// Build from HTTP query parameters. `filter` carries a JSON object;
    /// any non-reserved parameter is a string equality condition.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, ModelError> {
        let mut query = Query::default();
        if let Some(raw) = params.get("filter") {
            let parsed: Value = serde_json::from_str(raw)
                .map_err(|e| ModelError::validation("filter", format!("invalid JSON: {e}")))?;
            match parsed {
                Value::Object(map) => query.filter = map,
                _ => return Err(ModelError::validation("filter", "must be a JSON object")),
            }
        }
        for (k, v) in params {
            if !RESERVED_PARAMS.contains(&k.as_str()) {
                query.filter.insert(k.clone(), Value::String(v.clone()));
            }
        }
        if let Some(p) = params.get("projection") {
            query.projection = Projection::parse(p);
        }
        if let Some(s) = params.get("sort") {
            query.sort = s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        }
        if let Some(l) = params.get("limit") {
            query.page.limit = l
                .parse()
                .map_err(|_| ModelError::validation("limit", "must be a non-negative integer"))?;
        }
        if let Some(s) = params.get("skip") {
            query.page.skip = s
                .parse()
                .map_err(|_| ModelError::validation("skip", "must be a non-negative integer"))?;
        }
        query.validate()?;
        Ok(query)
    }

    /// Inverse of [`Query::from_params`]; the filter always travels as JSON.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if !self.filter.is_empty() {
            params.push(("filter".to_string(), Value::Object(self.filter.clone()).to_string()));
        }
        if !self.projection.is_all() {
            params.push(("projection".to_string(), self.projection.to_param()));
        }
        if !self.sort.is_empty() {
            params.push(("sort".to_string(), self.sort.join(",")));
        }
        params.push(("limit".to_string(), self.page.limit.to_string()));
        params.push(("skip".to_string(), self.page.skip.to_string()));
        params
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        for (path, condition) in &self.filter {
            if let Value::Object(ops) = condition {
                for (op, arg) in ops {
                    match op.as_str() {
                        "$in" if arg.is_array() => {}
                        "$in" => return Err(ModelError::validation(path.clone(), "$in expects an array")),
                        "$ne" => {}
                        other if other.starts_with('$') => {
                            return Err(ModelError::validation(path.clone(), format!("unsupported operator {other}")))
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    pub fn matches(&self, doc: &Value) -> bool {
        matches_filter(&self.filter, doc)
    }

    /// Filter, sort and page `docs`. Returns the page and the total match count.
    pub fn run<'a, I>(&self, docs: I) -> (Vec<Value>, u64)
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut hits: Vec<&Value> = docs.into_iter().filter(|d| self.matches(d)).collect();
        sort_documents(&mut hits, &self.sort);
        let total = hits.len() as u64;
        let page = self.page.normalize();
        let data = hits
            .into_iter()
            .skip(page.skip as usize)
            .take(page.limit as usize)
            .map(|d| self.projection.apply(d))
            .collect();
        (data, total)
    }
}

pub fn matches_filter(filter: &Map<String, Value>, doc: &Value) -> bool {
    filter.iter().all(|(path, condition)| {
        let found = lookup_all(doc, path);
        match condition {
            Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => ops.iter().all(|(op, arg)| match op.as_str() {
                "$in" => arg
                    .as_array()
                    .map(|options| options.iter().any(|o| found.iter().any(|f| value_matches(f, o))))
                    .unwrap_or(false),
                "$ne" => !found.iter().any(|f| value_matches(f, arg)),
                _ => false,
            }),
            expected => found.iter().any(|f| value_matches(f, expected)),
        }
    })
}

fn value_matches(found: &Value, expected: &Value) -> bool {
    if found == expected {
        return true;
    }
    match found {
        Value::Array(items) => items.iter().any(|i| i == expected),
        _ => false,
    }
}

pub fn sort_documents(docs: &mut [&Value], keys: &[String]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for key in keys {
            let (path, descending) = match key.strip_prefix('-') {
                Some(p) => (p, true),
                None => (key.as_str(), false),
            };
            let va = lookup_all(a, path).into_iter().next();
            let vb = lookup_all(b, path).into_iter().next();
            let ord = compare_values(va, vb);
            let ord = if descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn rank(v: Option<&Value>) -> u8 {
    match v {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
