//! Change notification envelopes exchanged between services.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::entity_id;
use crate::errors::ModelError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Added,
    Modified,
    Removed,
}

impl NotificationType {
    pub const ALL: [NotificationType; 3] = [Self::Added, Self::Modified, Self::Removed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{ serviceName, added?, modified?, removed? }`. An entity id appears in at
/// most one of the three lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<Vec<Value>>,
}

impl NotificationEnvelope {
    pub fn new(service_name: impl Into<String>, kind: NotificationType, entities: Vec<Value>) -> Self {
        let mut envelope = Self { service_name: service_name.into(), added: None, modified: None, removed: None };
        *envelope.slot_mut(kind) = Some(entities);
        envelope
    }

    fn slot_mut(&mut self, kind: NotificationType) -> &mut Option<Vec<Value>> {
        match kind {
            NotificationType::Added => &mut self.added,
            NotificationType::Modified => &mut self.modified,
            NotificationType::Removed => &mut self.removed,
        }
    }

    pub fn entries(&self, kind: NotificationType) -> &[Value] {
        let slot = match kind {
            NotificationType::Added => &self.added,
            NotificationType::Modified => &self.modified,
            NotificationType::Removed => &self.removed,
        };
        slot.as_deref().unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        NotificationType::ALL.iter().all(|k| self.entries(*k).is_empty())
    }

    /// Validate an inbound JSON body against the fixed envelope schema.
    pub fn parse(body: &Value) -> Result<Self, ModelError> {
        let Value::Object(map) = body else {
            return Err(ModelError::validation("", "notification must be an object"));
        };
        for key in map.keys() {
            if !["serviceName", "added", "modified", "removed"].contains(&key.as_str()) {
                return Err(ModelError::validation(key.clone(), "is not allowed"));
            }
        }
        match map.get("serviceName") {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(_) => return Err(ModelError::validation("serviceName", "must be a non-empty string")),
            None => return Err(ModelError::validation("serviceName", "is required")),
        }
        for kind in NotificationType::ALL {
            match map.get(kind.as_str()) {
                None | Some(Value::Null) => {}
                Some(Value::Array(items)) => {
                    for (i, item) in items.iter().enumerate() {
                        if !item.is_object() {
                            return Err(ModelError::validation(format!("{kind}[{i}]"), "must be an object"));
                        }
                        if entity_id(item).is_none() {
                            return Err(ModelError::validation(format!("{kind}[{i}].id"), "is required"));
                        }
                    }
                }
                Some(_) => return Err(ModelError::validation(kind.as_str(), "must be an array")),
            }
        }
        let envelope: NotificationEnvelope =
            serde_json::from_value(body.clone()).map_err(|e| ModelError::validation("", e.to_string()))?;
        envelope.check_disjoint()?;
        Ok(envelope)
    }

    fn check_disjoint(&self) -> Result<(), ModelError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for kind in NotificationType::ALL {
            let mut in_list: HashSet<&str> = HashSet::new();
            for (i, entity) in self.entries(kind).iter().enumerate() {
                let Some(id) = entity_id(entity) else { continue };
                if in_list.insert(id) && !seen.insert(id) {
                    return Err(ModelError::validation(
                        format!("{kind}[{i}].id"),
                        format!("entity `{id}` appears in more than one list"),
                    ));
                }
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
    fn parses_valid_envelope() {
        let body = json!({"serviceName": "users", "modified": [{"id": "u1", "status": "disabled"}]});
        let env = NotificationEnvelope::parse(&body).unwrap();
        assert_eq!(env.service_name, "users");
        assert_eq!(env.entries(NotificationType::Modified).len(), 1);
        assert!(env.entries(NotificationType::Added).is_empty());
        assert_eq!(serde_json::to_value(&env).unwrap(), body);
    }

    #[test]
    fn rejects_schema_violations() {
        let cases = [
            (json!({"added": []}), "serviceName"),
            (json!({"serviceName": 3}), "serviceName"),
            (json!({"serviceName": "u", "added": {}}), "added"),
            (json!({"serviceName": "u", "removed": [{"name": "x"}]}), "removed[0].id"),
            (json!({"serviceName": "u", "extra": 1}), "extra"),
        ];
        for (body, path) in cases {
            match NotificationEnvelope::parse(&body) {
                Err(ModelError::Validation { path: p, .. }) => assert_eq!(p, path),
                other => panic!("expected validation error for {body}, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_id_in_two_lists() {
        let body = json!({"serviceName": "u", "added": [{"id": "1"}], "removed": [{"id": "1"}]});
        assert!(NotificationEnvelope::parse(&body).is_err());
    }

    #[test]
    fn new_fills_single_list() {
        let env = NotificationEnvelope::new("schools", NotificationType::Removed, vec![json!({"id": "s1"})]);
        assert!(env.added.is_none() && env.modified.is_none());
        assert_eq!(env.entries(NotificationType::Removed)[0]["id"], "s1");
    }
}
