//! Static reference declarations: which fields embed snapshots of which service's entities.

use crate::projection::Projection;

/// Where the foreign id of a reference comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReferenceKey {
    /// The field itself holds the id(s): `"u1"`, `{ "id": "u1" }` or an array of either.
    Embedded,
    /// The entity shares its id with the referenced entity (e.g. a professor is keyed by its user id).
    OwnId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceDeclaration {
    pub field: String,
    pub target_service: String,
    pub is_array: bool,
    pub projection: Projection,
    pub key: ReferenceKey,
}

impl ReferenceDeclaration {
    /// Single-valued reference.
    pub fn one(field: impl Into<String>, target_service: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            target_service: target_service.into(),
            is_array: false,
            projection: Projection::all(),
            key: ReferenceKey::Embedded,
        }
    }

    /// Array-valued reference.
    pub fn many(field: impl Into<String>, target_service: impl Into<String>) -> Self {
        Self { is_array: true, ..Self::one(field, target_service) }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn keyed_by_own_id(mut self) -> Self {
        self.key = ReferenceKey::OwnId;
        self
    }
}
