//! Per-request context carried through every layer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the tenant identifier.
pub const TENANT_HEADER: &str = "x-tenant-id";
/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub tenant: Option<String>,
    pub request_id: String,
}

impl RequestContext {
    /// Context without a tenant and with a fresh request id.
    pub fn new() -> Self {
        Self { tenant: None, request_id: Uuid::new_v4().to_string() }
    }

    pub fn for_tenant(tenant: impl Into<String>) -> Self {
        Self::new().with_tenant(tenant)
    }

    /// Same request, different tenant. Used when a notification fans out into several tenants.
    pub fn with_tenant(&self, tenant: impl Into<String>) -> Self {
        Self { tenant: Some(tenant.into()), request_id: self.request_id.clone() }
    }

    /// Build from raw header values; blank values count as absent.
    pub fn from_headers(tenant: Option<&str>, request_id: Option<&str>) -> Self {
        let tenant = tenant.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string);
        let request_id = request_id
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self { tenant, request_id }
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }
}

impl Default for RequestContext {
    fn default() -> Self { Self::new() }
}
