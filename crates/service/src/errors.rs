use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use models::errors::ModelError;

/// User-facing message for faults nobody anticipated.
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error has occured";

/// Uniform failure shared by every layer. A failing result is forwarded as-is
/// with `?`; nothing re-wraps it on the way up.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("validation error: {message}")]
    Validation { message: String, error: Value },
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{service} responded {status}: {message}")]
    Downstream { service: String, status: u16, message: String, error: Value },
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ServiceError {
    /// Validation failure at a dotted field path.
    pub fn validation(path: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let text = if path.is_empty() { message.clone() } else { format!("{path}: {message}") };
        Self::Validation { message: text, error: json!({ "path": path, "message": message }) }
    }

    /// Several field failures reported together; the first one names the error.
    pub fn validation_many(errors: &[(String, String)]) -> Self {
        let Some((path, message)) = errors.first() else {
            return Self::validation("", "invalid entity");
        };
        let text = if path.is_empty() { message.clone() } else { format!("{path}: {message}") };
        let details: Vec<Value> = errors.iter().map(|(p, m)| json!({ "path": p, "message": m })).collect();
        Self::Validation { message: text, error: json!({ "path": path, "message": message, "details": details }) }
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::NotFound(format!("{entity} `{id}` not found"))
    }

    /// Connection-level failure reaching another service.
    pub fn unreachable(service: &str, err: impl std::fmt::Display) -> Self {
        Self::Downstream {
            service: service.to_string(),
            status: 502,
            message: format!("service `{service}` is unreachable"),
            error: Value::String(err.to_string()),
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::Precondition(_) => 400,
            Self::NotFound(_) => 404,
            Self::Downstream { status, .. } => *status,
            Self::Unexpected(_) => 500,
        }
    }

    /// Wire body: `{ message, error }`.
    pub fn body(&self) -> Value {
        match self {
            Self::Validation { message, error } => json!({ "message": message, "error": error }),
            Self::Precondition(message) => json!({ "message": message, "error": message }),
            Self::NotFound(message) => json!({ "message": message, "error": "Not Found" }),
            Self::Downstream { message, error, .. } => json!({ "message": message, "error": error }),
            Self::Unexpected(detail) => json!({ "message": UNKNOWN_ERROR_MESSAGE, "error": detail }),
        }
    }

    /// Rebuild an error from a remote `{ message, error }` response so that
    /// `status()` and `body()` match what the remote side produced.
    pub fn from_response(service: &str, status: u16, body: Value) -> Self {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{service} responded {status}"));
        let error = body.get("error").cloned().unwrap_or(Value::Null);
        match status {
            400 => Self::Validation { message, error },
            404 => Self::NotFound(message),
            500 => Self::Unexpected(match error {
                Value::String(s) => s,
                other => other.to_string(),
            }),
            _ => Self::Downstream { service: service.to_string(), status, message, error },
        }
    }
}

impl From<ModelError> for ServiceError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Validation { path, message } => Self::validation(&path, message),
        }
    }
}

/// Successful outcome: HTTP-like status plus JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub status: u16,
    pub value: Value,
}

impl Reply {
    pub fn ok(value: Value) -> Self { Self { status: 200, value } }

    pub fn created(value: Value) -> Self { Self { status: 201, value } }
}

pub type ServiceResult = Result<Reply, ServiceError>;

/// Flatten a result into the `{ status, value }` shape, errors carrying their body.
pub fn into_reply(result: ServiceResult) -> Reply {
    match result {
        Ok(reply) => reply,
        Err(e) => Reply { status: e.status(), value: e.body() },
    }
}
