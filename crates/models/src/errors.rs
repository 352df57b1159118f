use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// `path` is the dotted field path that failed, empty for whole-document errors.
    #[error("validation error at `{path}`: {message}")]
    Validation { path: String, message: String },
}

impl ModelError {
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { path: path.into(), message: message.into() }
    }
}
