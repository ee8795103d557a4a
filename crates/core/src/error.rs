//! Error taxonomy shared by the engine and its adapters.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Bad regex/duration/PEM, missing secret key, template render failure.
    #[error("config: {0}")]
    Config(String),
    #[error("network: {0}")]
    Network(String),
    #[error("http call failed: status={status} body={body}")]
    Status { status: u16, body: String },
    #[error("http call failed after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),
    #[error("store: {0}")]
    Store(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self { EngineError::Config(msg.into()) }

    /// Reason recorded on the `Ready` condition when a dispatch fails with this error.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "InvalidConfig",
            EngineError::Network(_) | EngineError::Status { .. } | EngineError::Exhausted { .. } => "ActionFailed",
            EngineError::NotFound(_) => "ReferenceNotFound",
            EngineError::Conflict(_) | EngineError::Store(_) => "StoreError",
            EngineError::UnknownResourceType(_) => "UnknownResourceType",
        }
    }

    pub fn is_conflict(&self) -> bool { matches!(self, EngineError::Conflict(_)) }

    pub fn is_not_found(&self) -> bool { matches!(self, EngineError::NotFound(_)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_carries_code_and_body() {
        let e = EngineError::Status { status: 404, body: "nope".into() };
        assert_eq!(e.to_string(), "http call failed: status=404 body=nope");
        assert_eq!(e.reason(), "ActionFailed");
    }

    #[test]
    fn classification_helpers() {
        assert!(EngineError::Conflict("rv".into()).is_conflict());
        assert!(EngineError::NotFound("x".into()).is_not_found());
        assert_eq!(EngineError::config("bad regex").reason(), "InvalidConfig");
    }
}
