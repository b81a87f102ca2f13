//! Error taxonomy for the Raxm protocol.

use serde::Serialize;
use thiserror::Error;

/// Coarse classification used by transports to pick a status code and by
/// the dispatcher to decide whether component code may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The server memo failed checksum verification. Possible tampering.
    Integrity,
    /// Missing header, malformed envelope, unknown update type.
    Protocol,
    /// Missing component/method/property or a failure inside component code.
    Application,
    /// A signed upload URL was expired or forged.
    UploadSignature,
}

/// Errors that can occur while handling a Raxm message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RaxmError {
    #[error("checksum mismatch for component {component}")]
    ChecksumMismatch { component: String },
    #[error("missing protocol header: {0}")]
    MissingHeader(String),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("unknown action type: {0}")]
    UnknownAction(String),
    #[error("component not found: {0}")]
    ComponentNotFound(String),
    #[error("method not found on {component}: {method}")]
    MethodNotFound { component: String, method: String },
    #[error("property not found on {component}: {property}")]
    PropertyNotFound { component: String, property: String },
    #[error("property {property} expects {expected}")]
    PropertyTypeMismatch {
        property: String,
        expected: &'static str,
    },
    #[error("invalid property path: {0}")]
    InvalidPath(String),
    #[error("component error: {0}")]
    Component(String),
    #[error("upload signature rejected: {0}")]
    UploadSignature(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RaxmError {
    /// Error raised from inside component logic.
    pub fn component(message: impl Into<String>) -> Self {
        Self::Component(message.into())
    }

    pub fn malformed(error: impl std::fmt::Display) -> Self {
        Self::MalformedEnvelope(error.to_string())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ChecksumMismatch { .. } => ErrorClass::Integrity,
            Self::MissingHeader(_) | Self::MalformedEnvelope(_) | Self::UnknownAction(_) => {
                ErrorClass::Protocol
            }
            Self::UploadSignature(_) => ErrorClass::UploadSignature,
            Self::ComponentNotFound(_)
            | Self::MethodNotFound { .. }
            | Self::PropertyNotFound { .. }
            | Self::PropertyTypeMismatch { .. }
            | Self::InvalidPath(_)
            | Self::Component(_)
            | Self::Serialization(_) => ErrorClass::Application,
        }
    }

    /// Integrity and protocol errors must be raised before component code runs.
    pub fn is_boundary_error(&self) -> bool {
        matches!(self.class(), ErrorClass::Integrity | ErrorClass::Protocol)
    }
}

/// Convenience result type for protocol operations.
pub type RaxmResult<T> = Result<T, RaxmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_taxonomy() {
        let checksum = RaxmError::ChecksumMismatch {
            component: "counter".into(),
        };
        assert_eq!(checksum.class(), ErrorClass::Integrity);
        assert!(checksum.is_boundary_error());

        assert_eq!(
            RaxmError::UnknownAction("teleport".into()).class(),
            ErrorClass::Protocol
        );
        let missing = RaxmError::MethodNotFound {
            component: "counter".into(),
            method: "hydrate".into(),
        };
        assert_eq!(missing.class(), ErrorClass::Application);
        assert!(!missing.is_boundary_error());
        assert_eq!(missing.to_string(), "method not found on counter: hydrate");
    }
}
