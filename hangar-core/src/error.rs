//! Error types for Hangar operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::ErrorClass;

/// A single field-level rejection reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failures reported by a backend transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    #[error("Transient failure (status {status:?}): {message}")]
    Transient { status: Option<u16>, message: String },

    #[error("Operation {operation} is not supported by {resource}")]
    Unsupported { resource: String, operation: String },

    #[error("Failed to decode response: {reason}")]
    Decode { reason: String },
}

impl TransportError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transient {
            status,
            message: message.into(),
        }
    }

    pub fn unsupported(resource: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            resource: resource.into(),
            operation: operation.into(),
        }
    }

    /// Where this failure sits in the retry taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation { .. } => ErrorClass::Validation,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::Transient { .. } => ErrorClass::Transient,
            Self::Unsupported { .. } | Self::Decode { .. } => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// Field-level detail, empty for anything but validation failures.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation { fields, .. } => fields,
            _ => &[],
        }
    }
}

/// Query key construction errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Query key namespace must not be empty")]
    EmptyNamespace,

    #[error("Failed to serialize query parameters: {reason}")]
    Serialization { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or HANGAR_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Master error type for all Hangar errors.
///
/// Every variant is `Clone` so a single coalesced fetch result can be handed
/// to each waiting reader.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HangarError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cached value for {key} does not have the requested type")]
    TypeMismatch { key: String },

    #[error("Background fetch for {key} did not complete: {reason}")]
    FetchAborted { key: String, reason: String },
}

impl HangarError {
    /// The transport failure behind this error, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type alias for Hangar operations.
pub type HangarResult<T> = Result<T, HangarError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display_not_found() {
        let err = TransportError::not_found("clients", "42");
        let msg = format!("{}", err);
        assert!(msg.contains("Not found"));
        assert!(msg.contains("clients"));
        assert!(msg.contains("42"));
    }

    #[test]
    fn test_transport_error_classes() {
        assert_eq!(
            TransportError::validation("bad").class(),
            ErrorClass::Validation
        );
        assert_eq!(
            TransportError::not_found("services", "7").class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            TransportError::transient(Some(503), "unavailable").class(),
            ErrorClass::Transient
        );
        assert_eq!(
            TransportError::unsupported("categories", "restore").class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(TransportError::transient(None, "connection reset").is_retryable());
        assert!(!TransportError::not_found("clients", "1").is_retryable());
        assert!(!TransportError::validation("name is required").is_retryable());
        assert!(!TransportError::Decode {
            reason: "eof".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_field_errors_only_on_validation() {
        let err = TransportError::Validation {
            message: "invalid".to_string(),
            fields: vec![FieldError::new("email", "is taken")],
        };
        assert_eq!(err.field_errors().len(), 1);
        assert_eq!(err.field_errors()[0].field, "email");
        assert!(TransportError::transient(Some(500), "boom")
            .field_errors()
            .is_empty());
    }

    #[test]
    fn test_hangar_error_from_transport() {
        let err: HangarError = TransportError::not_found("clients", "9").into();
        assert!(matches!(err, HangarError::Transport(_)));
        assert_eq!(
            err.transport(),
            Some(&TransportError::not_found("clients", "9"))
        );
        assert!(format!("{}", err).contains("Transport error"));
    }
}
