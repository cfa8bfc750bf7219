//! Unified error types for the encounter core library.
//!
//! This module provides a unified error type [`EncounterError`] that covers all
//! failure modes across the encounter tracker. The configuration module keeps its
//! own [`ConfigError`](crate::config::ConfigError) for internal use.
//!
//! Most of these errors never reach a caller of the tracker: malformed triggers,
//! unknown friends in a restored snapshot and failed writes inside an update are
//! logged and absorbed. They surface only from the validating entry points
//! (friend list parsing, configuration loading, direct storage access).
//!
//! # Example
//!
//! ```rust
//! use encounter_core::error::{EncounterError, Result};
//!
//! fn require_name(name: &str) -> Result<&str> {
//!     if name.is_empty() {
//!         return Err(EncounterError::MalformedFriendRecord {
//!             record: name.to_string(),
//!             fields: 0,
//!         });
//!     }
//!     Ok(name)
//! }
//! ```

use thiserror::Error;

/// The unified error type for all encounter tracker operations.
#[derive(Debug, Error)]
pub enum EncounterError {
    // =========================================================================
    // INPUT ERRORS
    // =========================================================================
    /// A friend list record did not have the `name-majorId-minorId[-tag]` shape.
    #[error(
        "Malformed friend record '{record}': expected 'name-majorId-minorId[-tag]' with non-empty name and ids (found {fields} dash-separated field(s))"
    )]
    MalformedFriendRecord {
        /// The offending record, as supplied.
        record: String,
        /// Number of dash-separated fields found.
        fields: usize,
    },

    /// A storage key contained characters outside `[A-Za-z0-9._-]`.
    #[error("Invalid storage key: '{0}'")]
    InvalidStorageKey(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration sources could not be read or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading state.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Persisted state could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for encounter tracker operations.
pub type Result<T> = std::result::Result<T, EncounterError>;

impl EncounterError {
    /// Returns `true` if this error was caused by malformed caller input.
    #[inline]
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedFriendRecord { .. } | Self::InvalidStorageKey(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_persistence_error(&self) -> bool {
        matches!(
            self,
            Self::PersistenceError(_) | Self::SerializationError(_) | Self::IoError(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::MalformedFriendRecord { .. } | Self::InvalidStorageKey(_) => 400,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::SerializationError(_) | Self::IoError(_) => 500,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedFriendRecord { .. } => "MALFORMED_FRIEND_RECORD",
            Self::InvalidStorageKey(_) => "INVALID_STORAGE_KEY",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::SerializationError(_) => "SERIALIZATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for EncounterError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    fn malformed() -> EncounterError {
        EncounterError::MalformedFriendRecord {
            record: "Sam".into(),
            fields: 1,
        }
    }

    #[test]
    fn test_input_error_classification() {
        assert!(malformed().is_input_error());
        assert!(EncounterError::InvalidStorageKey("../x".into()).is_input_error());

        assert!(!EncounterError::PersistenceError("disk full".into()).is_input_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(EncounterError::ConfigParseError("syntax".into()).is_config_error());
        assert!(EncounterError::ConfigValidationError("port".into()).is_config_error());

        assert!(!malformed().is_config_error());
    }

    #[test]
    fn test_persistence_error_classification() {
        assert!(EncounterError::PersistenceError("disk full".into()).is_persistence_error());
        assert!(EncounterError::IoError(IoErr::new(ErrorKind::NotFound, "x")).is_persistence_error());
        let json_err = serde_json::from_str::<u64>("nope").unwrap_err();
        assert!(EncounterError::from(json_err).is_persistence_error());

        assert!(!malformed().is_persistence_error());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(malformed().http_status_code(), 400);
        assert_eq!(
            EncounterError::ConfigValidationError("x".into()).http_status_code(),
            422
        );
        assert_eq!(
            EncounterError::PersistenceError("x".into()).http_status_code(),
            500
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(malformed().error_code(), "MALFORMED_FRIEND_RECORD");
        assert_eq!(
            EncounterError::InvalidStorageKey("x y".into()).error_code(),
            "INVALID_STORAGE_KEY"
        );
    }

    #[test]
    fn test_error_display_messages() {
        let message = malformed().to_string();
        assert!(message.contains("'Sam'"));
        assert!(message.contains("1 dash-separated"));
    }

    #[test]
    fn test_from_validation_error() {
        let err: EncounterError = crate::config::ConfigError::ValidationError {
            field: "server.port".into(),
            message: "must be non-zero".into(),
        }
        .into();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("server.port"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<EncounterError>();
        assert_sync::<EncounterError>();
    }
}
