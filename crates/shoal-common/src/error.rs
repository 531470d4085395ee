//! Error types for shoal

use thiserror::Error;

/// Result type alias for shoal operations
pub type Result<T> = std::result::Result<T, ShoalError>;

/// Unified error type for all shoal operations
#[derive(Error, Debug, Clone)]
pub enum ShoalError {
    /// Error reported by the MongoDB driver, carried through untouched
    #[cfg(feature = "mongodb-errors")]
    #[error("MongoDB error: {0}")]
    MongoDB(Box<mongodb::error::Error>),

    /// Invalid model declaration (reserved or duplicate field names, bad defaults)
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Insert without a value or default for a required field
    #[error("Validation error: required field '{field}' is missing")]
    MissingRequiredField { field: String },

    /// Provided value cannot be cast to the declared field type
    #[error("Cannot coerce field '{field}' to {expected}: got {found}")]
    Coercion {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    /// Unique index violation
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShoalError {
    /// Returns true if this is a constraint violation error
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            ShoalError::Conflict(_) => true,
            #[cfg(feature = "mongodb-errors")]
            ShoalError::MongoDB(err) => is_duplicate_key(err),
            _ => false,
        }
    }

    /// Returns true if the error was raised while processing a document
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ShoalError::Validation(_)
                | ShoalError::MissingRequiredField { .. }
                | ShoalError::Coercion { .. }
        )
    }
}

#[cfg(feature = "mongodb-errors")]
fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};

    // 11000 is the server's duplicate key error code
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        ErrorKind::Command(command_error) => command_error.code == 11000,
        ErrorKind::InsertMany(insert_many) => insert_many
            .write_errors
            .as_ref()
            .is_some_and(|errors| errors.iter().any(|e| e.code == 11000)),
        _ => false,
    }
}

impl From<serde_json::Error> for ShoalError {
    fn from(err: serde_json::Error) -> Self {
        ShoalError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for ShoalError {
    fn from(err: mongodb::error::Error) -> Self {
        ShoalError::MongoDB(Box::new(err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for ShoalError {
    fn from(err: bson::ser::Error) -> Self {
        ShoalError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for ShoalError {
    fn from(err: bson::de::Error) -> Self {
        ShoalError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_configuration() {
        let err = ShoalError::Configuration("field 'createdAt' is reserved".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: field 'createdAt' is reserved"
        );
    }

    #[test]
    fn test_error_display_missing_required_field() {
        let err = ShoalError::MissingRequiredField {
            field: "email".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Validation error: required field 'email' is missing"
        );
    }

    #[test]
    fn test_error_display_coercion() {
        let err = ShoalError::Coercion {
            field: "age".to_string(),
            expected: "Number".to_string(),
            found: "\"abc\"".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot coerce field 'age' to Number: got \"abc\""
        );
    }

    #[test]
    fn test_error_display_conflict() {
        let err = ShoalError::Conflict("duplicate key value".to_string());
        assert_eq!(err.to_string(), "Conflict: duplicate key value");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: ShoalError = json_err.into();
        assert!(matches!(err, ShoalError::Serialization(_)));
    }

    #[test]
    fn test_is_validation() {
        assert!(ShoalError::Validation("test".to_string()).is_validation());
        assert!(ShoalError::MissingRequiredField {
            field: "name".to_string()
        }
        .is_validation());
        assert!(ShoalError::Coercion {
            field: "a".to_string(),
            expected: "Date".to_string(),
            found: "x".to_string(),
        }
        .is_validation());
        assert!(!ShoalError::Configuration("test".to_string()).is_validation());
        assert!(!ShoalError::Query("test".to_string()).is_validation());
    }

    #[test]
    fn test_is_constraint_violation() {
        assert!(ShoalError::Conflict("test".to_string()).is_constraint_violation());
        assert!(!ShoalError::Validation("test".to_string()).is_constraint_violation());
        assert!(!ShoalError::Internal("test".to_string()).is_constraint_violation());
    }
}
