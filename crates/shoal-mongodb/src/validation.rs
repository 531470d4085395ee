//! Model declaration validation
//!
//! Everything here runs once, when a [`Model`](crate::Model) is built. A
//! model that fails these checks never reaches the database.
//!
//! - Collection name validation (no system collections, no `$`)
//! - Field name validation (no operator-looking names, no reserved names)
//! - Default value type checks against the declared [`FieldType`]

use crate::types::{FieldDescriptor, FieldType, RESERVED_FIELDS};
use bson::Bson;
use shoal_common::{Result, ShoalError};
use std::collections::HashSet;
use tracing::warn;

/// Maximum allowed length for collection names (MongoDB limit is 255, we're more conservative)
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

/// Maximum allowed length for field names
const MAX_FIELD_NAME_LENGTH: usize = 1024;

/// Validated collection name
///
/// # Guarantees
/// - Not empty
/// - Maximum 120 characters
/// - No null bytes
/// - No "system." prefix (system collections)
/// - No $ characters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCollectionName {
    name: String,
}

impl ValidatedCollectionName {
    /// Creates a new validated collection name
    ///
    /// # Errors
    /// Returns `ShoalError::Validation` if any guarantee above does not hold.
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(ShoalError::Validation(
                "Collection name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(ShoalError::Validation(format!(
                "Collection name exceeds maximum length of {} characters: '{}'",
                MAX_COLLECTION_NAME_LENGTH, name
            )));
        }

        if name.contains('\0') {
            return Err(ShoalError::Validation(
                "Collection name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with("system.") {
            return Err(ShoalError::Validation(format!(
                "Collection name cannot start with 'system.' (reserved): '{}'",
                name
            )));
        }

        if name.contains('$') {
            return Err(ShoalError::Validation(format!(
                "Collection name cannot contain '$' character: '{}'",
                name
            )));
        }

        if name.contains("..") || name.contains("//") {
            warn!(collection = name, "Collection name contains suspicious pattern");
        }

        Ok(ValidatedCollectionName {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedCollectionName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Validated schema field name
///
/// # Guarantees
/// - Not empty
/// - Maximum 1024 characters
/// - No null bytes
/// - No `$` prefix (reserved for operators)
/// - No `.` (a declared field is always top level)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFieldName {
    name: String,
}

impl ValidatedFieldName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(ShoalError::Validation(
                "Field name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_FIELD_NAME_LENGTH {
            return Err(ShoalError::Validation(format!(
                "Field name exceeds maximum length of {} characters",
                MAX_FIELD_NAME_LENGTH
            )));
        }

        if name.contains('\0') {
            return Err(ShoalError::Validation(
                "Field name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with('$') {
            return Err(ShoalError::Validation(format!(
                "Field name cannot start with '$' (reserved for operators): '{}'",
                name
            )));
        }

        if name.contains('.') {
            return Err(ShoalError::Validation(format!(
                "Field name cannot contain '.': '{}'",
                name
            )));
        }

        Ok(ValidatedFieldName {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedFieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Check that a default value is compatible with its declared type
///
/// Null is accepted for String, Number, Object and ObjectId but not for
/// Boolean, Date or Array.
pub fn default_matches_type(field_type: FieldType, value: &Bson) -> bool {
    match field_type {
        FieldType::String => matches!(value, Bson::String(_) | Bson::Null),
        FieldType::Number => matches!(
            value,
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) | Bson::Null
        ),
        FieldType::Boolean => matches!(value, Bson::Boolean(_)),
        FieldType::Date => matches!(value, Bson::DateTime(_)),
        FieldType::Array => matches!(value, Bson::Array(_)),
        FieldType::Object => matches!(value, Bson::Document(_) | Bson::Null),
        FieldType::ObjectId => matches!(value, Bson::String(_) | Bson::ObjectId(_) | Bson::Null),
        FieldType::Mixed => true,
    }
}

/// Validate a full schema declaration
///
/// # Errors
/// Returns `ShoalError::Configuration` naming the offending field when a
/// field name is invalid, reserved or declared twice, or when a default does
/// not match its declared type.
pub fn validate_schema(fields: &[FieldDescriptor]) -> Result<()> {
    let mut seen = HashSet::with_capacity(fields.len());

    for field in fields {
        ValidatedFieldName::new(&field.name).map_err(into_configuration)?;

        if RESERVED_FIELDS.contains(&field.name.as_str()) {
            return Err(ShoalError::Configuration(format!(
                "Field name '{}' is reserved for lifecycle timestamps",
                field.name
            )));
        }

        if !seen.insert(field.name.as_str()) {
            return Err(ShoalError::Configuration(format!(
                "Field '{}' is declared more than once",
                field.name
            )));
        }

        if let Some(default) = &field.default {
            if !default_matches_type(field.field_type, default) {
                return Err(ShoalError::Configuration(format!(
                    "Default value for field '{}' must be of type {}, got {:?}",
                    field.name,
                    field.field_type,
                    default.element_type()
                )));
            }
        }
    }

    Ok(())
}

/// Re-tag a name validation failure as a declaration error
pub(crate) fn into_configuration(err: ShoalError) -> ShoalError {
    match err {
        ShoalError::Validation(msg) => ShoalError::Configuration(msg),
        other => other,
    }
}
