//! Schema-driven document processing
//!
//! Turns a raw caller document into the document that is actually persisted:
//! declared fields only, in schema order, coerced to their declared types,
//! defaults filled in, required fields enforced on insert, and exactly one
//! lifecycle stamp (`createdAt` on insert, `updatedAt` on update).

use crate::config::PresencePolicy;
use crate::conversion::{coerce, is_truthy};
use crate::types::{FieldDescriptor, CREATED_AT, UPDATED_AT};
use bson::{Bson, DateTime, Document as BsonDocument};
use shoal_common::{Result, ShoalError};
use tracing::debug;

/// Which write path a document is processed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
}

impl WriteKind {
    pub fn from_is_update(is_update: bool) -> Self {
        if is_update {
            WriteKind::Update
        } else {
            WriteKind::Insert
        }
    }

    /// Lifecycle field stamped for this write path
    pub fn stamp_field(&self) -> &'static str {
        match self {
            WriteKind::Insert => CREATED_AT,
            WriteKind::Update => UPDATED_AT,
        }
    }
}

/// Document processor bound to one schema
#[derive(Debug, Clone, Copy)]
pub struct DocumentProcessor<'a> {
    fields: &'a [FieldDescriptor],
    presence: PresencePolicy,
}

impl<'a> DocumentProcessor<'a> {
    pub fn new(fields: &'a [FieldDescriptor], presence: PresencePolicy) -> Self {
        Self { fields, presence }
    }

    /// Produce the persisted shape of `input`
    ///
    /// # Errors
    /// - `ShoalError::MissingRequiredField` on insert when a required field
    ///   has neither a value nor a default
    /// - `ShoalError::Coercion` when a value cannot be cast to its type
    pub fn process(&self, input: &BsonDocument, kind: WriteKind, now: DateTime) -> Result<BsonDocument> {
        let mut output = BsonDocument::new();

        for field in self.fields {
            let value = match self.provided(input, &field.name) {
                Some(value) => value.clone(),
                None => match &field.default {
                    Some(default) => default.clone(),
                    None if kind == WriteKind::Insert && field.required => {
                        return Err(ShoalError::MissingRequiredField {
                            field: field.name.clone(),
                        });
                    }
                    None => continue,
                },
            };

            output.insert(field.name.clone(), coerce(&field.name, field.field_type, value)?);
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            let dropped: Vec<&str> = input
                .keys()
                .map(String::as_str)
                .filter(|key| !self.fields.iter().any(|f| f.name == *key))
                .collect();
            if !dropped.is_empty() {
                debug!(?dropped, "Dropping undeclared fields");
            }
        }

        output.insert(kind.stamp_field(), Bson::DateTime(now));
        Ok(output)
    }

    fn provided<'d>(&self, input: &'d BsonDocument, name: &str) -> Option<&'d Bson> {
        let value = input.get(name)?;
        match self.presence {
            PresencePolicy::Truthy if !is_truthy(value) => None,
            _ => Some(value),
        }
    }
}

/// Process one document against `fields` with the default presence policy
pub fn process_document(
    fields: &[FieldDescriptor],
    input: &BsonDocument,
    is_update: bool,
    now: DateTime,
) -> Result<BsonDocument> {
    DocumentProcessor::new(fields, PresencePolicy::default()).process(
        input,
        WriteKind::from_is_update(is_update),
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;
    use bson::doc;

    fn user_schema() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("email", FieldType::String).required(),
            FieldDescriptor::new("name", FieldType::String),
            FieldDescriptor::new("age", FieldType::Number).default_value(99),
            FieldDescriptor::new("active", FieldType::Boolean).default_value(true),
            FieldDescriptor::new("tags", FieldType::Array),
            FieldDescriptor::new("nickname", FieldType::String).default_value(Bson::Null),
        ]
    }

    fn at(millis: i64) -> DateTime {
        DateTime::from_millis(millis)
    }

    #[test]
    fn test_insert_applies_defaults_and_stamps_created_at() {
        let fields = user_schema();
        let output = process_document(&fields, &doc! { "email": "x@y.com" }, false, at(1_000)).unwrap();

        assert_eq!(
            output,
            doc! {
                "email": "x@y.com",
                "age": 99,
                "active": true,
                "nickname": Bson::Null,
                "createdAt": at(1_000),
            }
        );
        assert!(!output.contains_key(UPDATED_AT));
    }

    #[test]
    fn test_output_follows_schema_order() {
        let fields = user_schema();
        let input = doc! { "tags": "a", "name": "A", "email": "x@y.com" };
        let output = process_document(&fields, &input, false, at(0)).unwrap();
        let keys: Vec<&str> = output.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["email", "name", "age", "active", "tags", "nickname", "createdAt"]);
    }

    #[test]
    fn test_missing_required_field_on_insert() {
        let fields = user_schema();
        let err = process_document(&fields, &doc! { "name": "A" }, false, at(0)).unwrap_err();
        assert!(matches!(err, ShoalError::MissingRequiredField { ref field } if field == "email"));
    }

    #[test]
    fn test_update_skips_required_check_and_stamps_updated_at() {
        let fields = user_schema();
        let output = process_document(&fields, &doc! { "name": "B" }, true, at(2_000)).unwrap();
        assert_eq!(output.get_str("name").unwrap(), "B");
        assert!(!output.contains_key("email"));
        assert_eq!(output.get_datetime(UPDATED_AT).unwrap(), &at(2_000));
        assert!(!output.contains_key(CREATED_AT));
    }

    #[test]
    fn test_undeclared_fields_are_dropped() {
        let fields = user_schema();
        let input = doc! { "email": "x@y.com", "isAdmin": true, "$where": "1" };
        let output = process_document(&fields, &input, false, at(0)).unwrap();
        assert!(!output.contains_key("isAdmin"));
        assert!(!output.contains_key("$where"));
    }

    #[test]
    fn test_caller_lifecycle_fields_are_replaced() {
        let fields = user_schema();
        let input = doc! { "email": "x@y.com", "createdAt": at(5), "updatedAt": at(6) };
        let output = process_document(&fields, &input, false, at(7)).unwrap();
        assert_eq!(output.get_datetime(CREATED_AT).unwrap(), &at(7));
        assert!(!output.contains_key(UPDATED_AT));
    }

    #[test]
    fn test_truthy_policy_prefers_default_over_falsy_input() {
        let fields = user_schema();
        let input = doc! { "email": "x@y.com", "age": 0, "active": false };
        let output = process_document(&fields, &input, false, at(0)).unwrap();
        assert_eq!(output.get_i32("age").unwrap(), 99);
        assert!(output.get_bool("active").unwrap());
    }

    #[test]
    fn test_truthy_policy_empty_required_string_is_missing() {
        let fields = user_schema();
        let err = process_document(&fields, &doc! { "email": "" }, false, at(0)).unwrap_err();
        assert!(matches!(err, ShoalError::MissingRequiredField { .. }));
    }

    #[test]
    fn test_explicit_policy_keeps_falsy_input() {
        let fields = user_schema();
        let processor = DocumentProcessor::new(&fields, PresencePolicy::Explicit);
        let input = doc! { "email": "x@y.com", "age": 0, "active": false };
        let output = processor.process(&input, WriteKind::Insert, at(0)).unwrap();
        assert_eq!(output.get_i32("age").unwrap(), 0);
        assert!(!output.get_bool("active").unwrap());
    }

    #[test]
    fn test_provided_values_are_coerced() {
        let fields = vec![
            FieldDescriptor::new("age", FieldType::Number),
            FieldDescriptor::new("tags", FieldType::Array),
            FieldDescriptor::new("born", FieldType::Date),
        ];
        let input = doc! { "age": "42", "tags": "solo", "born": "2024-01-01" };
        let output = process_document(&fields, &input, false, at(0)).unwrap();
        assert_eq!(output.get_i32("age").unwrap(), 42);
        assert_eq!(output.get_array("tags").unwrap(), &vec![Bson::String("solo".into())]);
        assert_eq!(output.get_datetime("born").unwrap(), &at(1_704_067_200_000));
    }

    #[test]
    fn test_coercion_failure_propagates() {
        let fields = vec![FieldDescriptor::new("age", FieldType::Number)];
        let err = process_document(&fields, &doc! { "age": "old" }, false, at(0)).unwrap_err();
        assert!(matches!(err, ShoalError::Coercion { .. }));
    }

    #[test]
    fn test_same_clock_reading_gives_identical_output() {
        let fields = user_schema();
        let input = doc! { "email": "x@y.com", "tags": ["a"], "name": "A" };
        let first = process_document(&fields, &input, false, at(42)).unwrap();
        let second = process_document(&fields, &input, false, at(42)).unwrap();
        assert_eq!(first, second);

        let later = process_document(&fields, &input, false, at(43)).unwrap();
        let mut without_stamp = later.clone();
        without_stamp.remove(CREATED_AT);
        let mut first_without_stamp = first.clone();
        first_without_stamp.remove(CREATED_AT);
        assert_eq!(without_stamp, first_without_stamp);
        assert_ne!(later, first);
    }
}
