//! Value coercion for declared field types
//!
//! Every value written through a [`Model`](crate::Model), provided or taken
//! from a default, is cast to its field's declared type here. Explicit null
//! is kept as null for every type.

use crate::types::FieldType;
use bson::{Bson, DateTime};
use shoal_common::{Result, ShoalError};

/// JavaScript-style truthiness of a BSON value
///
/// `null`, `false`, `0`, `0.0`, `NaN` and `""` are falsy; everything else,
/// including empty arrays and documents, is truthy.
pub fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => false,
        Bson::Boolean(b) => *b,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0 && !f.is_nan(),
        Bson::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Cast `value` to `field_type`
///
/// # Errors
/// Returns `ShoalError::Coercion` when the value has no sensible
/// representation in the target type (e.g. `"abc"` as a Number).
pub fn coerce(field: &str, field_type: FieldType, value: Bson) -> Result<Bson> {
    if matches!(value, Bson::Null) {
        return Ok(Bson::Null);
    }

    match field_type {
        FieldType::String | FieldType::Mixed => Ok(value),
        FieldType::Number => to_number(field, value),
        FieldType::Boolean => Ok(Bson::Boolean(is_truthy(&value))),
        FieldType::Date => to_date(field, value),
        FieldType::ObjectId => to_object_id_string(field, value),
        FieldType::Array => Ok(match value {
            Bson::Array(items) => Bson::Array(items),
            other => Bson::Array(vec![other]),
        }),
        FieldType::Object => match value {
            Bson::Document(doc) => Ok(Bson::Document(doc)),
            other => Err(mismatch(field, FieldType::Object, &other)),
        },
    }
}

fn to_number(field: &str, value: Bson) -> Result<Bson> {
    match value {
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => Ok(value),
        Bson::Boolean(b) => Ok(Bson::Int32(i32::from(b))),
        Bson::DateTime(dt) => Ok(Bson::Int64(dt.timestamp_millis())),
        Bson::String(ref s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(Bson::Int32(0));
            }
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(match i32::try_from(i) {
                    Ok(small) => Bson::Int32(small),
                    Err(_) => Bson::Int64(i),
                });
            }
            trimmed
                .parse::<f64>()
                .map(Bson::Double)
                .map_err(|_| mismatch(field, FieldType::Number, &value))
        }
        other => Err(mismatch(field, FieldType::Number, &other)),
    }
}

fn to_date(field: &str, value: Bson) -> Result<Bson> {
    match value {
        Bson::DateTime(dt) => Ok(Bson::DateTime(dt)),
        Bson::Timestamp(ts) => Ok(Bson::DateTime(DateTime::from_millis(
            i64::from(ts.time) * 1000,
        ))),
        Bson::Int32(millis) => Ok(Bson::DateTime(DateTime::from_millis(i64::from(millis)))),
        Bson::Int64(millis) => Ok(Bson::DateTime(DateTime::from_millis(millis))),
        Bson::Double(millis) if millis.is_finite() => {
            Ok(Bson::DateTime(DateTime::from_millis(millis as i64)))
        }
        Bson::String(ref s) => parse_date(s.trim())
            .map(Bson::DateTime)
            .ok_or_else(|| mismatch(field, FieldType::Date, &value)),
        other => Err(mismatch(field, FieldType::Date, &other)),
    }
}

/// Parse an RFC 3339 instant or a bare `YYYY-MM-DD` date (midnight UTC)
fn parse_date(s: &str) -> Option<DateTime> {
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(DateTime::from_chrono(parsed));
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| DateTime::from_chrono(naive.and_utc()))
}

fn to_object_id_string(field: &str, value: Bson) -> Result<Bson> {
    match value {
        Bson::ObjectId(oid) => Ok(Bson::String(oid.to_hex())),
        Bson::String(s) => Ok(Bson::String(s)),
        Bson::Int32(i) => Ok(Bson::String(i.to_string())),
        Bson::Int64(i) => Ok(Bson::String(i.to_string())),
        Bson::Double(f) => Ok(Bson::String(f.to_string())),
        Bson::Boolean(b) => Ok(Bson::String(b.to_string())),
        other => Err(mismatch(field, FieldType::ObjectId, &other)),
    }
}

fn mismatch(field: &str, expected: FieldType, found: &Bson) -> ShoalError {
    ShoalError::Coercion {
        field: field.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    }
}
