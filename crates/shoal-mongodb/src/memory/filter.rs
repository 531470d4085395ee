//! Query filter evaluation, sorting and projection over in-memory documents

use bson::{Bson, Document as BsonDocument};
use shoal_common::{Result, ShoalError};
use std::cmp::Ordering;

/// Resolve a dotted path (`address.city`) inside a document
pub(crate) fn get_path<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = doc.get(first)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Numeric view of a BSON value, if it is a number
fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

/// Equality with numeric types compared by value
pub(crate) fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering between comparable values of the same kind
pub(crate) fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Ordering used by sort: missing/null values sort first
fn sort_order(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (None | Some(Bson::Null), None | Some(Bson::Null)) => Ordering::Equal,
        (None | Some(Bson::Null), _) => Ordering::Less,
        (_, None | Some(Bson::Null)) => Ordering::Greater,
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
    }
}

/// True when `value` (possibly an array) equals `expected`
fn matches_value(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        Some(actual) if values_equal(actual, expected) => true,
        Some(Bson::Array(items)) => items.iter().any(|item| values_equal(item, expected)),
        None => matches!(expected, Bson::Null),
        _ => false,
    }
}

fn is_operator_document(value: &Bson) -> Option<&BsonDocument> {
    match value {
        Bson::Document(doc) if !doc.is_empty() && doc.keys().all(|k| k.starts_with('$')) => Some(doc),
        _ => None,
    }
}

fn compare_op(value: Option<&Bson>, operand: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let check = |actual: &Bson| compare_values(actual, operand).is_some_and(accept);
    match value {
        Some(Bson::Array(items)) => items.iter().any(check),
        Some(actual) => check(actual),
        None => false,
    }
}

fn operand_list<'a>(operator: &str, operand: &'a Bson) -> Result<&'a Vec<Bson>> {
    match operand {
        Bson::Array(items) => Ok(items),
        _ => Err(ShoalError::Query(format!("{} requires an array", operator))),
    }
}

fn matches_operators(value: Option<&Bson>, operators: &BsonDocument) -> Result<bool> {
    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => matches_value(value, operand),
            "$ne" => !matches_value(value, operand),
            "$gt" => compare_op(value, operand, |o| o == Ordering::Greater),
            "$gte" => compare_op(value, operand, |o| o != Ordering::Less),
            "$lt" => compare_op(value, operand, |o| o == Ordering::Less),
            "$lte" => compare_op(value, operand, |o| o != Ordering::Greater),
            "$in" => operand_list(operator, operand)?
                .iter()
                .any(|candidate| matches_value(value, candidate)),
            "$nin" => !operand_list(operator, operand)?
                .iter()
                .any(|candidate| matches_value(value, candidate)),
            "$exists" => value.is_some() == crate::conversion::is_truthy(operand),
            other => {
                return Err(ShoalError::Query(format!(
                    "Unsupported query operator in memory driver: '{}'",
                    other
                )))
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(operator: &str, operand: &'a Bson) -> Result<Vec<&'a BsonDocument>> {
    operand_list(operator, operand)?
        .iter()
        .map(|item| match item {
            Bson::Document(doc) => Ok(doc),
            _ => Err(ShoalError::Query(format!("{} entries must be documents", operator))),
        })
        .collect()
}

/// Evaluate a filter against a document
pub(crate) fn matches(doc: &BsonDocument, filter: &BsonDocument) -> Result<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            other if other.starts_with('$') => {
                return Err(ShoalError::Query(format!(
                    "Unsupported top-level operator in memory driver: '{}'",
                    other
                )))
            }
            path => {
                let value = get_path(doc, path);
                match is_operator_document(condition) {
                    Some(operators) => matches_operators(value, operators)?,
                    None => matches_value(value, condition),
                }
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Fields of a filter that pin a plain value, used to seed upserted documents
pub(crate) fn equality_fields(filter: &BsonDocument) -> BsonDocument {
    let mut seeded = BsonDocument::new();
    for (key, condition) in filter {
        if key.starts_with('$') || key.contains('.') {
            continue;
        }
        match is_operator_document(condition) {
            Some(operators) => {
                if let Some(value) = operators.get("$eq") {
                    seeded.insert(key.clone(), value.clone());
                }
            }
            None => {
                seeded.insert(key.clone(), condition.clone());
            }
        }
    }
    seeded
}

/// Sort documents by a `{ field: 1 | -1 }` specification
pub(crate) fn sort_documents(docs: &mut [BsonDocument], spec: &BsonDocument) -> Result<()> {
    let mut keys = Vec::with_capacity(spec.len());
    for (field, direction) in spec {
        let descending = match as_f64(direction) {
            Some(d) if d == 1.0 => false,
            Some(d) if d == -1.0 => true,
            _ => {
                return Err(ShoalError::Query(format!(
                    "Invalid sort direction for '{}': {}",
                    field, direction
                )))
            }
        };
        keys.push((field.as_str(), descending));
    }

    docs.sort_by(|a, b| {
        for (field, descending) in &keys {
            let ordering = sort_order(get_path(a, field), get_path(b, field));
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

/// Apply an inclusion or exclusion projection
pub(crate) fn project(doc: BsonDocument, projection: &BsonDocument) -> BsonDocument {
    let include_id = projection
        .get("_id")
        .map(crate::conversion::is_truthy)
        .unwrap_or(true);
    let inclusive = projection
        .iter()
        .any(|(key, value)| key != "_id" && crate::conversion::is_truthy(value));

    if inclusive {
        let mut projected = BsonDocument::new();
        for (key, value) in doc {
            let wanted = if key == "_id" {
                include_id
            } else {
                projection.get(&key).is_some_and(crate::conversion::is_truthy)
            };
            if wanted {
                projected.insert(key, value);
            }
        }
        projected
    } else {
        doc.into_iter()
            .filter(|(key, _)| {
                if key == "_id" {
                    include_id
                } else {
                    !projection.contains_key(key)
                }
            })
            .collect()
    }
}
