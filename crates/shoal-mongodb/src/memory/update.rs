//! Update operator application over in-memory documents

use super::filter::{compare_values, values_equal};
use bson::{Bson, Document as BsonDocument};
use shoal_common::{Result, ShoalError};
use std::cmp::Ordering;

/// Set a (possibly dotted) path, creating intermediate documents
fn set_path(doc: &mut BsonDocument, path: &str, value: Bson) -> Result<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !doc.contains_key(head) {
                doc.insert(head, BsonDocument::new());
            }
            match doc.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(ShoalError::Query(format!(
                    "Cannot create field '{}' inside non-document '{}'",
                    rest, head
                ))),
            }
        }
    }
}

fn remove_path(doc: &mut BsonDocument, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

fn get_path_mut<'a>(doc: &'a mut BsonDocument, path: &str) -> Option<&'a mut Bson> {
    match path.split_once('.') {
        None => doc.get_mut(path),
        Some((head, rest)) => match doc.get_mut(head)? {
            Bson::Document(inner) => get_path_mut(inner, rest),
            _ => None,
        },
    }
}

fn arithmetic(operator: &str, field: &str, current: &Bson, operand: &Bson) -> Result<Bson> {
    let multiply = operator == "$mul";
    match (current, operand) {
        (Bson::Int32(a), Bson::Int32(b)) => {
            let result = if multiply { a.checked_mul(*b) } else { a.checked_add(*b) };
            Ok(match result {
                Some(value) => Bson::Int32(value),
                None if multiply => Bson::Int64(i64::from(*a) * i64::from(*b)),
                None => Bson::Int64(i64::from(*a) + i64::from(*b)),
            })
        }
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            let a = integer(current);
            let b = integer(operand);
            let result = if multiply { a.checked_mul(b) } else { a.checked_add(b) };
            result.map(Bson::Int64).ok_or_else(|| {
                ShoalError::Query(format!("{} on '{}' overflows a 64-bit integer", operator, field))
            })
        }
        _ => match (number(current), number(operand)) {
            (Some(a), Some(b)) => Ok(Bson::Double(if multiply { a * b } else { a + b })),
            _ => Err(ShoalError::Query(format!(
                "Cannot apply {} to non-numeric field '{}'",
                operator, field
            ))),
        },
    }
}

fn integer(value: &Bson) -> i64 {
    match value {
        Bson::Int32(i) => i64::from(*i),
        Bson::Int64(i) => *i,
        _ => 0,
    }
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

fn operator_fields<'a>(operator: &str, operand: &'a Bson) -> Result<&'a BsonDocument> {
    match operand {
        Bson::Document(fields) => Ok(fields),
        _ => Err(ShoalError::Query(format!("{} requires a document", operator))),
    }
}

/// Apply an operator update to `doc`
///
/// `inserting` is true when the document is being created by an upsert, which
/// is the only time `$setOnInsert` takes effect.
pub(crate) fn apply_update(doc: &mut BsonDocument, update: &BsonDocument, inserting: bool) -> Result<()> {
    if update.is_empty() {
        return Err(ShoalError::Query("Update document cannot be empty".to_string()));
    }

    for (operator, operand) in update {
        if !operator.starts_with('$') {
            return Err(ShoalError::Query(format!(
                "Update document must only contain operators, found '{}'",
                operator
            )));
        }
        let fields = operator_fields(operator, operand)?;

        for (field, value) in fields {
            if field == "_id" && operator != "$setOnInsert" {
                return Err(ShoalError::Query("Field '_id' is immutable".to_string()));
            }

            match operator.as_str() {
                "$set" => set_path(doc, field, value.clone())?,
                "$setOnInsert" => {
                    if inserting {
                        set_path(doc, field, value.clone())?;
                    }
                }
                "$unset" => remove_path(doc, field),
                "$inc" | "$mul" => {
                    let next = match get_path_mut(doc, field) {
                        Some(current) => arithmetic(operator, field, current, value)?,
                        None if operator == "$mul" => arithmetic(operator, field, &Bson::Int32(0), value)?,
                        None => value.clone(),
                    };
                    set_path(doc, field, next)?;
                }
                "$min" | "$max" => {
                    let wanted = if operator == "$min" { Ordering::Less } else { Ordering::Greater };
                    let replace = match get_path_mut(doc, field) {
                        Some(current) => compare_values(value, current) == Some(wanted),
                        None => true,
                    };
                    if replace {
                        set_path(doc, field, value.clone())?;
                    }
                }
                "$push" | "$addToSet" => match get_path_mut(doc, field) {
                    Some(Bson::Array(items)) => {
                        if operator == "$push" || !items.iter().any(|item| values_equal(item, value)) {
                            items.push(value.clone());
                        }
                    }
                    Some(_) => {
                        return Err(ShoalError::Query(format!(
                            "Cannot apply {} to non-array field '{}'",
                            operator, field
                        )))
                    }
                    None => set_path(doc, field, Bson::Array(vec![value.clone()]))?,
                },
                "$pull" => {
                    if let Some(Bson::Array(items)) = get_path_mut(doc, field) {
                        items.retain(|item| !values_equal(item, value));
                    }
                }
                other => {
                    return Err(ShoalError::Query(format!(
                        "Unsupported update operator in memory driver: '{}'",
                        other
                    )))
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn apply(mut doc: BsonDocument, update: BsonDocument) -> BsonDocument {
        apply_update(&mut doc, &update, false).unwrap();
        doc
    }

    #[test]
    fn test_set_and_unset() {
        let doc = apply(doc! { "a": 1, "b": 2 }, doc! { "$set": { "a": 5, "c.d": 1 }, "$unset": { "b": "" } });
        assert_eq!(doc, doc! { "a": 5, "c": { "d": 1 } });
    }

    #[test]
    fn test_inc_and_mul() {
        let doc = apply(doc! { "n": 1, "f": 1.5 }, doc! { "$inc": { "n": 2, "f": 1, "new": 4 } });
        assert_eq!(doc, doc! { "n": 3, "f": 2.5, "new": 4 });

        let doc = apply(doc! { "n": 3 }, doc! { "$mul": { "n": 2, "zero": 5 } });
        assert_eq!(doc, doc! { "n": 6, "zero": 0 });

        let doc = apply(doc! { "n": i32::MAX }, doc! { "$inc": { "n": 1 } });
        assert_eq!(doc, doc! { "n": i64::from(i32::MAX) + 1 });

        let mut text = doc! { "s": "x" };
        assert!(apply_update(&mut text, &doc! { "$inc": { "s": 1 } }, false).is_err());
    }

    #[test]
    fn test_min_max() {
        let doc = apply(doc! { "lo": 5, "hi": 5 }, doc! { "$min": { "lo": 3 }, "$max": { "hi": 4 } });
        assert_eq!(doc, doc! { "lo": 3, "hi": 5 });
    }

    #[test]
    fn test_array_operators() {
        let doc = apply(doc! { "tags": ["a"] }, doc! { "$push": { "tags": "a" } });
        assert_eq!(doc, doc! { "tags": ["a", "a"] });

        let doc = apply(doc! { "tags": ["a"] }, doc! { "$addToSet": { "tags": "a", "other": "x" } });
        assert_eq!(doc, doc! { "tags": ["a"], "other": ["x"] });

        let doc = apply(doc! { "tags": ["a", "b", "a"] }, doc! { "$pull": { "tags": "a" } });
        assert_eq!(doc, doc! { "tags": ["b"] });
    }

    #[test]
    fn test_set_on_insert_only_when_inserting() {
        let update = doc! { "$setOnInsert": { "role": "user" } };
        let mut existing = doc! {};
        apply_update(&mut existing, &update, false).unwrap();
        assert!(existing.is_empty());

        let mut inserted = doc! {};
        apply_update(&mut inserted, &update, true).unwrap();
        assert_eq!(inserted, doc! { "role": "user" });
    }

    #[test]
    fn test_rejects_replacement_and_id_changes() {
        let mut doc = doc! { "_id": 1 };
        assert!(apply_update(&mut doc, &doc! { "name": "x" }, false).is_err());
        assert!(apply_update(&mut doc, &doc! { "$set": { "_id": 2 } }, false).is_err());
        assert!(apply_update(&mut doc, &doc! {}, false).is_err());
        assert!(apply_update(&mut doc, &doc! { "$rename": { "a": "b" } }, false).is_err());
    }
}
