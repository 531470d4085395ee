//! In-process [`Driver`] implementation
//!
//! Keeps every collection in memory behind a `parking_lot::RwLock`. It
//! understands the common subset of the MongoDB query and update languages
//! (see [`filter`] and [`update`]) and enforces unique indexes, which makes
//! it suitable for tests and for embedding shoal without a server.

mod filter;
mod update;

use crate::driver::{AggregateOptions, Driver, FindOptions, IndexOptions, UpdateOptions, UpdateOutcome};
use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document as BsonDocument};
use filter::{equality_fields, get_path, matches, project, sort_documents, values_equal};
use parking_lot::{Mutex, RwLock};
use shoal_common::{Result, ShoalError};
use std::collections::{HashMap, HashSet};
use update::apply_update;

#[derive(Debug, Clone)]
struct UniqueIndex {
    name: String,
    fields: Vec<String>,
}

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<BsonDocument>,
    indexes: Vec<(String, BsonDocument)>,
    unique: Vec<UniqueIndex>,
}

impl Collection {
    /// Check `candidate` against unique indexes, ignoring the document at `skip`
    fn check_unique(&self, collection: &str, candidate: &BsonDocument, skip: Option<usize>) -> Result<()> {
        for index in &self.unique {
            let key: Vec<Option<&Bson>> = index.fields.iter().map(|f| get_path(candidate, f)).collect();
            let clash = self.documents.iter().enumerate().any(|(position, existing)| {
                Some(position) != skip
                    && index.fields.iter().zip(&key).all(|(field, wanted)| {
                        match (get_path(existing, field), wanted) {
                            (Some(a), Some(b)) => values_equal(a, b),
                            (None, None) => true,
                            _ => false,
                        }
                    })
            });
            if clash {
                return Err(ShoalError::Conflict(format!(
                    "E11000 duplicate key error collection: {} index: {}",
                    collection, index.name
                )));
            }
        }
        Ok(())
    }

    fn insert(&mut self, collection: &str, mut document: BsonDocument) -> Result<Bson> {
        let id = match document.get("_id").cloned() {
            Some(id) => id,
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                let mut with_id = BsonDocument::new();
                with_id.insert("_id", id.clone());
                for (key, value) in document {
                    with_id.insert(key, value);
                }
                document = with_id;
                id
            }
        };

        if self.documents.iter().any(|existing| existing.get("_id") == Some(&id)) {
            return Err(ShoalError::Conflict(format!(
                "E11000 duplicate key error collection: {} index: _id_",
                collection
            )));
        }
        self.check_unique(collection, &document, None)?;

        self.documents.push(document);
        Ok(id)
    }

    fn positions(&self, filter: &BsonDocument) -> Result<Vec<usize>> {
        let mut found = Vec::new();
        for (position, document) in self.documents.iter().enumerate() {
            if matches(document, filter)? {
                found.push(position);
            }
        }
        Ok(found)
    }

    /// Apply `update` to the document at `position`; returns true if it changed
    fn update_at(&mut self, collection: &str, position: usize, update: &BsonDocument) -> Result<bool> {
        let mut updated = self.documents[position].clone();
        apply_update(&mut updated, update, false)?;
        if updated == self.documents[position] {
            return Ok(false);
        }
        self.check_unique(collection, &updated, Some(position))?;
        self.documents[position] = updated;
        Ok(true)
    }

    fn upsert(&mut self, collection: &str, filter: &BsonDocument, update: &BsonDocument) -> Result<Bson> {
        let mut seeded = equality_fields(filter);
        apply_update(&mut seeded, update, true)?;
        self.insert(collection, seeded)
    }

    fn update(
        &mut self,
        collection: &str,
        filter: &BsonDocument,
        update: &BsonDocument,
        options: UpdateOptions,
        multi: bool,
    ) -> Result<(UpdateOutcome, Option<usize>)> {
        let mut positions = self.positions(filter)?;
        if !multi {
            positions.truncate(1);
        }

        if positions.is_empty() {
            if !options.upsert {
                return Ok((UpdateOutcome::default(), None));
            }
            let id = self.upsert(collection, filter, update)?;
            let outcome = UpdateOutcome {
                matched_count: 0,
                modified_count: 0,
                upserted_id: Some(id),
            };
            return Ok((outcome, Some(self.documents.len() - 1)));
        }

        let mut modified = 0;
        for &position in &positions {
            if self.update_at(collection, position, update)? {
                modified += 1;
            }
        }

        let outcome = UpdateOutcome {
            matched_count: positions.len() as u64,
            modified_count: modified,
            upserted_id: None,
        };
        Ok((outcome, positions.first().copied()))
    }
}

/// In-memory document store implementing [`Driver`]
///
/// A driver built with [`MemoryDriver::new`] keeps no call log. Tests that
/// assert on the calls a façade made use [`MemoryDriver::recording`].
#[derive(Debug, Default)]
pub struct MemoryDriver {
    collections: RwLock<HashMap<String, Collection>>,
    failing: RwLock<HashSet<String>>,
    operations: Option<Mutex<Vec<(String, String)>>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test instrumentation: a driver that logs every call it receives
    ///
    /// The log grows with each operation until [`clear_operations`](Self::clear_operations).
    pub fn recording() -> Self {
        Self {
            operations: Some(Mutex::new(Vec::new())),
            ..Self::default()
        }
    }

    pub fn is_recording(&self) -> bool {
        self.operations.is_some()
    }

    /// Make every operation on `collection` fail with a `Database` error
    pub fn fail_collection(&self, collection: &str) {
        self.failing.write().insert(collection.to_string());
    }

    /// Operations received so far, as `(operation, collection)` pairs
    ///
    /// Always empty unless the driver was built with [`MemoryDriver::recording`].
    pub fn operations(&self) -> Vec<(String, String)> {
        self.operations
            .as_ref()
            .map(|log| log.lock().clone())
            .unwrap_or_default()
    }

    /// Number of times `operation` was called on `collection`
    pub fn call_count(&self, operation: &str, collection: &str) -> usize {
        self.operations.as_ref().map_or(0, |log| {
            log.lock()
                .iter()
                .filter(|(op, coll)| op == operation && coll == collection)
                .count()
        })
    }

    /// Drop the recorded call log
    pub fn clear_operations(&self) {
        if let Some(log) = &self.operations {
            log.lock().clear();
        }
    }

    /// Index specifications created on `collection`, as `(name, keys)`
    pub fn indexes(&self, collection: &str) -> Vec<(String, BsonDocument)> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }

    fn enter(&self, operation: &str, collection: &str) -> Result<()> {
        if let Some(log) = &self.operations {
            log.lock().push((operation.to_string(), collection.to_string()));
        }
        if self.failing.read().contains(collection) {
            return Err(ShoalError::Database(format!(
                "{} failed on collection '{}'",
                operation, collection
            )));
        }
        Ok(())
    }

    fn select(&self, collection: &str, filter: &BsonDocument, options: &FindOptions) -> Result<Vec<BsonDocument>> {
        let collections = self.collections.read();
        let mut docs = match collections.get(collection) {
            Some(c) => {
                let mut selected = Vec::new();
                for document in &c.documents {
                    if matches(document, filter)? {
                        selected.push(document.clone());
                    }
                }
                selected
            }
            None => Vec::new(),
        };
        drop(collections);

        if let Some(sort) = &options.sort {
            sort_documents(&mut docs, sort)?;
        }
        let skip = options.skip.unwrap_or(0) as usize;
        let docs = docs.into_iter().skip(skip);
        let docs: Vec<BsonDocument> = match options.limit {
            Some(limit) if limit != 0 => docs.take(limit.unsigned_abs() as usize).collect(),
            _ => docs.collect(),
        };

        Ok(match &options.projection {
            Some(projection) => docs.into_iter().map(|d| project(d, projection)).collect(),
            None => docs,
        })
    }
}

fn stage_document<'a>(stage: &'a BsonDocument) -> Result<(&'a str, &'a Bson)> {
    let mut entries = stage.iter();
    match (entries.next(), entries.next()) {
        (Some((name, spec)), None) => Ok((name.as_str(), spec)),
        _ => Err(ShoalError::Query(
            "Each pipeline stage must have exactly one field".to_string(),
        )),
    }
}

fn stage_count(name: &str, spec: &Bson) -> Result<usize> {
    match spec {
        Bson::Int32(n) if *n >= 0 => Ok(*n as usize),
        Bson::Int64(n) if *n >= 0 => Ok(*n as usize),
        _ => Err(ShoalError::Query(format!("{} requires a non-negative integer", name))),
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn find_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> Result<Option<BsonDocument>> {
        self.enter("find_one", collection)?;
        let options = FindOptions {
            limit: Some(1),
            ..options
        };
        Ok(self.select(collection, &filter, &options)?.into_iter().next())
    }

    async fn find(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> Result<Vec<BsonDocument>> {
        self.enter("find", collection)?;
        self.select(collection, &filter, &options)
    }

    async fn count_documents(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        self.enter("count_documents", collection)?;
        Ok(self.select(collection, &filter, &FindOptions::default())?.len() as u64)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<BsonDocument>,
        _options: AggregateOptions,
    ) -> Result<Vec<BsonDocument>> {
        self.enter("aggregate", collection)?;
        let mut docs = self.select(collection, &BsonDocument::new(), &FindOptions::default())?;

        for stage in &pipeline {
            let (name, spec) = stage_document(stage)?;
            match name {
                "$match" => {
                    let filter = match spec {
                        Bson::Document(filter) => filter,
                        _ => return Err(ShoalError::Query("$match requires a document".to_string())),
                    };
                    let mut kept = Vec::with_capacity(docs.len());
                    for document in docs {
                        if matches(&document, filter)? {
                            kept.push(document);
                        }
                    }
                    docs = kept;
                }
                "$sort" => match spec {
                    Bson::Document(sort) => sort_documents(&mut docs, sort)?,
                    _ => return Err(ShoalError::Query("$sort requires a document".to_string())),
                },
                "$skip" => {
                    let n = stage_count(name, spec)?;
                    docs = docs.into_iter().skip(n).collect();
                }
                "$limit" => {
                    let n = stage_count(name, spec)?;
                    docs.truncate(n);
                }
                "$project" => match spec {
                    Bson::Document(projection) => {
                        docs = docs.into_iter().map(|d| project(d, projection)).collect();
                    }
                    _ => return Err(ShoalError::Query("$project requires a document".to_string())),
                },
                "$count" => {
                    let field = match spec {
                        Bson::String(field) if !field.is_empty() => field.clone(),
                        _ => return Err(ShoalError::Query("$count requires a field name".to_string())),
                    };
                    let total = docs.len() as i64;
                    docs = if total == 0 {
                        Vec::new()
                    } else {
                        let mut counted = BsonDocument::new();
                        counted.insert(field, Bson::Int64(total));
                        vec![counted]
                    };
                }
                other => {
                    return Err(ShoalError::Query(format!(
                        "Unsupported pipeline stage in memory driver: '{}'",
                        other
                    )))
                }
            }
        }

        Ok(docs)
    }

    async fn insert_one(&self, collection: &str, document: BsonDocument) -> Result<Bson> {
        self.enter("insert_one", collection)?;
        let mut collections = self.collections.write();
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(collection, document)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<BsonDocument>) -> Result<Vec<Bson>> {
        self.enter("insert_many", collection)?;
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        // Ordered: documents before the first failure stay inserted
        documents
            .into_iter()
            .map(|document| target.insert(collection, document))
            .collect()
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome> {
        self.enter("update_one", collection)?;
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        let (outcome, _) = target.update(collection, &filter, &update, options, false)?;
        Ok(outcome)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome> {
        self.enter("update_many", collection)?;
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        let (outcome, _) = target.update(collection, &filter, &update, options, true)?;
        Ok(outcome)
    }

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        self.enter("delete_one", collection)?;
        let mut collections = self.collections.write();
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };
        match target.positions(&filter)?.first() {
            Some(&position) => {
                target.documents.remove(position);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        self.enter("delete_many", collection)?;
        let mut collections = self.collections.write();
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let positions = target.positions(&filter)?;
        for &position in positions.iter().rev() {
            target.documents.remove(position);
        }
        Ok(positions.len() as u64)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<Option<BsonDocument>> {
        self.enter("find_one_and_update", collection)?;
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        let (_, position) = target.update(collection, &filter, &update, options, false)?;
        Ok(position.map(|p| target.documents[p].clone()))
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: BsonDocument,
        options: IndexOptions,
    ) -> Result<String> {
        self.enter("create_index", collection)?;
        if keys.is_empty() {
            return Err(ShoalError::Query("Index keys cannot be empty".to_string()));
        }

        let name = options.name.unwrap_or_else(|| {
            keys.iter()
                .map(|(field, direction)| match direction {
                    Bson::String(kind) => format!("{}_{}", field, kind),
                    other => format!("{}_{}", field, other),
                })
                .collect::<Vec<_>>()
                .join("_")
        });

        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();

        if let Some((_, existing)) = target.indexes.iter().find(|(n, _)| *n == name) {
            if *existing != keys {
                return Err(ShoalError::Conflict(format!(
                    "An index named '{}' already exists with different keys",
                    name
                )));
            }
            return Ok(name);
        }

        if options.unique.unwrap_or(false) {
            let index = UniqueIndex {
                name: name.clone(),
                fields: keys.keys().cloned().collect(),
            };
            let mut seen = Collection {
                unique: vec![index.clone()],
                ..Collection::default()
            };
            for document in &target.documents {
                seen.check_unique(collection, document, None)?;
                seen.documents.push(document.clone());
            }
            target.unique.push(index);
        }

        target.indexes.push((name.clone(), keys));
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[tokio::test]
    async fn test_insert_assigns_id_first() {
        let driver = MemoryDriver::new();
        let id = driver.insert_one("users", doc! { "name": "Ada" }).await.unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        let stored = driver
            .find_one("users", doc! { "name": "Ada" }, FindOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.keys().next().map(String::as_str), Some("_id"));
        assert_eq!(stored.get("_id"), Some(&id));
    }

    #[tokio::test]
    async fn test_find_with_sort_skip_limit() {
        let driver = MemoryDriver::new();
        let docs = (1..=5).map(|n| doc! { "n": n }).collect();
        driver.insert_many("nums", docs).await.unwrap();

        let found = driver
            .find(
                "nums",
                doc! { "n": { "$gte": 2 } },
                FindOptions::default().sort(doc! { "n": -1 }).skip(1).limit(2),
            )
            .await
            .unwrap();
        let values: Vec<i32> = found.iter().map(|d| d.get_i32("n").unwrap()).collect();
        assert_eq!(values, vec![4, 3]);
        assert_eq!(driver.count_documents("nums", doc! {}).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_update_and_upsert() {
        let driver = MemoryDriver::new();
        driver.insert_one("users", doc! { "email": "a@x", "visits": 1 }).await.unwrap();

        let outcome = driver
            .update_one(
                "users",
                doc! { "email": "a@x" },
                doc! { "$inc": { "visits": 1 } },
                UpdateOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.matched_count, 1);
        assert_eq!(outcome.modified_count, 1);

        let outcome = driver
            .update_one(
                "users",
                doc! { "email": "b@x" },
                doc! { "$set": { "visits": 1 } },
                UpdateOptions { upsert: true },
            )
            .await
            .unwrap();
        assert_eq!(outcome.matched_count, 0);
        assert!(outcome.upserted_id.is_some());

        let upserted = driver
            .find_one("users", doc! { "email": "b@x" }, FindOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(upserted.get_i32("visits").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_one_and_update_returns_updated_document() {
        let driver = MemoryDriver::new();
        driver.insert_one("users", doc! { "email": "a@x", "name": "A" }).await.unwrap();

        let updated = driver
            .find_one_and_update(
                "users",
                doc! { "email": "a@x" },
                doc! { "$set": { "name": "B" } },
                UpdateOptions::default(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.get_str("name").unwrap(), "B");

        let missing = driver
            .find_one_and_update(
                "users",
                doc! { "email": "nobody" },
                doc! { "$set": { "name": "C" } },
                UpdateOptions::default(),
            )
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delete_one_and_many() {
        let driver = MemoryDriver::new();
        let docs = vec![doc! { "k": 1 }, doc! { "k": 1 }, doc! { "k": 2 }];
        driver.insert_many("items", docs).await.unwrap();

        assert_eq!(driver.delete_one("items", doc! { "k": 1 }).await.unwrap(), 1);
        assert_eq!(driver.delete_many("items", doc! { "k": { "$gte": 1 } }).await.unwrap(), 2);
        assert_eq!(driver.delete_many("missing", doc! {}).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unique_index_rejects_duplicates() {
        let driver = MemoryDriver::new();
        let name = driver
            .create_index(
                "users",
                doc! { "email": 1 },
                IndexOptions {
                    name: None,
                    unique: Some(true),
                },
            )
            .await
            .unwrap();
        assert_eq!(name, "email_1");

        driver.insert_one("users", doc! { "email": "a@x" }).await.unwrap();
        let err = driver.insert_one("users", doc! { "email": "a@x" }).await.unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(driver.count_documents("users", doc! {}).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unique_index_on_existing_duplicates_fails() {
        let driver = MemoryDriver::new();
        driver
            .insert_many("users", vec![doc! { "email": "a" }, doc! { "email": "a" }])
            .await
            .unwrap();
        let result = driver
            .create_index(
                "users",
                doc! { "email": 1 },
                IndexOptions {
                    name: Some("uniq_email".to_string()),
                    unique: Some(true),
                },
            )
            .await;
        assert!(matches!(result, Err(ShoalError::Conflict(_))));
        assert!(driver.indexes("users").is_empty());
    }

    #[tokio::test]
    async fn test_aggregate_pipeline() {
        let driver = MemoryDriver::new();
        let docs = (1..=6).map(|n| doc! { "n": n, "even": n % 2 == 0 }).collect();
        driver.insert_many("nums", docs).await.unwrap();

        let result = driver
            .aggregate(
                "nums",
                vec![
                    doc! { "$match": { "even": true } },
                    doc! { "$sort": { "n": -1 } },
                    doc! { "$limit": 2 },
                    doc! { "$project": { "n": 1, "_id": 0 } },
                ],
                AggregateOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result, vec![doc! { "n": 6 }, doc! { "n": 4 }]);

        let counted = driver
            .aggregate("nums", vec![doc! { "$count": "total" }], AggregateOptions::default())
            .await
            .unwrap();
        assert_eq!(counted, vec![doc! { "total": 6_i64 }]);

        let err = driver
            .aggregate("nums", vec![doc! { "$group": { "_id": "$even" } }], AggregateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ShoalError::Query(_)));
    }

    #[tokio::test]
    async fn test_failing_collection_and_operation_log() {
        let driver = MemoryDriver::recording();
        driver.fail_collection("broken");
        let err = driver.insert_one("broken", doc! {}).await.unwrap_err();
        assert!(matches!(err, ShoalError::Database(_)));

        driver.count_documents("users", doc! {}).await.unwrap();
        assert_eq!(driver.call_count("insert_one", "broken"), 1);
        assert_eq!(driver.call_count("count_documents", "users"), 1);
        assert_eq!(driver.operations().len(), 2);
    }

    #[tokio::test]
    async fn test_default_driver_keeps_no_call_log() {
        let driver = MemoryDriver::new();
        assert!(!driver.is_recording());
        for i in 0..100 {
            driver.insert_one("users", doc! { "n": i }).await.unwrap();
        }
        driver.count_documents("users", doc! {}).await.unwrap();

        assert!(driver.operations().is_empty());
        assert_eq!(driver.call_count("insert_one", "users"), 0);
        assert!(driver.operations.is_none());
        assert_eq!(driver.count_documents("users", doc! {}).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_clear_operations_empties_the_log() {
        let driver = MemoryDriver::recording();
        driver.insert_one("users", doc! {}).await.unwrap();
        assert_eq!(driver.operations().len(), 1);

        driver.clear_operations();
        assert!(driver.operations().is_empty());

        driver.count_documents("users", doc! {}).await.unwrap();
        assert_eq!(driver.operations(), vec![("count_documents".to_string(), "users".to_string())]);
    }
}
