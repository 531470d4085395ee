//! Database capability set consumed by models and query builders
//!
//! [`Driver`] is the only seam between shoal and the database. The MongoDB
//! implementation lives in [`connection`](crate::connection); an in-process
//! implementation lives in [`memory`](crate::memory). Driver errors are
//! returned as-is, shoal never retries or translates them.

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};
use shoal_common::Result;

/// Options for `find` / `find_one`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<BsonDocument>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub projection: Option<BsonDocument>,
}

impl FindOptions {
    pub fn sort(mut self, sort: BsonDocument) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn projection(mut self, projection: BsonDocument) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Options for `aggregate`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    pub allow_disk_use: Option<bool>,
    pub batch_size: Option<u32>,
}

/// Options for the update family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub upsert: bool,
}

/// Options for `create_index`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub unique: Option<bool>,
}

/// Result of `update_one` / `update_many`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

/// Capability set of the underlying document database
///
/// Every method addresses one collection by name. Implementations must be
/// shareable across tasks; one handle is injected into every model.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn find_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> Result<Option<BsonDocument>>;

    async fn find(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> Result<Vec<BsonDocument>>;

    async fn count_documents(&self, collection: &str, filter: BsonDocument) -> Result<u64>;

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<BsonDocument>,
        options: AggregateOptions,
    ) -> Result<Vec<BsonDocument>>;

    /// Insert one document, returning its `_id`
    async fn insert_one(&self, collection: &str, document: BsonDocument) -> Result<Bson>;

    /// Insert documents in order, returning their `_id`s in the same order
    async fn insert_many(&self, collection: &str, documents: Vec<BsonDocument>) -> Result<Vec<Bson>>;

    async fn update_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome>;

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome>;

    /// Returns the number of deleted documents (0 or 1)
    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> Result<u64>;

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> Result<u64>;

    /// Apply `update` to the first match and return the document after the update
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<Option<BsonDocument>>;

    /// Create an index, returning its name
    async fn create_index(
        &self,
        collection: &str,
        keys: BsonDocument,
        options: IndexOptions,
    ) -> Result<String>;
}
