//! Schema-less query façade
//!
//! [`QueryBuilder`] exposes the same operations as [`Model`](crate::Model)
//! but takes the collection name on every call and applies no document
//! processing: no defaults, no coercion, no required fields, no lifecycle
//! stamps. Update methods take a complete update document.

use crate::clock::SystemClock;
use crate::config::ModelConfig;
use crate::dispatch::Dispatcher;
use crate::driver::{AggregateOptions, Driver, FindOptions, IndexOptions, UpdateOptions, UpdateOutcome};
use crate::types::IndexDescriptor;
use crate::validation::ValidatedCollectionName;
use bson::{doc, Bson, Document as BsonDocument};
use shoal_common::Result;
use std::sync::Arc;
use tracing::instrument;

/// Label recorded as `model` in telemetry written by a query builder
pub const QUERY_BUILDER_LABEL: &str = "query_builder";

/// Direct, per-collection access to the driver
pub struct QueryBuilder {
    driver: Arc<dyn Driver>,
    dispatcher: Dispatcher,
}

impl QueryBuilder {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self::with_config(driver, ModelConfig::default())
    }

    /// Builder whose operations are timed and reported like a model's
    pub fn with_config(driver: Arc<dyn Driver>, config: ModelConfig) -> Self {
        let dispatcher = Dispatcher::new(
            QUERY_BUILDER_LABEL,
            config,
            Arc::clone(&driver),
            Arc::new(SystemClock::new()),
        );
        Self { driver, dispatcher }
    }

    pub fn config(&self) -> &ModelConfig {
        self.dispatcher.config()
    }

    /// Start a fluent find on `collection`
    pub fn query(&self, collection: impl Into<String>) -> FindQuery<'_> {
        FindQuery {
            builder: self,
            collection: collection.into(),
            filter: BsonDocument::new(),
            options: FindOptions::default(),
        }
    }

    fn describe(&self, op: &str, collection: &str, args: impl FnOnce() -> BsonDocument) -> Option<Bson> {
        self.dispatcher.capture(|| {
            let mut query = doc! { "op": op, "collection": collection };
            for (key, value) in args() {
                query.insert(key, value);
            }
            Bson::Document(query)
        })
    }

    #[instrument(skip(self, filter, options))]
    pub async fn find_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> Result<Option<BsonDocument>> {
        let collection = ValidatedCollectionName::new(collection)?;
        let query = self.describe("findOne", collection.as_str(), || doc! { "filter": filter.clone() });
        self.dispatcher
            .dispatch(query, self.driver.find_one(collection.as_str(), filter, options))
            .await
    }

    #[instrument(skip(self, filter, options))]
    pub async fn find(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> Result<Vec<BsonDocument>> {
        let collection = ValidatedCollectionName::new(collection)?;
        let query = self.describe("find", collection.as_str(), || doc! { "filter": filter.clone() });
        self.dispatcher
            .dispatch(query, self.driver.find(collection.as_str(), filter, options))
            .await
    }

    #[instrument(skip(self, filter))]
    pub async fn count(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let collection = ValidatedCollectionName::new(collection)?;
        let query = self.describe("count", collection.as_str(), || doc! { "filter": filter.clone() });
        self.dispatcher
            .dispatch(query, self.driver.count_documents(collection.as_str(), filter))
            .await
    }

    #[instrument(skip(self, pipeline, options), fields(stages = pipeline.len()))]
    pub async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<BsonDocument>,
        options: AggregateOptions,
    ) -> Result<Vec<BsonDocument>> {
        let collection = ValidatedCollectionName::new(collection)?;
        let query = self.describe("aggregate", collection.as_str(), || doc! { "pipeline": pipeline.clone() });
        self.dispatcher
            .dispatch(query, self.driver.aggregate(collection.as_str(), pipeline, options))
            .await
    }

    #[instrument(skip(self, filter, update), fields(upsert = options.upsert))]
    pub async fn find_one_and_update(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<Option<BsonDocument>> {
        let collection = ValidatedCollectionName::new(collection)?;
        let query = self.describe("findOneAndUpdate", collection.as_str(), || {
            doc! { "filter": filter.clone(), "update": update.clone() }
        });
        self.dispatcher
            .dispatch(
                query,
                self.driver
                    .find_one_and_update(collection.as_str(), filter, update, options),
            )
            .await
    }

    #[instrument(skip(self, filter, update), fields(upsert = options.upsert))]
    pub async fn update_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome> {
        let collection = ValidatedCollectionName::new(collection)?;
        let query = self.describe("updateOne", collection.as_str(), || {
            doc! { "filter": filter.clone(), "update": update.clone() }
        });
        self.dispatcher
            .dispatch(query, self.driver.update_one(collection.as_str(), filter, update, options))
            .await
    }

    #[instrument(skip(self, filter, update), fields(upsert = options.upsert))]
    pub async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome> {
        let collection = ValidatedCollectionName::new(collection)?;
        let query = self.describe("updateMany", collection.as_str(), || {
            doc! { "filter": filter.clone(), "update": update.clone() }
        });
        self.dispatcher
            .dispatch(query, self.driver.update_many(collection.as_str(), filter, update, options))
            .await
    }

    #[instrument(skip(self, filter))]
    pub async fn delete_one(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let collection = ValidatedCollectionName::new(collection)?;
        let query = self.describe("deleteOne", collection.as_str(), || doc! { "filter": filter.clone() });
        self.dispatcher
            .dispatch(query, self.driver.delete_one(collection.as_str(), filter))
            .await
    }

    #[instrument(skip(self, filter))]
    pub async fn delete_many(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let collection = ValidatedCollectionName::new(collection)?;
        let query = self.describe("deleteMany", collection.as_str(), || doc! { "filter": filter.clone() });
        self.dispatcher
            .dispatch(query, self.driver.delete_many(collection.as_str(), filter))
            .await
    }

    /// Insert `document` as given, returning its `_id`
    #[instrument(skip(self, document))]
    pub async fn insert_one(&self, collection: &str, document: BsonDocument) -> Result<Bson> {
        let collection = ValidatedCollectionName::new(collection)?;
        let query = self.describe("insertOne", collection.as_str(), || doc! { "document": document.clone() });
        self.dispatcher
            .dispatch(query, self.driver.insert_one(collection.as_str(), document))
            .await
    }

    #[instrument(skip(self, documents), fields(count = documents.len()))]
    pub async fn insert_many(&self, collection: &str, documents: Vec<BsonDocument>) -> Result<Vec<Bson>> {
        let collection = ValidatedCollectionName::new(collection)?;
        let query = self.describe("insertMany", collection.as_str(), || {
            doc! { "documents": documents.clone() }
        });
        self.dispatcher
            .dispatch(query, self.driver.insert_many(collection.as_str(), documents))
            .await
    }

    /// Return the first match for `filter`, or insert `document` unchanged
    ///
    /// The returned document carries the `_id` the driver assigned.
    pub async fn find_one_or_create(
        &self,
        collection: &str,
        filter: BsonDocument,
        document: BsonDocument,
    ) -> Result<BsonDocument> {
        if let Some(existing) = self.find_one(collection, filter, FindOptions::default()).await? {
            return Ok(existing);
        }

        let id = self.insert_one(collection, document.clone()).await?;
        if document.contains_key("_id") {
            return Ok(document);
        }
        let mut stored = doc! { "_id": id };
        for (key, value) in document {
            stored.insert(key, value);
        }
        Ok(stored)
    }

    /// Create one index, returning its name
    #[instrument(skip(self, index))]
    pub async fn create_index(&self, collection: &str, index: &IndexDescriptor) -> Result<String> {
        let collection = ValidatedCollectionName::new(collection)?;
        let keys = index.keys();
        let options = IndexOptions {
            name: index.name.clone(),
            unique: index.unique,
        };
        let query = self.describe("createIndex", collection.as_str(), || doc! { "keys": keys.clone() });
        self.dispatcher
            .dispatch(query, self.driver.create_index(collection.as_str(), keys, options))
            .await
    }

    /// Wait for in-flight telemetry writes
    pub async fn drain_telemetry(&self) {
        self.dispatcher.drain().await;
    }
}

impl std::fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// Fluent find on one collection
pub struct FindQuery<'a> {
    builder: &'a QueryBuilder,
    collection: String,
    filter: BsonDocument,
    options: FindOptions,
}

impl<'a> FindQuery<'a> {
    /// Set the filter document
    pub fn filter(mut self, filter: BsonDocument) -> Self {
        self.filter = filter;
        self
    }

    /// Set the sort order
    pub fn sort(mut self, sort: BsonDocument) -> Self {
        self.options.sort = Some(sort);
        self
    }

    /// Set the number of documents to skip
    pub fn skip(mut self, skip: u64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    /// Set the maximum number of documents to return
    pub fn limit(mut self, limit: i64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn projection(mut self, projection: BsonDocument) -> Self {
        self.options.projection = Some(projection);
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn get_filter(&self) -> &BsonDocument {
        &self.filter
    }

    pub fn get_sort(&self) -> Option<&BsonDocument> {
        self.options.sort.as_ref()
    }

    pub fn get_skip(&self) -> Option<u64> {
        self.options.skip
    }

    pub fn get_limit(&self) -> Option<i64> {
        self.options.limit
    }

    /// Execute the query and return all matching documents
    pub async fn to_list(self) -> Result<Vec<BsonDocument>> {
        self.builder.find(&self.collection, self.filter, self.options).await
    }

    /// Execute the query and return the first matching document
    pub async fn first(self) -> Result<Option<BsonDocument>> {
        self.builder.find_one(&self.collection, self.filter, self.options).await
    }

    /// Count documents matching the filter, ignoring sort, skip and limit
    pub async fn count(self) -> Result<u64> {
        self.builder.count(&self.collection, self.filter).await
    }
}
