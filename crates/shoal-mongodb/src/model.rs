//! Schema-bound collection façade
//!
//! A [`Model`] binds a collection name, its field schema and its index
//! declarations to one injected [`Driver`]. Write operations run the caller's
//! document through the [`DocumentProcessor`] first; every operation goes
//! through the model's [`Dispatcher`].
//!
//! # Example
//!
//! ```ignore
//! use shoal_mongodb::{FieldDescriptor, FieldType, MemoryDriver, Model, ModelConfig};
//! use std::sync::Arc;
//!
//! let users = Model::new(
//!     "users",
//!     vec![
//!         FieldDescriptor::new("email", FieldType::String).required(),
//!         FieldDescriptor::new("age", FieldType::Number).default_value(18),
//!     ],
//!     vec![],
//!     ModelConfig::default(),
//!     Arc::new(MemoryDriver::new()),
//! )?;
//! let stored = users.insert_one(doc! { "email": "a@b.c" }).await?;
//! ```

use crate::clock::{Clock, SystemClock};
use crate::config::ModelConfig;
use crate::dispatch::Dispatcher;
use crate::driver::{AggregateOptions, Driver, FindOptions, IndexOptions, UpdateOptions, UpdateOutcome};
use crate::processor::{DocumentProcessor, WriteKind};
use crate::types::{FieldDescriptor, IndexDescriptor, UpdateModifier};
use crate::validation::{into_configuration, validate_schema, ValidatedCollectionName};
use bson::{doc, Bson, Document as BsonDocument};
use shoal_common::{Result, ShoalError};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Outcome of [`Model::generate_indexes`]
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    /// Names of the indexes the driver created (or already had)
    pub created: Vec<String>,
    /// Declared index keys that could not be created, with the driver error
    pub failed: Vec<(BsonDocument, ShoalError)>,
}

impl IndexReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Collection façade with schema processing
pub struct Model {
    name: ValidatedCollectionName,
    fields: Vec<FieldDescriptor>,
    indexes: Vec<IndexDescriptor>,
    driver: Arc<dyn Driver>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
}

impl Model {
    /// Build a model, validating the collection name and the schema
    ///
    /// # Errors
    /// `ShoalError::Configuration` for an invalid collection or field name,
    /// a reserved or duplicate field name, or a default whose type does not
    /// match its field. Nothing reaches the driver in that case.
    pub fn new(
        collection: &str,
        fields: Vec<FieldDescriptor>,
        indexes: Vec<IndexDescriptor>,
        config: ModelConfig,
        driver: Arc<dyn Driver>,
    ) -> Result<Self> {
        let name = ValidatedCollectionName::new(collection).map_err(into_configuration)?;
        validate_schema(&fields)?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let dispatcher = Dispatcher::new(name.as_str(), config, Arc::clone(&driver), Arc::clone(&clock));
        debug!(collection = %name, fields = fields.len(), indexes = indexes.len(), "Model declared");

        Ok(Self {
            name,
            fields,
            indexes,
            driver,
            clock,
            dispatcher,
        })
    }

    /// Replace the clock used for lifecycle stamps and telemetry dates
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.dispatcher = Dispatcher::new(
            self.name.as_str(),
            self.dispatcher.config().clone(),
            Arc::clone(&self.driver),
            Arc::clone(&clock),
        );
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn schema(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn indexes(&self) -> &[IndexDescriptor] {
        &self.indexes
    }

    pub fn config(&self) -> &ModelConfig {
        self.dispatcher.config()
    }

    /// Run the document processor for this schema without touching the driver
    pub fn process(&self, input: &BsonDocument, is_update: bool) -> Result<BsonDocument> {
        self.processor()
            .process(input, WriteKind::from_is_update(is_update), self.clock.now())
    }

    fn processor(&self) -> DocumentProcessor<'_> {
        DocumentProcessor::new(&self.fields, self.config().presence)
    }

    fn describe(&self, op: &str, args: impl FnOnce() -> BsonDocument) -> Option<Bson> {
        self.dispatcher.capture(|| {
            let mut query = doc! { "op": op };
            for (key, value) in args() {
                query.insert(key, value);
            }
            Bson::Document(query)
        })
    }

    fn process_update(&self, input: &BsonDocument, modifier: UpdateModifier) -> Result<BsonDocument> {
        let processed = self.processor().process(input, WriteKind::Update, self.clock.now())?;
        Ok(modifier.wrap(processed))
    }

    #[instrument(skip(self, filter, options), fields(collection = %self.name))]
    pub async fn find_one(&self, filter: BsonDocument, options: FindOptions) -> Result<Option<BsonDocument>> {
        let query = self.describe("findOne", || doc! { "filter": filter.clone() });
        self.dispatcher
            .dispatch(query, self.driver.find_one(self.name(), filter, options))
            .await
    }

    #[instrument(skip(self, filter, options), fields(collection = %self.name))]
    pub async fn find(&self, filter: BsonDocument, options: FindOptions) -> Result<Vec<BsonDocument>> {
        let query = self.describe("find", || doc! { "filter": filter.clone() });
        self.dispatcher
            .dispatch(query, self.driver.find(self.name(), filter, options))
            .await
    }

    /// Find a document by its `_id`
    pub async fn find_by_id(&self, id: impl Into<Bson>) -> Result<Option<BsonDocument>> {
        self.find_one(doc! { "_id": id.into() }, FindOptions::default()).await
    }

    #[instrument(skip(self, filter), fields(collection = %self.name))]
    pub async fn count(&self, filter: BsonDocument) -> Result<u64> {
        let query = self.describe("count", || doc! { "filter": filter.clone() });
        self.dispatcher
            .dispatch(query, self.driver.count_documents(self.name(), filter))
            .await
    }

    #[instrument(skip(self, pipeline, options), fields(collection = %self.name, stages = pipeline.len()))]
    pub async fn aggregate(
        &self,
        pipeline: Vec<BsonDocument>,
        options: AggregateOptions,
    ) -> Result<Vec<BsonDocument>> {
        let query = self.describe("aggregate", || doc! { "pipeline": pipeline.clone() });
        self.dispatcher
            .dispatch(query, self.driver.aggregate(self.name(), pipeline, options))
            .await
    }

    /// Update the first match and return it as it is after the update
    #[instrument(skip_all, fields(collection = %self.name, upsert = options.upsert, modifier = %modifier))]
    pub async fn find_one_and_update(
        &self,
        filter: BsonDocument,
        document: BsonDocument,
        options: UpdateOptions,
        modifier: UpdateModifier,
    ) -> Result<Option<BsonDocument>> {
        let update = self.process_update(&document, modifier)?;
        let query = self.describe("findOneAndUpdate", || {
            doc! { "filter": filter.clone(), "update": update.clone(), "upsert": options.upsert }
        });
        self.dispatcher
            .dispatch(
                query,
                self.driver.find_one_and_update(self.name(), filter, update, options),
            )
            .await
    }

    #[instrument(skip_all, fields(collection = %self.name, upsert = options.upsert, modifier = %modifier))]
    pub async fn update_one(
        &self,
        filter: BsonDocument,
        document: BsonDocument,
        options: UpdateOptions,
        modifier: UpdateModifier,
    ) -> Result<UpdateOutcome> {
        let update = self.process_update(&document, modifier)?;
        let query = self.describe("updateOne", || {
            doc! { "filter": filter.clone(), "update": update.clone(), "upsert": options.upsert }
        });
        self.dispatcher
            .dispatch(query, self.driver.update_one(self.name(), filter, update, options))
            .await
    }

    #[instrument(skip_all, fields(collection = %self.name, upsert = options.upsert, modifier = %modifier))]
    pub async fn update_many(
        &self,
        filter: BsonDocument,
        document: BsonDocument,
        options: UpdateOptions,
        modifier: UpdateModifier,
    ) -> Result<UpdateOutcome> {
        let update = self.process_update(&document, modifier)?;
        let query = self.describe("updateMany", || {
            doc! { "filter": filter.clone(), "update": update.clone(), "upsert": options.upsert }
        });
        self.dispatcher
            .dispatch(query, self.driver.update_many(self.name(), filter, update, options))
            .await
    }

    #[instrument(skip(self, filter), fields(collection = %self.name))]
    pub async fn delete_one(&self, filter: BsonDocument) -> Result<u64> {
        let query = self.describe("deleteOne", || doc! { "filter": filter.clone() });
        self.dispatcher
            .dispatch(query, self.driver.delete_one(self.name(), filter))
            .await
    }

    #[instrument(skip(self, filter), fields(collection = %self.name))]
    pub async fn delete_many(&self, filter: BsonDocument) -> Result<u64> {
        let query = self.describe("deleteMany", || doc! { "filter": filter.clone() });
        self.dispatcher
            .dispatch(query, self.driver.delete_many(self.name(), filter))
            .await
    }

    /// Insert one document and return it as stored, `_id` included
    ///
    /// # Errors
    /// `ShoalError::MissingRequiredField` (before any driver call) or the
    /// driver error unchanged.
    #[instrument(skip(self, document), fields(collection = %self.name))]
    pub async fn insert_one(&self, document: BsonDocument) -> Result<BsonDocument> {
        let processed = self.processor().process(&document, WriteKind::Insert, self.clock.now())?;
        let query = self.describe("insertOne", || doc! { "document": processed.clone() });
        let id = self
            .dispatcher
            .dispatch(query, self.driver.insert_one(self.name(), processed.clone()))
            .await?;
        Ok(with_id(id, processed))
    }

    /// Insert documents, each processed independently, and return them as stored
    ///
    /// Processing runs for every element before the driver is called, so one
    /// invalid element means nothing is inserted.
    #[instrument(skip(self, documents), fields(collection = %self.name, count = documents.len()))]
    pub async fn insert_many(&self, documents: Vec<BsonDocument>) -> Result<Vec<BsonDocument>> {
        let processor = self.processor();
        let processed = documents
            .iter()
            .map(|document| processor.process(document, WriteKind::Insert, self.clock.now()))
            .collect::<Result<Vec<_>>>()?;

        let query = self.describe("insertMany", || doc! { "documents": processed.clone() });
        let ids = self
            .dispatcher
            .dispatch(query, self.driver.insert_many(self.name(), processed.clone()))
            .await?;

        if ids.len() != processed.len() {
            return Err(ShoalError::Internal(format!(
                "Driver returned {} ids for {} inserted documents",
                ids.len(),
                processed.len()
            )));
        }
        Ok(ids.into_iter().zip(processed).map(|(id, doc)| with_id(id, doc)).collect())
    }

    /// Return the first match for `filter`, or insert `document` and return it
    ///
    /// Not atomic: two concurrent callers can both miss and both insert
    /// unless a unique index covers the filtered fields.
    #[instrument(skip(self, filter, document), fields(collection = %self.name))]
    pub async fn find_one_or_create(&self, filter: BsonDocument, document: BsonDocument) -> Result<BsonDocument> {
        if let Some(existing) = self.find_one(filter, FindOptions::default()).await? {
            debug!("Existing document found");
            return Ok(existing);
        }
        self.insert_one(document).await
    }

    /// Create every declared index
    ///
    /// Failures are logged and collected in the report; they never stop the
    /// remaining indexes from being created.
    #[instrument(skip(self), fields(collection = %self.name, declared = self.indexes.len()))]
    pub async fn generate_indexes(&self) -> IndexReport {
        let mut report = IndexReport::default();

        for index in &self.indexes {
            let keys = index.keys();
            let options = IndexOptions {
                name: index.name.clone(),
                unique: index.unique,
            };
            let query = self.describe("createIndex", || doc! { "keys": keys.clone() });
            let result = self
                .dispatcher
                .dispatch(query, self.driver.create_index(self.name(), keys.clone(), options))
                .await;

            match result {
                Ok(name) => {
                    info!(index = %name, "Index created");
                    report.created.push(name);
                }
                Err(e) => {
                    warn!(keys = %keys, error = %e, "Index creation failed");
                    report.failed.push((keys, e));
                }
            }
        }

        report
    }

    /// Wait for in-flight telemetry writes
    pub async fn drain_telemetry(&self) {
        self.dispatcher.drain().await;
    }
}

fn with_id(id: Bson, processed: BsonDocument) -> BsonDocument {
    if processed.contains_key("_id") {
        return processed;
    }
    let mut stored = doc! { "_id": id };
    for (key, value) in processed {
        stored.insert(key, value);
    }
    stored
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name.as_str())
            .field("fields", &self.fields)
            .field("indexes", &self.indexes)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
