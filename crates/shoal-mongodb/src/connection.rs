//! MongoDB connection management and the MongoDB [`Driver`] implementation

use crate::driver::{AggregateOptions, Driver, FindOptions, IndexOptions, UpdateOptions, UpdateOutcome};
use async_trait::async_trait;
use bson::{doc, Bson, Document as BsonDocument};
use futures::TryStreamExt;
use mongodb::{
    options::{
        self as mongo_options, ClientOptions, ReturnDocument, ServerApi, ServerApiVersion,
    },
    Client, Collection, Database, IndexModel,
};
use shoal_common::{Result, ShoalError};
use std::time::Duration;
use tracing::{info, instrument};

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed
    pub max_idle_time: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(1),
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("shoal".to_string()),
        }
    }
}

/// MongoDB-backed driver
///
/// Cheap to clone; clones share the underlying client pool.
#[derive(Debug, Clone)]
pub struct MongoDriver {
    client: Client,
    database: Database,
}

impl MongoDriver {
    /// Connect with default pool settings
    pub async fn connect(connection_string: &str) -> Result<Self> {
        Self::with_config(connection_string, PoolConfig::default()).await
    }

    /// Connect with custom pool configuration
    ///
    /// The connection string must name a default database.
    #[instrument(skip(connection_string, config), fields(app_name = ?config.app_name))]
    pub async fn with_config(connection_string: &str, config: PoolConfig) -> Result<Self> {
        let mut client_options = ClientOptions::parse(connection_string).await?;

        if let Some(min) = config.min_pool_size {
            client_options.min_pool_size = Some(min);
        }
        if let Some(max) = config.max_pool_size {
            client_options.max_pool_size = Some(max);
        }
        if let Some(idle) = config.max_idle_time {
            client_options.max_idle_time = Some(idle);
        }
        if let Some(connect) = config.connect_timeout {
            client_options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = config.server_selection_timeout {
            client_options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = config.app_name {
            client_options.app_name = Some(app);
        }

        // Set stable API version for compatibility
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)?;

        let database = client.default_database().ok_or_else(|| {
            ShoalError::Connection("No default database specified in connection string".to_string())
        })?;

        info!(database = database.name(), "MongoDB client initialized");
        Ok(Self { client, database })
    }

    /// Wrap an already configured database handle
    pub fn from_database(client: Client, database: Database) -> Self {
        Self { client, database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Check if the connection is healthy by pinging the server
    pub async fn ping(&self) -> Result<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| ShoalError::Connection(format!("Ping failed: {}", e)))
    }

    fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection(name)
    }
}

fn find_one_options(options: FindOptions) -> mongo_options::FindOneOptions {
    let mut find_one = mongo_options::FindOneOptions::default();
    find_one.sort = options.sort;
    find_one.skip = options.skip;
    find_one.projection = options.projection;
    find_one
}

fn find_options(options: FindOptions) -> mongo_options::FindOptions {
    let mut find = mongo_options::FindOptions::default();
    find.sort = options.sort;
    find.skip = options.skip;
    find.limit = options.limit;
    find.projection = options.projection;
    find
}

fn update_options(options: UpdateOptions) -> mongo_options::UpdateOptions {
    let mut update = mongo_options::UpdateOptions::default();
    update.upsert = Some(options.upsert);
    update
}

#[async_trait]
impl Driver for MongoDriver {
    async fn find_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> Result<Option<BsonDocument>> {
        let found = self
            .collection(collection)
            .find_one(filter)
            .with_options(find_one_options(options))
            .await?;
        Ok(found)
    }

    async fn find(
        &self,
        collection: &str,
        filter: BsonDocument,
        options: FindOptions,
    ) -> Result<Vec<BsonDocument>> {
        let cursor = self
            .collection(collection)
            .find(filter)
            .with_options(find_options(options))
            .await?;
        let docs: Vec<BsonDocument> = cursor.try_collect().await?;
        Ok(docs)
    }

    async fn count_documents(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let count = self.collection(collection).count_documents(filter).await?;
        Ok(count)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<BsonDocument>,
        options: AggregateOptions,
    ) -> Result<Vec<BsonDocument>> {
        let mut aggregate = mongo_options::AggregateOptions::default();
        aggregate.allow_disk_use = options.allow_disk_use;
        aggregate.batch_size = options.batch_size;

        let cursor = self
            .collection(collection)
            .aggregate(pipeline)
            .with_options(aggregate)
            .await?;
        let docs: Vec<BsonDocument> = cursor.try_collect().await?;
        Ok(docs)
    }

    async fn insert_one(&self, collection: &str, document: BsonDocument) -> Result<Bson> {
        let result = self.collection(collection).insert_one(document).await?;
        Ok(result.inserted_id)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<BsonDocument>) -> Result<Vec<Bson>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let result = self.collection(collection).insert_many(documents).await?;
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome> {
        let result = self
            .collection(collection)
            .update_one(filter, update)
            .with_options(update_options(options))
            .await?;
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome> {
        let result = self
            .collection(collection)
            .update_many(filter, update)
            .with_options(update_options(options))
            .await?;
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let result = self.collection(collection).delete_one(filter).await?;
        Ok(result.deleted_count)
    }

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let result = self.collection(collection).delete_many(filter).await?;
        Ok(result.deleted_count)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        options: UpdateOptions,
    ) -> Result<Option<BsonDocument>> {
        let mut find_and_update = mongo_options::FindOneAndUpdateOptions::default();
        find_and_update.upsert = Some(options.upsert);
        find_and_update.return_document = Some(ReturnDocument::After);

        let updated = self
            .collection(collection)
            .find_one_and_update(filter, update)
            .with_options(find_and_update)
            .await?;
        Ok(updated)
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: BsonDocument,
        options: IndexOptions,
    ) -> Result<String> {
        let mut index_options = mongo_options::IndexOptions::default();
        index_options.name = options.name;
        index_options.unique = options.unique;

        let model = IndexModel::builder()
            .keys(keys)
            .options(index_options)
            .build();
        let result = self.collection(collection).create_index(model).await?;
        Ok(result.index_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_pool_size, Some(1));
        assert_eq!(config.max_pool_size, Some(20));
        assert_eq!(config.app_name, Some("shoal".to_string()));
    }

    #[test]
    fn test_find_options_mapping() {
        let options = FindOptions::default()
            .sort(doc! { "name": 1 })
            .skip(5)
            .limit(10)
            .projection(doc! { "email": 1 });

        let mapped = find_options(options.clone());
        assert_eq!(mapped.sort, Some(doc! { "name": 1 }));
        assert_eq!(mapped.skip, Some(5));
        assert_eq!(mapped.limit, Some(10));
        assert_eq!(mapped.projection, Some(doc! { "email": 1 }));

        let single = find_one_options(options);
        assert_eq!(single.skip, Some(5));
        assert_eq!(single.sort, Some(doc! { "name": 1 }));
    }

    #[test]
    fn test_update_options_mapping() {
        assert_eq!(update_options(UpdateOptions { upsert: true }).upsert, Some(true));
        assert_eq!(update_options(UpdateOptions::default()).upsert, Some(false));
    }

    #[tokio::test]
    #[ignore] // Only run with --ignored flag when MongoDB is available
    async fn test_ping_live_server() {
        let uri = std::env::var("MONGODB_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017/shoal_test".to_string());
        let driver = MongoDriver::connect(&uri).await.unwrap();
        driver.ping().await.unwrap();
    }
}
