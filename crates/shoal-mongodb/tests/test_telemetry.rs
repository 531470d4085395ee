//! Slow-operation telemetry through a Model, on tokio's paused clock

mod common;

use async_trait::async_trait;
use bson::{doc, Bson, Document as BsonDocument};
use common::{memory_driver, user_schema};
use shoal_mongodb::{
    AggregateOptions, Driver, FindOptions, IndexOptions, MemoryDriver, Model, ModelConfig, Result,
    TelemetryRecord, UpdateOptions, UpdateOutcome, TELEMETRY_COLLECTION,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Delays every call on user collections by a configurable amount
struct SlowDriver {
    inner: Arc<MemoryDriver>,
    delay_ms: AtomicU64,
}

impl SlowDriver {
    fn new(inner: Arc<MemoryDriver>) -> Self {
        Self {
            inner,
            delay_ms: AtomicU64::new(0),
        }
    }

    fn set_delay(&self, millis: u64) {
        self.delay_ms.store(millis, Ordering::SeqCst);
    }

    async fn pause(&self, collection: &str) {
        if collection == TELEMETRY_COLLECTION {
            return;
        }
        let millis = self.delay_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

#[async_trait]
impl Driver for SlowDriver {
    async fn find_one(&self, c: &str, f: BsonDocument, o: FindOptions) -> Result<Option<BsonDocument>> {
        self.pause(c).await;
        self.inner.find_one(c, f, o).await
    }

    async fn find(&self, c: &str, f: BsonDocument, o: FindOptions) -> Result<Vec<BsonDocument>> {
        self.pause(c).await;
        self.inner.find(c, f, o).await
    }

    async fn count_documents(&self, c: &str, f: BsonDocument) -> Result<u64> {
        self.pause(c).await;
        self.inner.count_documents(c, f).await
    }

    async fn aggregate(
        &self,
        c: &str,
        p: Vec<BsonDocument>,
        o: AggregateOptions,
    ) -> Result<Vec<BsonDocument>> {
        self.pause(c).await;
        self.inner.aggregate(c, p, o).await
    }

    async fn insert_one(&self, c: &str, d: BsonDocument) -> Result<Bson> {
        self.pause(c).await;
        self.inner.insert_one(c, d).await
    }

    async fn insert_many(&self, c: &str, d: Vec<BsonDocument>) -> Result<Vec<Bson>> {
        self.pause(c).await;
        self.inner.insert_many(c, d).await
    }

    async fn update_one(
        &self,
        c: &str,
        f: BsonDocument,
        u: BsonDocument,
        o: UpdateOptions,
    ) -> Result<UpdateOutcome> {
        self.pause(c).await;
        self.inner.update_one(c, f, u, o).await
    }

    async fn update_many(
        &self,
        c: &str,
        f: BsonDocument,
        u: BsonDocument,
        o: UpdateOptions,
    ) -> Result<UpdateOutcome> {
        self.pause(c).await;
        self.inner.update_many(c, f, u, o).await
    }

    async fn delete_one(&self, c: &str, f: BsonDocument) -> Result<u64> {
        self.pause(c).await;
        self.inner.delete_one(c, f).await
    }

    async fn delete_many(&self, c: &str, f: BsonDocument) -> Result<u64> {
        self.pause(c).await;
        self.inner.delete_many(c, f).await
    }

    async fn find_one_and_update(
        &self,
        c: &str,
        f: BsonDocument,
        u: BsonDocument,
        o: UpdateOptions,
    ) -> Result<Option<BsonDocument>> {
        self.pause(c).await;
        self.inner.find_one_and_update(c, f, u, o).await
    }

    async fn create_index(&self, c: &str, k: BsonDocument, o: IndexOptions) -> Result<String> {
        self.pause(c).await;
        self.inner.create_index(c, k, o).await
    }
}

fn setup(config: ModelConfig) -> (Arc<MemoryDriver>, Arc<SlowDriver>, Model) {
    let memory = memory_driver();
    let slow = Arc::new(SlowDriver::new(memory.clone()));
    let model = Model::new("users", user_schema(), vec![], config, slow.clone()).unwrap();
    (memory, slow, model)
}

async fn records(memory: &MemoryDriver) -> Vec<TelemetryRecord> {
    memory
        .find(TELEMETRY_COLLECTION, doc! {}, FindOptions::default())
        .await
        .unwrap()
        .into_iter()
        .map(|d| bson::from_document(d).unwrap())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_debug_off_writes_no_telemetry() {
    let (memory, slow, model) = setup(ModelConfig::default().with_slow_query_threshold(50));
    slow.set_delay(500);

    model.insert_one(doc! { "email": "a@b.c" }).await.unwrap();
    model.count(doc! {}).await.unwrap();
    model.drain_telemetry().await;

    assert!(records(&memory).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_threshold_separates_fast_and_slow_operations() {
    let config = ModelConfig::default().with_debug(true).with_slow_query_threshold(50);
    let (memory, slow, model) = setup(config);

    slow.set_delay(10);
    model.find(doc! { "email": "fast@b.c" }, FindOptions::default()).await.unwrap();
    model.drain_telemetry().await;
    assert!(records(&memory).await.is_empty());

    slow.set_delay(100);
    model.find(doc! { "email": "slow@b.c" }, FindOptions::default()).await.unwrap();
    model.drain_telemetry().await;

    let written = records(&memory).await;
    assert_eq!(written.len(), 1);
    let record = &written[0];
    assert_eq!(record.model, "users");
    assert!((100..=101).contains(&record.time), "time = {}", record.time);
    assert!(record.query.contains("slow@b.c"));
    assert!(record.query.contains("\"op\":\"find\""));
}

#[tokio::test(start_paused = true)]
async fn test_telemetry_failure_leaves_result_intact() {
    let config = ModelConfig::default().with_debug(true).with_slow_query_threshold(0);
    let (memory, slow, model) = setup(config);
    memory.fail_collection(TELEMETRY_COLLECTION);
    slow.set_delay(20);

    let stored = model.insert_one(doc! { "email": "a@b.c" }).await.unwrap();
    model.drain_telemetry().await;

    assert_eq!(stored.get_str("email").unwrap(), "a@b.c");
    assert_eq!(memory.call_count("insert_one", TELEMETRY_COLLECTION), 1);
    assert_eq!(model.count(doc! {}).await.unwrap(), 1);
}
