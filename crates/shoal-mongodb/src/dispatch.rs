//! Operation dispatch with slow-operation telemetry
//!
//! Every model operation runs through [`Dispatcher::dispatch`]. With
//! `debug` off the operation is awaited directly. With `debug` on it is
//! timed, and when a threshold is configured and exceeded a
//! [`TelemetryRecord`] is written to [`TELEMETRY_COLLECTION`] on a detached
//! task. The caller never waits for that write and never sees its failure.

use crate::clock::Clock;
use crate::config::ModelConfig;
use crate::driver::Driver;
use bson::{Bson, DateTime};
use serde::{Deserialize, Serialize};
use shoal_common::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Side collection receiving slow-operation records
pub const TELEMETRY_COLLECTION: &str = "_shoal_query_log";

/// One slow-operation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Collection name of the model that ran the operation
    pub model: String,
    /// Relaxed extended JSON of the operation and its arguments
    pub query: String,
    /// Elapsed milliseconds
    pub time: i64,
    pub date: DateTime,
}

/// Times operations for one model and reports the slow ones
pub struct Dispatcher {
    model: String,
    config: ModelConfig,
    driver: Arc<dyn Driver>,
    clock: Arc<dyn Clock>,
    telemetry: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        model: impl Into<String>,
        config: ModelConfig,
        driver: Arc<dyn Driver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            model: model.into(),
            config,
            driver,
            clock,
            telemetry: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// True when a slow operation would produce a telemetry record
    pub fn records_telemetry(&self) -> bool {
        self.config.debug && self.config.slow_query_threshold().is_some()
    }

    /// Build the query description only when it can end up in a record
    pub fn capture(&self, describe: impl FnOnce() -> Bson) -> Option<Bson> {
        if self.records_telemetry() {
            Some(describe())
        } else {
            None
        }
    }

    /// Run `op`, returning its result unchanged
    pub async fn dispatch<T, F>(&self, query: Option<Bson>, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.config.debug {
            return op.await;
        }

        let started = Instant::now();
        let result = op.await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match self.config.slow_query_threshold() {
            Some(threshold) if elapsed_ms > threshold => {
                warn!(model = %self.model, elapsed_ms, threshold, "Slow operation");
                self.record(query.unwrap_or(Bson::Null), elapsed_ms);
            }
            _ => debug!(model = %self.model, elapsed_ms, "Operation finished"),
        }

        result
    }

    /// Wait until every telemetry write started so far has finished
    pub async fn drain(&self) {
        self.telemetry.close();
        self.telemetry.wait().await;
        self.telemetry.reopen();
    }

    fn record(&self, query: Bson, elapsed_ms: u64) {
        let record = TelemetryRecord {
            model: self.model.clone(),
            query: query.into_relaxed_extjson().to_string(),
            time: i64::try_from(elapsed_ms).unwrap_or(i64::MAX),
            date: self.clock.now(),
        };

        let document = match bson::to_document(&record) {
            Ok(document) => document,
            Err(e) => {
                warn!(model = %self.model, error = %e, "Failed to encode telemetry record");
                return;
            }
        };

        let driver = Arc::clone(&self.driver);
        let model = self.model.clone();
        self.telemetry.spawn(async move {
            if let Err(e) = driver.insert_one(TELEMETRY_COLLECTION, document).await {
                warn!(model = %model, error = %e, "Failed to write telemetry record");
            }
        });
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("model", &self.model)
            .field("config", &self.config)
            .field("pending_telemetry", &self.telemetry.len())
            .finish()
    }
}
