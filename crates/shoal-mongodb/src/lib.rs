//! Schema-driven document mapping for MongoDB
//!
//! shoal lets a caller declare a collection's fields, defaults and indexes,
//! then runs CRUD and aggregation operations against it. Writes are
//! processed against the schema first: undeclared fields are dropped,
//! values are coerced to their declared types, defaults fill the gaps,
//! required fields are enforced on insert, and every write gets a
//! `createdAt` or `updatedAt` stamp.
//!
//! # Features
//! - [`Model`]: schema-bound collection façade
//! - [`QueryBuilder`]: schema-less façade taking the collection per call
//! - Slow-operation telemetry written to [`TELEMETRY_COLLECTION`]
//! - [`MongoDriver`] for a real server, [`MemoryDriver`] for tests and embedding

pub mod clock;
pub mod config;
pub mod connection;
pub mod conversion;
pub mod dispatch;
pub mod driver;
pub mod memory;
pub mod model;
pub mod processor;
pub mod query;
pub mod types;
pub mod validation;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ModelConfig, PresencePolicy, TELEMETRY_DISABLED};
pub use connection::{MongoDriver, PoolConfig};
pub use dispatch::{Dispatcher, TelemetryRecord, TELEMETRY_COLLECTION};
pub use driver::{AggregateOptions, Driver, FindOptions, IndexOptions, UpdateOptions, UpdateOutcome};
pub use memory::MemoryDriver;
pub use model::{IndexReport, Model};
pub use processor::{process_document, DocumentProcessor, WriteKind};
pub use query::{FindQuery, QueryBuilder};
pub use shoal_common::{Result, ShoalError};
pub use types::{
    FieldDescriptor, FieldType, IndexDescriptor, IndexDirection, UpdateModifier, CREATED_AT,
    RESERVED_FIELDS, UPDATED_AT,
};
pub use validation::{default_matches_type, validate_schema, ValidatedCollectionName, ValidatedFieldName};
