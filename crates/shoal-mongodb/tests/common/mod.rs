//! Shared helpers for shoal-mongodb integration tests

#![allow(dead_code)]

use shoal_mongodb::{FieldDescriptor, FieldType, MemoryDriver};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per test binary (`RUST_LOG` applies)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A recording driver, so tests can assert on the calls a façade made
pub fn memory_driver() -> Arc<MemoryDriver> {
    init_tracing();
    Arc::new(MemoryDriver::recording())
}

pub fn user_schema() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new("email", FieldType::String).required(),
        FieldDescriptor::new("name", FieldType::String),
        FieldDescriptor::new("age", FieldType::Number).default_value(99),
        FieldDescriptor::new("tags", FieldType::Array),
    ]
}
