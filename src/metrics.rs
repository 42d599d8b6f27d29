//! Prometheus metrics for backup inventory
//!
//! Defines metrics for:
//! - Listed pages and entries per backend
//! - Deleted objects per backend
//! - Inventory operations by outcome, and their duration

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::errors::{InventoryError, Result};

lazy_static! {
    /// Registry for all metrics
    pub static ref REGISTRY: Registry = Registry::new();

    /// Listing round trips by backend
    pub static ref LIST_PAGES: IntCounterVec = IntCounterVec::new(
        Opts::new("backup_inventory_list_pages_total", "Total listed pages"),
        &["backend"]
    )
    .expect("Failed to create LIST_PAGES metric");

    /// Listed entries by backend and entry kind (object, prefix)
    pub static ref LISTED_ENTRIES: IntCounterVec = IntCounterVec::new(
        Opts::new("backup_inventory_listed_entries_total", "Total listed entries"),
        &["backend", "kind"]
    )
    .expect("Failed to create LISTED_ENTRIES metric");

    /// Deleted objects by backend
    pub static ref OBJECTS_DELETED: IntCounterVec = IntCounterVec::new(
        Opts::new("backup_inventory_objects_deleted_total", "Total deleted objects"),
        &["backend"]
    )
    .expect("Failed to create OBJECTS_DELETED metric");

    /// Operations by name and status
    pub static ref OPERATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("backup_inventory_operations_total", "Total inventory operations"),
        &["operation", "status"]
    )
    .expect("Failed to create OPERATIONS metric");

    /// Operation duration histogram
    pub static ref OPERATION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "backup_inventory_operation_duration_seconds",
            "Inventory operation duration in seconds"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["operation"]
    )
    .expect("Failed to create OPERATION_DURATION metric");
}

/// Register all metrics with [`REGISTRY`]
///
/// Call once at startup; a second call reports the duplicate registration.
pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(LIST_PAGES.clone()))?;
    REGISTRY.register(Box::new(LISTED_ENTRIES.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_DELETED.clone()))?;
    REGISTRY.register(Box::new(OPERATIONS.clone()))?;
    REGISTRY.register(Box::new(OPERATION_DURATION.clone()))?;
    Ok(())
}

/// Count an operation outcome; cancellation is tracked apart from failures
pub fn record_operation<T>(operation: &str, result: &Result<T>) {
    let status = match result {
        Ok(_) => "ok",
        Err(InventoryError::Cancelled) => "cancelled",
        Err(_) => "error",
    };
    OPERATIONS.with_label_values(&[operation, status]).inc();
}

/// Text exposition of everything registered with [`REGISTRY`]
pub fn render() -> prometheus::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
