//! Collaborator interfaces between block scanning and the query executor.

use std::sync::{Arc, Mutex};

use crate::error::DbError;
use crate::types::{FamilyTime, TimeSlot};

/// Caller-owned aggregation sink for one field.
pub trait AggregateBlock: Send {
    /// Appends a value. Returning `true` asks the decoder to stop feeding this field.
    fn append(&mut self, slot: TimeSlot, value: f64) -> bool;
}

/// Shared handle to a sink; scanners lock it once per field decode.
pub type BlockHandle = Arc<Mutex<dyn AggregateBlock>>;

/// Produces sinks for one requested field.
pub trait FieldAggregate: Send + Sync {
    /// Sink for `family_time`, or `None` when that window is not aggregated
    /// (outside retention or rollup range).
    fn aggregate_block(&self, family_time: FamilyTime) -> Option<BlockHandle>;
}

/// Per-high-key aggregation state of one query.
pub trait AggregatorContext: Send + Sync {
    /// Field aggregates in the order the query requested its fields.
    fn field_aggregates(&self) -> &[Arc<dyn FieldAggregate>];
}

/// Query-level flow handing out aggregator contexts.
pub trait StorageQueryFlow: Send + Sync {
    fn aggregator(&self, high_key: u16) -> Arc<dyn AggregatorContext>;
}

/// Per-series probe driven by the executor.
pub trait Scanner {
    /// Decodes the series with this low key if it is in scope. Returns whether it was scanned.
    fn scan(&mut self, low_series_id: u16) -> Result<bool, DbError>;
}
