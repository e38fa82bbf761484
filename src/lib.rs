#![doc = include_str!("../README.md")]
// Declare modules
pub mod config;
pub mod encoding;
pub mod error;
pub mod flow;
pub mod metric_block;
pub mod offsets;
pub mod predicate;
pub mod scanner;
pub mod series;
pub mod table;
pub mod tag_entry;
pub mod tag_reader;
pub mod telemetry;
pub mod trie;
pub mod tsd;
pub mod types;
pub mod writer;

/// Read-path configuration.
pub use crate::config::ReaderConfig;
/// Error type for read-path operations.
pub use crate::error::DbError;
/// Aggregation collaborators supplied by the query executor.
pub use crate::flow::{
    AggregateBlock, AggregatorContext, BlockHandle, FieldAggregate, Scanner, StorageQueryFlow,
};
/// Metric block reader and the per-field sink binding used while scanning.
pub use crate::metric_block::{FieldAggregator, MetricBlockReader};
/// Fixed-width offset tables addressed by rank.
pub use crate::offsets::{FixedOffsetEncoder, FixedOffsetIndex};
/// Filters over the values of one tag key.
pub use crate::predicate::TagValuePredicate;
/// Query and merge scanners over an opened block.
pub use crate::scanner::{MergeScanner, QueryScanner, ScanStats};
/// Sparse series-id set split into 16-bit containers.
pub use crate::series::{LowContainer, SeriesIdSet};
/// Byte-buffer tables keyed by id.
pub use crate::table::{MemTable, TableReader};
/// Decoded tag-key blocks and the factory that builds them.
pub use crate::tag_entry::{
    DefaultEntrySetFactory, EntrySetFactory, TagValueEntries, TagValueEntrySet,
};
/// Tag value index reader over every source generation.
pub use crate::tag_reader::TagValueReader;
/// Structured event hook for observability.
pub use crate::telemetry::{DbEvent, DbEventListener};
/// Identifier and field catalogue types.
pub use crate::types::{
    FamilyTime, FieldId, FieldMeta, FieldMetas, FieldType, SeriesId, TagKeyId, TagValueId,
    TimeSlot,
};
/// Reference block encoders.
pub use crate::writer::{MetricBlockWriter, TagValueBlockWriter};
