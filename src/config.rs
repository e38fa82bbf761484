//! Read-path configuration.

use std::sync::Arc;

use serde::Deserialize;

use crate::error::DbError;
use crate::telemetry::{noop_event_listener, DbEventListener};

/// Configuration shared by block readers and tag value readers.
///
/// Deserializes from a partial table: every field falls back to its default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Verify the footer crc32 of metric blocks on open.
    pub verify_checksum: bool,
    /// Tag lookups fan out over rayon once a reader has at least this many sources.
    pub parallel_source_threshold: usize,
    /// Longest accepted regex predicate, in bytes.
    pub max_regex_pattern_len: usize,
    /// Compiled size limit handed to the regex builder.
    pub regex_size_limit: usize,
    /// Structured event hook for observability (no-op by default).
    #[serde(skip, default = "noop_event_listener")]
    pub event_listener: Arc<dyn DbEventListener>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            verify_checksum: true,
            parallel_source_threshold: 4,
            max_regex_pattern_len: 1024,
            regex_size_limit: 1024 * 1024,
            event_listener: noop_event_listener(),
        }
    }
}

impl ReaderConfig {
    pub fn validate(&self) -> Result<(), DbError> {
        if self.parallel_source_threshold == 0 {
            return Err(DbError::ConfigError(
                "parallel_source_threshold must be > 0".to_string(),
            ));
        }
        if self.max_regex_pattern_len == 0 {
            return Err(DbError::ConfigError(
                "max_regex_pattern_len must be > 0".to_string(),
            ));
        }
        if self.regex_size_limit == 0 {
            return Err(DbError::ConfigError(
                "regex_size_limit must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_event_listener(mut self, listener: Arc<dyn DbEventListener>) -> Self {
        self.event_listener = listener;
        self
    }
}
