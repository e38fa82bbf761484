//! Query and merge scanners over an opened metric block. Single-pass, single-caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::DbError;
use crate::flow::Scanner;
use crate::metric_block::{FieldAggregator, MetricBlockReader};
use crate::offsets::FixedOffsetIndex;
use crate::series::LowContainer;
use crate::telemetry::{read_metrics, DbEvent};
use crate::tsd::TsdDecoder;
use crate::types::{FieldId, TimeSlot};

/// Outcome of a multi-series scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub series: usize,
    pub values: usize,
    pub cancelled: bool,
}

/// Decodes the in-scope series of one container into the query's field sinks.
///
/// Offsets are addressed by rank within the block's stored container; the target set only
/// decides which series are decoded.
pub struct QueryScanner<'a> {
    reader: &'a MetricBlockReader,
    field_aggs: Vec<FieldAggregator>,
    high_key: u16,
    container: &'a LowContainer,
    targets: LowContainer,
    series_offsets: FixedOffsetIndex<'a>,
    decoder: TsdDecoder<'a>,
}

impl<'a> QueryScanner<'a> {
    pub(crate) fn new(
        reader: &'a MetricBlockReader,
        field_aggs: Vec<FieldAggregator>,
        high_key: u16,
        container: &'a LowContainer,
        targets: LowContainer,
        series_offsets: FixedOffsetIndex<'a>,
    ) -> Self {
        Self {
            reader,
            field_aggs,
            high_key,
            container,
            targets,
            series_offsets,
            decoder: TsdDecoder::new(),
        }
    }

    pub fn high_key(&self) -> u16 {
        self.high_key
    }

    pub fn field_aggregators(&self) -> &[FieldAggregator] {
        &self.field_aggs
    }

    /// Low keys that are both stored in the block and requested by the caller.
    pub fn targets(&self) -> &LowContainer {
        &self.targets
    }

    /// Decodes every target series in ascending order.
    pub fn scan_all(&mut self) -> Result<ScanStats, DbError> {
        self.scan_until(&AtomicBool::new(false))
    }

    /// Like [`QueryScanner::scan_all`], checking `cancel` before each series.
    pub fn scan_until(&mut self, cancel: &AtomicBool) -> Result<ScanStats, DbError> {
        let lows: Vec<u16> = self.targets.iter().collect();
        let mut stats = ScanStats::default();
        for low in lows {
            if cancel.load(Ordering::Relaxed) {
                stats.cancelled = true;
                self.reader
                    .config()
                    .event_listener
                    .on_event(DbEvent::ScanCancelled {
                        path: self.reader.path().to_path_buf(),
                        scanned_series: stats.series,
                    });
                break;
            }
            if let Some(values) = self.scan_series(low)? {
                stats.series += 1;
                stats.values += values;
            }
        }
        Ok(stats)
    }

    /// Decodes one series; `None` if it is out of scope.
    ///
    /// A stored series without an offset entry is corruption, not absence.
    fn scan_series(&mut self, low_series_id: u16) -> Result<Option<usize>, DbError> {
        if !self.targets.contains(low_series_id) {
            return Ok(None);
        }
        let rank = self.container.rank(low_series_id);
        let Some(offset) = rank
            .checked_sub(1)
            .and_then(|r| self.series_offsets.get(r))
        else {
            return Err(DbError::corruption_at(
                format!(
                    "Series {} of container {} has no offset entry (rank {}, {} entries)",
                    low_series_id,
                    self.high_key,
                    rank,
                    self.series_offsets.len()
                ),
                self.reader.path(),
            ));
        };
        let values = self
            .reader
            .read_series_data(offset, &mut self.decoder, &self.field_aggs)?;
        read_metrics::record_scan(1, values as u64);
        Ok(Some(values))
    }
}

impl<'a> Scanner for QueryScanner<'a> {
    fn scan(&mut self, low_series_id: u16) -> Result<bool, DbError> {
        Ok(self.scan_series(low_series_id)?.is_some())
    }
}

/// Forward-only probe aligning one block against a global ascending series sequence.
///
/// Callers drive `(high_key, low)` in non-decreasing order and must visit every high key:
/// each call advances at most one container.
pub struct MergeScanner<'a> {
    reader: &'a MetricBlockReader,
    high_keys: &'a [u16],
    cursor: usize,
    container: Option<&'a LowContainer>,
    series_offsets: Option<FixedOffsetIndex<'a>>,
}

impl<'a> MergeScanner<'a> {
    pub fn new(reader: &'a MetricBlockReader) -> Result<Self, DbError> {
        let mut scanner = Self {
            reader,
            high_keys: reader.series_ids().high_keys(),
            cursor: 0,
            container: None,
            series_offsets: None,
        };
        if !scanner.high_keys.is_empty() {
            scanner.load_container(0)?;
        }
        Ok(scanner)
    }

    /// Byte offset of the series region for `(high_key, low_series_id)`, or `None` when this
    /// block has no such series.
    pub fn scan(&mut self, high_key: u16, low_series_id: u16) -> Result<Option<usize>, DbError> {
        let Some(mut current) = self.current_high_key() else {
            return Ok(None);
        };
        if current < high_key {
            if self.cursor + 1 >= self.high_keys.len() {
                self.cursor = self.high_keys.len();
                self.container = None;
                self.series_offsets = None;
                return Ok(None);
            }
            self.load_container(self.cursor + 1)?;
            current = self.high_keys[self.cursor];
        }
        if current != high_key {
            return Ok(None);
        }
        let (Some(container), Some(offsets)) = (self.container, self.series_offsets.as_ref())
        else {
            return Ok(None);
        };
        if !container.contains(low_series_id) {
            return Ok(None);
        }
        let offset = offsets.get(container.rank(low_series_id) - 1);
        if offset.is_some() {
            read_metrics::record_merge_probe();
        }
        Ok(offset)
    }

    pub fn current_high_key(&self) -> Option<u16> {
        self.high_keys.get(self.cursor).copied()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.high_keys.len()
    }

    pub fn field_indexes(&self) -> HashMap<FieldId, usize> {
        self.reader.field_indexes()
    }

    pub fn slot_range(&self) -> (TimeSlot, TimeSlot) {
        self.reader.time_range()
    }

    /// Raw stream of the field at catalogue `position` for a region returned by `scan`.
    pub fn field_data(&self, offset: usize, position: usize) -> Result<Option<&'a [u8]>, DbError> {
        self.reader.field_data(offset, position)
    }

    fn load_container(&mut self, idx: usize) -> Result<(), DbError> {
        self.cursor = idx;
        self.container = self.reader.series_ids().container_at(idx);
        self.series_offsets = Some(self.reader.series_offsets(idx)?);
        Ok(())
    }
}
