//! Metric Block Reader.
//!
//! Layout, all integers little-endian, all offsets absolute within the block:
//!
//! ```text
//! [series regions][per-container series offset indexes][field catalogue]
//! [series-id set][high-offset index][footer]
//! footer = start:u16 end:u16 catalogue:u32 seriesIds:u32 highOffsets:u32 crc32:u32
//! ```
//!
//! A series region is a single TSD stream when the catalogue has one field, otherwise a
//! fixed-offset index (one entry per catalogue position, relative to the end of the index)
//! followed by the field streams.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::ReaderConfig;
use crate::encoding::{crc32, le_u16_at, le_u32_at};
use crate::error::DbError;
use crate::flow::{BlockHandle, StorageQueryFlow};
use crate::offsets::FixedOffsetIndex;
use crate::scanner::QueryScanner;
use crate::series::{LowContainer, SeriesIdSet};
use crate::telemetry::{read_metrics, DbEvent};
use crate::tsd::TsdDecoder;
use crate::types::{FamilyTime, FieldId, FieldMeta, FieldMetas, FieldType, TimeSlot};

/// Footer length: start, end, three section offsets, checksum.
pub const FOOTER_LEN: usize = 2 + 2 + 4 + 4 + 4 + 4;

/// One requested field bound to its sink for the duration of a scan.
#[derive(Clone)]
pub struct FieldAggregator {
    pub meta: FieldMeta,
    /// Position of the field in this block's catalogue.
    pub position: usize,
    pub block: BlockHandle,
}

impl fmt::Debug for FieldAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldAggregator")
            .field("meta", &self.meta)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

/// An opened, immutable metric block. Safe to share across threads; scanners built from it
/// each keep their own cursor.
pub struct MetricBlockReader {
    path: PathBuf,
    data: Vec<u8>,
    start: TimeSlot,
    end: TimeSlot,
    catalogue_offset: usize,
    checksum: u32,
    fields: FieldMetas,
    series_ids: SeriesIdSet,
    high_offsets: Vec<usize>,
    config: ReaderConfig,
}

impl fmt::Debug for MetricBlockReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricBlockReader")
            .field("path", &self.path)
            .field("len", &self.data.len())
            .field("time_range", &(self.start, self.end))
            .field("fields", &self.fields)
            .field("series", &self.series_ids.len())
            .finish()
    }
}

impl MetricBlockReader {
    pub fn open(path: impl Into<PathBuf>, data: Vec<u8>) -> Result<Self, DbError> {
        Self::open_with_config(path, data, ReaderConfig::default())
    }

    /// Parses footer, catalogue, series ids and high-offset index. Series data stays encoded.
    pub fn open_with_config(
        path: impl Into<PathBuf>,
        data: Vec<u8>,
        config: ReaderConfig,
    ) -> Result<Self, DbError> {
        let path = path.into();
        let listener = config.event_listener.clone();
        match Self::parse(&path, data, config) {
            Ok(reader) => {
                read_metrics::record_block_opened();
                listener.on_event(DbEvent::BlockOpened {
                    path: reader.path.clone(),
                    series: reader.series_ids.len(),
                    fields: reader.fields.len(),
                });
                Ok(reader)
            }
            Err(e) => {
                let e = attach_path(e, &path);
                read_metrics::record_block_open_failure();
                listener.on_event(DbEvent::BlockRejected {
                    path,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Reads a block file from disk and opens it.
    pub fn open_file(path: impl AsRef<Path>, config: &ReaderConfig) -> Result<Self, DbError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        Self::open_with_config(path, data, config.clone())
    }

    fn parse(path: &Path, data: Vec<u8>, config: ReaderConfig) -> Result<Self, DbError> {
        config.validate()?;
        if data.len() <= FOOTER_LEN {
            return Err(DbError::corruption(format!(
                "Block of {} bytes is not longer than its {}-byte footer",
                data.len(),
                FOOTER_LEN
            )));
        }
        let footer_pos = data.len() - FOOTER_LEN;
        let u16_at = |off: usize| {
            le_u16_at(&data, footer_pos + off)
                .ok_or_else(|| DbError::corruption("Footer truncated"))
        };
        let u32_at = |off: usize| {
            le_u32_at(&data, footer_pos + off)
                .ok_or_else(|| DbError::corruption("Footer truncated"))
        };
        let start = u16_at(0)?;
        let end = u16_at(2)?;
        let catalogue_offset = u32_at(4)? as usize;
        let series_offset = u32_at(8)? as usize;
        let high_offset = u32_at(12)? as usize;
        let checksum = u32_at(16)?;

        if start > end {
            return Err(DbError::corruption(format!(
                "Time slot range inverted ({} > {})",
                start, end
            )));
        }
        if !(catalogue_offset < series_offset
            && series_offset <= high_offset
            && high_offset < footer_pos)
        {
            return Err(DbError::corruption(format!(
                "Footer offsets out of order (catalogue {}, series ids {}, high {}, footer {})",
                catalogue_offset, series_offset, high_offset, footer_pos
            )));
        }
        if config.verify_checksum {
            let actual = crc32(&data[..data.len() - 4]);
            if actual != checksum {
                return Err(DbError::corruption(format!(
                    "Block checksum mismatch (stored {:#010x}, computed {:#010x})",
                    checksum, actual
                )));
            }
        }

        let fields = decode_catalogue(&data[catalogue_offset..series_offset])?;
        let series_ids = SeriesIdSet::deserialize(&data[series_offset..high_offset])?;

        let high_index = FixedOffsetIndex::decode(&data[high_offset..footer_pos])?;
        if high_index.len() != series_ids.container_count() {
            return Err(DbError::corruption(format!(
                "High-offset index has {} entries for {} containers",
                high_index.len(),
                series_ids.container_count()
            )));
        }
        let mut high_offsets = Vec::with_capacity(high_index.len());
        for rank in 0..high_index.len() {
            let off = high_index
                .get(rank)
                .filter(|&o| o < catalogue_offset)
                .ok_or_else(|| {
                    DbError::corruption(format!("Series offset index {} out of bounds", rank))
                })?;
            high_offsets.push(off);
        }

        Ok(Self {
            path: path.to_path_buf(),
            data,
            start,
            end,
            catalogue_offset,
            checksum,
            fields,
            series_ids,
            high_offsets,
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn series_ids(&self) -> &SeriesIdSet {
        &self.series_ids
    }

    pub fn fields(&self) -> &FieldMetas {
        &self.fields
    }

    /// Closed slot range `[start, end]`.
    pub fn time_range(&self) -> (TimeSlot, TimeSlot) {
        (self.start, self.end)
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Field id to catalogue position.
    pub fn field_indexes(&self) -> HashMap<FieldId, usize> {
        self.fields.indexes()
    }

    pub(crate) fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Series offset index of the container at `container_idx`.
    pub fn series_offsets(&self, container_idx: usize) -> Result<FixedOffsetIndex<'_>, DbError> {
        let pos = *self.high_offsets.get(container_idx).ok_or_else(|| {
            DbError::Internal(format!("No container at index {}", container_idx))
        })?;
        FixedOffsetIndex::decode(&self.data[pos..self.catalogue_offset])
            .map_err(|e| attach_path(e, &self.path))
    }

    /// Binds the requested fields and this block's series for `high_key` into a scanner.
    ///
    /// # Arguments
    /// * `flow` - supplies aggregation sinks per high key and field.
    /// * `family_time` - aggregation window the sinks are requested for.
    /// * `field_ids` - requested fields, in the order of the flow's field aggregates.
    /// * `high_key` - container to scan.
    /// * `low_container` - the caller's candidate low keys for `high_key`.
    ///
    /// # Returns
    /// * `Ok(None)` - no container for `high_key`, no overlapping series, or no field with a sink.
    pub fn load(
        &self,
        flow: &dyn StorageQueryFlow,
        family_time: FamilyTime,
        field_ids: &[FieldId],
        high_key: u16,
        low_container: &LowContainer,
    ) -> Result<Option<QueryScanner<'_>>, DbError> {
        let Some(container_idx) = self.series_ids.container_index(high_key) else {
            return Ok(None);
        };
        let Some(stored) = self.series_ids.container_at(container_idx) else {
            return Ok(None);
        };
        let targets = stored.and(low_container);
        if targets.is_empty() {
            return Ok(None);
        }

        let ctx = flow.aggregator(high_key);
        let aggregates = ctx.field_aggregates();
        let mut field_aggs = Vec::with_capacity(field_ids.len());
        for (idx, field_id) in field_ids.iter().enumerate() {
            let Some(position) = self.fields.position(*field_id) else {
                continue;
            };
            let Some(meta) = self.fields.get(position) else {
                continue;
            };
            let Some(aggregate) = aggregates.get(idx) else {
                continue;
            };
            let Some(block) = aggregate.aggregate_block(family_time) else {
                continue;
            };
            field_aggs.push(FieldAggregator {
                meta: *meta,
                position,
                block,
            });
        }
        if field_aggs.is_empty() {
            return Ok(None);
        }

        let series_offsets = self.series_offsets(container_idx)?;
        Ok(Some(QueryScanner::new(
            self,
            field_aggs,
            high_key,
            stored,
            targets,
            series_offsets,
        )))
    }

    /// Decodes the series region at `offset` into `field_aggs`. Returns the number of values
    /// appended.
    pub fn read_series_data<'a>(
        &'a self,
        offset: usize,
        decoder: &mut TsdDecoder<'a>,
        field_aggs: &[FieldAggregator],
    ) -> Result<usize, DbError> {
        let region = self.region(offset)?;
        if self.fields.len() == 1 {
            let mut appended = 0;
            for agg in field_aggs {
                decoder
                    .reset_with_time_range(region, self.start, self.end)
                    .map_err(|e| attach_path(e, &self.path))?;
                appended += self.read_field(decoder, agg)?;
            }
            return Ok(appended);
        }

        let index = FixedOffsetIndex::decode(region).map_err(|e| attach_path(e, &self.path))?;
        let base = index.encoded_len();
        let mut appended = 0;
        for agg in field_aggs {
            let Some(rel) = index.get(agg.position) else {
                continue;
            };
            let stream = region.get(base + rel..).ok_or_else(|| {
                DbError::corruption_at(
                    format!("Field {} stream starts outside its series region", agg.meta.id),
                    &self.path,
                )
            })?;
            decoder
                .reset_with_time_range(stream, self.start, self.end)
                .map_err(|e| attach_path(e, &self.path))?;
            appended += self.read_field(decoder, agg)?;
        }
        Ok(appended)
    }

    /// Encoded stream of the field at catalogue `position` in the series region at `offset`.
    pub fn field_data(&self, offset: usize, position: usize) -> Result<Option<&[u8]>, DbError> {
        let region = self.region(offset)?;
        if self.fields.len() == 1 {
            return Ok((position == 0).then_some(region));
        }
        let index = FixedOffsetIndex::decode(region).map_err(|e| attach_path(e, &self.path))?;
        let Some(rel) = index.get(position) else {
            return Ok(None);
        };
        region
            .get(index.encoded_len() + rel..)
            .map(Some)
            .ok_or_else(|| {
                DbError::corruption_at("Field stream starts outside its series region", &self.path)
            })
    }

    fn region(&self, offset: usize) -> Result<&[u8], DbError> {
        self.data
            .get(offset..self.catalogue_offset)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                DbError::corruption_at(
                    format!("Series offset {} outside the data area", offset),
                    &self.path,
                )
            })
    }

    /// Feeds one field's present slots into its sink until the range ends or the sink stops.
    fn read_field(
        &self,
        decoder: &mut TsdDecoder<'_>,
        agg: &FieldAggregator,
    ) -> Result<usize, DbError> {
        let mut sink = agg.block.lock()?;
        let mut appended = 0;
        while decoder.advance().map_err(|e| attach_path(e, &self.path))? {
            if !decoder.has_value() {
                continue;
            }
            appended += 1;
            if sink.append(decoder.slot(), f64::from_bits(decoder.value())) {
                break;
            }
        }
        Ok(appended)
    }
}

fn decode_catalogue(buf: &[u8]) -> Result<FieldMetas, DbError> {
    let Some((&count, entries)) = buf.split_first() else {
        return Err(DbError::corruption("Field catalogue is empty"));
    };
    if entries.len() != count as usize * 2 {
        return Err(DbError::corruption(format!(
            "Field catalogue declares {} fields in {} bytes",
            count,
            entries.len()
        )));
    }
    let mut metas: Vec<FieldMeta> = Vec::with_capacity(count as usize);
    for pair in entries.chunks_exact(2) {
        let id = FieldId(pair[0]);
        if metas.iter().any(|m| m.id == id) {
            return Err(DbError::corruption(format!(
                "Field catalogue repeats field id {}",
                id
            )));
        }
        metas.push(FieldMeta::new(id, FieldType::try_from(pair[1])?));
    }
    Ok(FieldMetas::new(metas))
}

fn attach_path(e: DbError, path: &Path) -> DbError {
    match e {
        DbError::Corruption {
            details,
            path: None,
        } => DbError::corruption_at(details, path),
        other => other,
    }
}
