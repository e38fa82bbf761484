//! Reference encoders for tag-key blocks and metric blocks.
//!
//! They produce exactly the layouts the readers consume. Flushing, compaction and file
//! management belong to the write path and are not handled here.

use roaring::RoaringBitmap;

use crate::encoding::{crc32, write_u16, write_u32};
use crate::error::DbError;
use crate::offsets::FixedOffsetEncoder;
use crate::series::SeriesIdSet;
use crate::trie::TrieBuilder;
use crate::tsd::TsdEncoder;
use crate::types::{split_series_id, FieldMeta, SeriesId, TagValueId, TimeSlot};

/// Builds one tag-key block.
#[derive(Debug, Default)]
pub struct TagValueBlockWriter {
    trie: TrieBuilder,
    ids: RoaringBitmap,
}

impl TagValueBlockWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: impl AsRef<[u8]>, id: TagValueId) {
        self.trie.insert(value.as_ref(), id);
        self.ids.insert(id);
    }

    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    pub fn finish(&self) -> Result<Vec<u8>, DbError> {
        let trie = self.trie.encode();
        let trie_len = u32::try_from(trie.len())
            .map_err(|_| DbError::Internal("Trie larger than 4 GiB".to_string()))?;
        let mut out = Vec::with_capacity(4 + trie.len());
        write_u32(&mut out, trie_len);
        out.extend_from_slice(&trie);
        SeriesIdSet::from_bitmap(self.ids.clone()).serialize_into(&mut out)?;
        Ok(out)
    }
}

/// Builds one metric block. Series must be added in ascending id order.
#[derive(Debug)]
pub struct MetricBlockWriter {
    start: TimeSlot,
    end: TimeSlot,
    fields: Vec<FieldMeta>,
    data: Vec<u8>,
    series: Vec<(SeriesId, usize)>,
}

impl MetricBlockWriter {
    pub fn new(start: TimeSlot, end: TimeSlot, fields: Vec<FieldMeta>) -> Result<Self, DbError> {
        if start > end {
            return Err(DbError::Internal(format!(
                "Block slot range inverted ({} > {})",
                start, end
            )));
        }
        if fields.len() > u8::MAX as usize {
            return Err(DbError::Internal(format!(
                "{} fields exceed the catalogue limit of 255",
                fields.len()
            )));
        }
        for (i, f) in fields.iter().enumerate() {
            if fields[..i].iter().any(|o| o.id == f.id) {
                return Err(DbError::Internal(format!("Duplicate field id {}", f.id)));
            }
        }
        Ok(Self {
            start,
            end,
            fields,
            data: Vec::new(),
            series: Vec::new(),
        })
    }

    /// Appends one series. `values[i]` holds the `(slot, value)` points of catalogue field `i`.
    pub fn add_series(
        &mut self,
        series_id: SeriesId,
        values: &[Vec<(TimeSlot, f64)>],
    ) -> Result<(), DbError> {
        if let Some(&(last, _)) = self.series.last() {
            if series_id <= last {
                return Err(DbError::Internal(format!(
                    "Series ids must be strictly ascending (got {} after {})",
                    series_id, last
                )));
            }
        }
        if values.len() != self.fields.len() {
            return Err(DbError::Internal(format!(
                "Series {} has {} field streams for {} fields",
                series_id,
                values.len(),
                self.fields.len()
            )));
        }

        let mut streams = Vec::with_capacity(values.len());
        for points in values {
            let mut enc = TsdEncoder::new(self.start);
            for &(slot, v) in points {
                if slot > self.end {
                    return Err(DbError::Internal(format!(
                        "Slot {} outside block range [{}, {}]",
                        slot, self.start, self.end
                    )));
                }
                enc.append(slot, v)?;
            }
            streams.push(enc.finish());
        }

        let offset = self.data.len();
        if let [single] = streams.as_slice() {
            self.data.extend_from_slice(single);
        } else {
            let mut index = FixedOffsetEncoder::new();
            let mut rel = 0usize;
            for s in &streams {
                index.add(to_u32(rel)?);
                rel += s.len();
            }
            index.encode_into(&mut self.data)?;
            for s in &streams {
                self.data.extend_from_slice(s);
            }
        }
        self.series.push((series_id, offset));
        Ok(())
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn finish(self) -> Result<Vec<u8>, DbError> {
        let mut out = self.data;

        // per-container series offset indexes, ascending high key
        let mut container_offsets = FixedOffsetEncoder::new();
        let mut i = 0;
        while i < self.series.len() {
            let (high, _) = split_series_id(self.series[i].0);
            let mut index = FixedOffsetEncoder::new();
            while i < self.series.len() && split_series_id(self.series[i].0).0 == high {
                index.add(to_u32(self.series[i].1)?);
                i += 1;
            }
            container_offsets.add(to_u32(out.len())?);
            index.encode_into(&mut out)?;
        }

        let catalogue_offset = to_u32(out.len())?;
        out.push(self.fields.len() as u8);
        for f in &self.fields {
            out.push(f.id.0);
            out.push(f.field_type.as_u8());
        }

        let series_offset = to_u32(out.len())?;
        let ids: SeriesIdSet = self.series.iter().map(|&(id, _)| id).collect();
        ids.serialize_into(&mut out)?;

        let high_offset = to_u32(out.len())?;
        container_offsets.encode_into(&mut out)?;

        write_u16(&mut out, self.start);
        write_u16(&mut out, self.end);
        write_u32(&mut out, catalogue_offset);
        write_u32(&mut out, series_offset);
        write_u32(&mut out, high_offset);
        let checksum = crc32(&out);
        write_u32(&mut out, checksum);
        Ok(out)
    }
}

fn to_u32(v: usize) -> Result<u32, DbError> {
    u32::try_from(v).map_err(|_| DbError::Internal(format!("Offset {} exceeds u32", v)))
}
