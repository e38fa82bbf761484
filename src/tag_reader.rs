//! Tag Value Index Reader: answers predicate and enumeration queries for a tag key across
//! every source generation that holds a block for it.

use std::collections::BTreeSet;
use std::sync::Arc;

use rayon::prelude::*;
use roaring::RoaringBitmap;

use crate::config::ReaderConfig;
use crate::error::DbError;
use crate::predicate::TagValuePredicate;
use crate::series::SeriesIdSet;
use crate::table::TableReader;
use crate::tag_entry::{DefaultEntrySetFactory, EntrySetFactory};
use crate::telemetry::{read_metrics, DbEvent};
use crate::trie::Trie;
use crate::types::{TagKeyId, TagValueId};

/// Reader over tag-key blocks, sources ordered oldest to newest.
///
/// Holds no state besides its sources: each call re-resolves every source and unions the
/// results, so value ids must be unique per key across generations.
#[derive(Debug, Clone)]
pub struct TagValueReader {
    sources: Vec<Arc<dyn TableReader>>,
    factory: Arc<dyn EntrySetFactory>,
    config: ReaderConfig,
}

impl TagValueReader {
    pub fn new(sources: Vec<Arc<dyn TableReader>>) -> Self {
        Self {
            sources,
            factory: Arc::new(DefaultEntrySetFactory),
            config: ReaderConfig::default(),
        }
    }

    pub fn with_config(
        sources: Vec<Arc<dyn TableReader>>,
        config: ReaderConfig,
    ) -> Result<Self, DbError> {
        config.validate()?;
        Ok(Self {
            sources,
            factory: Arc::new(DefaultEntrySetFactory),
            config,
        })
    }

    /// Replaces the entry-set constructor.
    pub fn with_factory(mut self, factory: Arc<dyn EntrySetFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Union of every value id stored under `tag_key_id`.
    ///
    /// # Returns
    /// * `Ok(set)` - possibly empty if the key's blocks hold no values.
    /// * `Err(DbError::NotFound)` - no source has a block for the key.
    /// * `Err(DbError::Corruption)` - a block failed to decode.
    pub fn get_all_value_ids(&self, tag_key_id: TagKeyId) -> Result<SeriesIdSet, DbError> {
        let blocks = self.blocks(tag_key_id)?;
        let parts = self.map_blocks(&blocks, |block| {
            let entries = self.factory.create(block)?;
            Ok(entries.all_value_ids().bitmap().clone())
        })?;
        Ok(union_all(parts).into())
    }

    /// Resolves `predicate` against the key's values in every source.
    ///
    /// # Returns
    /// * `Ok(set)` - never empty.
    /// * `Err(DbError::NotFound)` - the key is absent, or nothing matched.
    /// * `Err(DbError::InvalidPredicate)` - the predicate is malformed.
    /// * `Err(DbError::Corruption)` - any source failed to decode; failures are not skipped.
    pub fn find_value_ids(
        &self,
        tag_key_id: TagKeyId,
        predicate: &TagValuePredicate,
    ) -> Result<SeriesIdSet, DbError> {
        read_metrics::record_tag_value_lookup();
        let compiled = predicate.compile(&self.config)?;
        let blocks = self.blocks(tag_key_id)?;
        let parts = self.map_blocks(&blocks, |block| {
            let entries = self.factory.create(block)?;
            let mut hits = RoaringBitmap::new();
            compiled.collect_into(entries.trie()?, &mut hits);
            Ok(hits)
        })?;
        let ids = union_all(parts);
        if ids.is_empty() {
            return Err(DbError::NotFound(format!(
                "No value of tag key {} matches {:?}",
                tag_key_id, predicate
            )));
        }
        Ok(ids.into())
    }

    /// Up to `limit` distinct values starting with `prefix`, in lexicographic order.
    ///
    /// Best effort: an absent key yields an empty list and sources that fail to decode are
    /// skipped (reported through the event listener).
    pub fn suggest_values(&self, tag_key_id: TagKeyId, prefix: &str, limit: usize) -> Vec<String> {
        if limit == 0 {
            return Vec::new();
        }
        let mut found: BTreeSet<Vec<u8>> = BTreeSet::new();
        for block in self.present_blocks(tag_key_id) {
            self.with_trie(tag_key_id, block, |trie| {
                found.extend(trie.iter_prefix(prefix.as_bytes()).take(limit).map(|(k, _)| k));
            });
        }
        found
            .into_iter()
            .take(limit)
            .map(|v| String::from_utf8_lossy(&v).into_owned())
            .collect()
    }

    /// Visits values starting with `prefix`, source by source, each source in lexicographic
    /// order, until `visit` returns `false`.
    ///
    /// Best effort like [`TagValueReader::suggest_values`].
    pub fn walk_values<F>(&self, tag_key_id: TagKeyId, prefix: &str, mut visit: F)
    where
        F: FnMut(&[u8], TagValueId) -> bool,
    {
        for block in self.present_blocks(tag_key_id) {
            let finished = self
                .with_trie(tag_key_id, block, |trie| {
                    trie.walk_prefix(prefix.as_bytes(), &mut visit)
                })
                .unwrap_or(true);
            if !finished {
                return;
            }
        }
    }

    fn present_blocks(&self, tag_key_id: TagKeyId) -> Vec<&[u8]> {
        self.sources
            .iter()
            .filter_map(|s| s.get(tag_key_id))
            .collect()
    }

    fn blocks(&self, tag_key_id: TagKeyId) -> Result<Vec<&[u8]>, DbError> {
        let blocks = self.present_blocks(tag_key_id);
        if blocks.is_empty() {
            return Err(DbError::NotFound(format!(
                "Tag key {} has no block in any source",
                tag_key_id
            )));
        }
        Ok(blocks)
    }

    fn map_blocks<T, F>(&self, blocks: &[&[u8]], f: F) -> Result<Vec<T>, DbError>
    where
        T: Send,
        F: Fn(&[u8]) -> Result<T, DbError> + Send + Sync,
    {
        if blocks.len() >= self.config.parallel_source_threshold {
            blocks.par_iter().map(|&b| f(b)).collect()
        } else {
            blocks.iter().map(|&b| f(b)).collect()
        }
    }

    /// Runs `f` on the block's trie; on decode failure emits a skip event and returns `None`.
    fn with_trie<R>(
        &self,
        tag_key_id: TagKeyId,
        block: &[u8],
        f: impl FnOnce(&Trie) -> R,
    ) -> Option<R> {
        let outcome = self.factory.create(block).and_then(|entries| {
            let trie = entries.trie()?;
            Ok(f(trie))
        });
        match outcome {
            Ok(r) => Some(r),
            Err(e) => {
                read_metrics::record_tag_entry_decode_skip();
                self.config
                    .event_listener
                    .on_event(DbEvent::TagEntryDecodeSkipped {
                        tag_key_id,
                        error: e.to_string(),
                    });
                None
            }
        }
    }
}

fn union_all(parts: Vec<RoaringBitmap>) -> RoaringBitmap {
    parts.into_iter().fold(RoaringBitmap::new(), |mut acc, b| {
        acc |= b;
        acc
    })
}
