//! Tag Value Entry Set: one decoded tag-key block.
//!
//! Block layout: `trieLen:u32le, trie bytes, value-id bitmap`. The bitmap header is checked
//! eagerly; the trie is decoded on first access and the outcome (success or error) is memoized.

use std::fmt;
use std::sync::OnceLock;

use crate::encoding::{le_u32_at, read_bytes};
use crate::error::DbError;
use crate::series::SeriesIdSet;
use crate::trie::Trie;

/// Decoded view of a tag-key block.
pub trait TagValueEntries: Send + Sync {
    /// The value trie; decode failures surface here, not at construction.
    fn trie(&self) -> Result<&Trie, DbError>;

    /// Every value id stored under the key.
    fn all_value_ids(&self) -> &SeriesIdSet;
}

/// Default entry set over a borrowed block.
pub struct TagValueEntrySet<'a> {
    trie_bytes: &'a [u8],
    value_ids: SeriesIdSet,
    trie: OnceLock<Result<Trie, String>>,
}

impl<'a> TagValueEntrySet<'a> {
    pub fn decode(block: &'a [u8]) -> Result<Self, DbError> {
        let trie_len = le_u32_at(block, 0)
            .ok_or_else(|| DbError::corruption("Tag-key block shorter than its header"))?
            as usize;
        let mut pos = 4usize;
        let trie_bytes = read_bytes(block, &mut pos, trie_len)
            .map_err(|_| DbError::corruption("Tag-key block trie length exceeds block"))?;
        let value_ids = SeriesIdSet::deserialize(&block[pos..])?;
        Ok(Self {
            trie_bytes,
            value_ids,
            trie: OnceLock::new(),
        })
    }
}

impl<'a> TagValueEntries for TagValueEntrySet<'a> {
    fn trie(&self) -> Result<&Trie, DbError> {
        self.trie
            .get_or_init(|| Trie::decode(self.trie_bytes).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| DbError::corruption(e.clone()))
    }

    fn all_value_ids(&self) -> &SeriesIdSet {
        &self.value_ids
    }
}

impl<'a> fmt::Debug for TagValueEntrySet<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagValueEntrySet")
            .field("trie_len", &self.trie_bytes.len())
            .field("values", &self.value_ids.len())
            .field("trie_decoded", &self.trie.get().is_some())
            .finish()
    }
}

/// Builds entry sets from raw blocks. Passed to the tag value reader so tests can inject
/// entry sets that fail in controlled ways.
pub trait EntrySetFactory: fmt::Debug + Send + Sync {
    fn create<'a>(&self, block: &'a [u8]) -> Result<Box<dyn TagValueEntries + 'a>, DbError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEntrySetFactory;

impl EntrySetFactory for DefaultEntrySetFactory {
    fn create<'a>(&self, block: &'a [u8]) -> Result<Box<dyn TagValueEntries + 'a>, DbError> {
        Ok(Box::new(TagValueEntrySet::decode(block)?))
    }
}
