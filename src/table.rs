//! Byte-buffer tables keyed by small integer ids (tag key ids, metric ids).

use std::collections::BTreeMap;
use std::fmt;

/// Read access to one immutable table file. Implementations must be shareable across the
/// rayon pool used by tag lookups.
pub trait TableReader: fmt::Debug + Send + Sync {
    /// Block stored under `id`, if any.
    fn get(&self, id: u32) -> Option<&[u8]>;
}

/// In-memory table, the reader used by tests and by callers that already hold blocks in memory.
#[derive(Debug, Clone, Default)]
pub struct MemTable {
    blocks: BTreeMap<u32, Vec<u8>>,
}

impl MemTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u32, block: Vec<u8>) -> Option<Vec<u8>> {
        self.blocks.insert(id, block)
    }

    pub fn with_block(mut self, id: u32, block: Vec<u8>) -> Self {
        self.blocks.insert(id, block);
        self
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl TableReader for MemTable {
    fn get(&self, id: u32) -> Option<&[u8]> {
        self.blocks.get(&id).map(Vec::as_slice)
    }
}

impl FromIterator<(u32, Vec<u8>)> for MemTable {
    fn from_iter<I: IntoIterator<Item = (u32, Vec<u8>)>>(iter: I) -> Self {
        Self {
            blocks: iter.into_iter().collect(),
        }
    }
}
