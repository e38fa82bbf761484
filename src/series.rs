//! Sparse series-id set: a roaring bitmap split into containers by the high 16 bits of each id.
//!
//! Containers give the rank-within-container lookups the block format addresses offsets by.

use crate::error::DbError;
use crate::types::{join_series_id, split_series_id, SeriesId};

use roaring::RoaringBitmap;

/// Low 16-bit members sharing one high key, kept sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LowContainer {
    lows: Vec<u16>,
}

impl LowContainer {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn contains(&self, low: u16) -> bool {
        self.lows.binary_search(&low).is_ok()
    }

    /// Number of members `<= low`. For a member this is its 1-based position.
    #[inline]
    pub fn rank(&self, low: u16) -> usize {
        self.lows.partition_point(|&v| v <= low)
    }

    /// Intersection of two containers.
    pub fn and(&self, other: &LowContainer) -> LowContainer {
        let (a, b) = (&self.lows, &other.lows);
        let mut out = Vec::with_capacity(a.len().min(b.len()));
        let mut i = 0usize;
        let mut j = 0usize;
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    out.push(a[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        LowContainer { lows: out }
    }

    pub fn len(&self) -> usize {
        self.lows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.lows.iter().copied()
    }
}

impl FromIterator<u16> for LowContainer {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        let mut lows: Vec<u16> = iter.into_iter().collect();
        lows.sort_unstable();
        lows.dedup();
        LowContainer { lows }
    }
}

/// Immutable set of series ids (or tag value ids) with per-high-key containers.
#[derive(Debug, Clone, Default)]
pub struct SeriesIdSet {
    bitmap: RoaringBitmap,
    high_keys: Vec<u16>,
    containers: Vec<LowContainer>,
}

impl SeriesIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bitmap(bitmap: RoaringBitmap) -> Self {
        let mut high_keys: Vec<u16> = Vec::new();
        let mut containers: Vec<LowContainer> = Vec::new();
        for id in bitmap.iter() {
            let (high, low) = split_series_id(id);
            if high_keys.last() != Some(&high) {
                high_keys.push(high);
                containers.push(LowContainer::new());
            }
            if let Some(c) = containers.last_mut() {
                // bitmap iteration is ascending, so each container stays sorted
                c.lows.push(low);
            }
        }
        Self {
            bitmap,
            high_keys,
            containers,
        }
    }

    /// Decodes the roaring portable serialization at the start of `bytes`.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, DbError> {
        let bitmap = RoaringBitmap::deserialize_from(bytes).map_err(|e| {
            DbError::corruption(format!("Series id set does not deserialize: {}", e))
        })?;
        Ok(Self::from_bitmap(bitmap))
    }

    pub fn serialize_into(&self, out: &mut Vec<u8>) -> Result<(), DbError> {
        self.bitmap
            .serialize_into(out)
            .map_err(|e| DbError::Serialization(e.to_string()))
    }

    #[inline]
    pub fn contains(&self, id: SeriesId) -> bool {
        self.bitmap.contains(id)
    }

    pub fn len(&self) -> u64 {
        self.bitmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = SeriesId> + '_ {
        self.bitmap.iter()
    }

    pub fn bitmap(&self) -> &RoaringBitmap {
        &self.bitmap
    }

    pub fn into_bitmap(self) -> RoaringBitmap {
        self.bitmap
    }

    /// High keys present, ascending.
    pub fn high_keys(&self) -> &[u16] {
        &self.high_keys
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Position of the container for `high`, if any series share that high key.
    pub fn container_index(&self, high: u16) -> Option<usize> {
        self.high_keys.binary_search(&high).ok()
    }

    pub fn container_at(&self, index: usize) -> Option<&LowContainer> {
        self.containers.get(index)
    }

    pub fn container(&self, high: u16) -> Option<&LowContainer> {
        self.container_index(high)
            .and_then(|idx| self.containers.get(idx))
    }

    pub fn union(&self, other: &SeriesIdSet) -> SeriesIdSet {
        SeriesIdSet::from_bitmap(&self.bitmap | &other.bitmap)
    }

    pub fn intersection(&self, other: &SeriesIdSet) -> SeriesIdSet {
        SeriesIdSet::from_bitmap(&self.bitmap & &other.bitmap)
    }

    /// Rebuilds a full set from (high key, container) pairs.
    pub fn from_containers<'a, I>(parts: I) -> SeriesIdSet
    where
        I: IntoIterator<Item = (u16, &'a LowContainer)>,
    {
        let mut bitmap = RoaringBitmap::new();
        for (high, container) in parts {
            for low in container.iter() {
                bitmap.insert(join_series_id(high, low));
            }
        }
        SeriesIdSet::from_bitmap(bitmap)
    }
}

impl PartialEq for SeriesIdSet {
    fn eq(&self, other: &Self) -> bool {
        self.bitmap == other.bitmap
    }
}

impl Eq for SeriesIdSet {}

impl FromIterator<SeriesId> for SeriesIdSet {
    fn from_iter<I: IntoIterator<Item = SeriesId>>(iter: I) -> Self {
        SeriesIdSet::from_bitmap(iter.into_iter().collect())
    }
}

impl From<RoaringBitmap> for SeriesIdSet {
    fn from(bitmap: RoaringBitmap) -> Self {
        SeriesIdSet::from_bitmap(bitmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containers_split_on_high_key() {
        let set: SeriesIdSet = [1u32, 5, 65_536 + 2, 65_536 + 9, 3 * 65_536]
            .into_iter()
            .collect();
        assert_eq!(set.high_keys(), &[0, 1, 3]);
        assert_eq!(set.container_index(1), Some(1));
        assert_eq!(set.container_index(2), None);
        let c = set.container(1).unwrap();
        assert_eq!(c.iter().collect::<Vec<_>>(), vec![2, 9]);
    }

    #[test]
    fn rank_is_one_based_for_members() {
        let c: LowContainer = [10u16, 20, 30].into_iter().collect();
        assert_eq!(c.rank(10), 1);
        assert_eq!(c.rank(30), 3);
        assert_eq!(c.rank(25), 2);
        assert_eq!(c.rank(5), 0);
    }

    #[test]
    fn container_intersection() {
        let a: LowContainer = [1u16, 3, 5, 7].into_iter().collect();
        let b: LowContainer = [3u16, 4, 7, 9].into_iter().collect();
        assert_eq!(a.and(&b).iter().collect::<Vec<_>>(), vec![3, 7]);
        assert!(a.and(&LowContainer::new()).is_empty());
    }

    #[test]
    fn serialization_is_portable_roaring() {
        let set: SeriesIdSet = (0..1000u32).map(|i| i * 131).collect();
        let mut buf = Vec::new();
        set.serialize_into(&mut buf).unwrap();
        buf.extend_from_slice(b"trailing");
        let back = SeriesIdSet::deserialize(&buf).unwrap();
        assert_eq!(back, set);
        assert_eq!(back.high_keys(), set.high_keys());
    }

    #[test]
    fn garbage_does_not_deserialize() {
        let err = SeriesIdSet::deserialize(&[1, 2, 3, 4, 5]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn rebuild_from_containers() {
        let set: SeriesIdSet = [7u32, 65_536 + 1].into_iter().collect();
        let parts = set
            .high_keys()
            .iter()
            .copied()
            .zip((0..set.container_count()).filter_map(|i| set.container_at(i)));
        assert_eq!(SeriesIdSet::from_containers(parts), set);
    }
}
