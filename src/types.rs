use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DbError;

/// Series identifier. High 16 bits select a container, low 16 bits a member within it.
pub type SeriesId = u32;

/// Tag key identifier (one tag-key block per id per source).
pub type TagKeyId = u32;

/// Tag value identifier, unique per tag key across all generations.
pub type TagValueId = u32;

/// Discrete time bucket index within a block's declared range.
pub type TimeSlot = u16;

/// Time-partition boundary a block or aggregation window belongs to.
pub type FamilyTime = i64;

/// Splits a series id into its (high key, low key) halves.
#[inline]
pub fn split_series_id(id: SeriesId) -> (u16, u16) {
    ((id >> 16) as u16, (id & 0xFFFF) as u16)
}

/// Joins (high key, low key) back into a series id.
#[inline]
pub fn join_series_id(high: u16, low: u16) -> SeriesId {
    ((high as u32) << 16) | low as u32
}

/// Field identifier within a metric (at most 255 per block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(pub u8);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Field type as stored in the field catalogue. Serde: lowercase string (e.g. `"sum"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Sum,
    Min,
    Max,
    Last,
    First,
    Histogram,
}

impl FieldType {
    /// Catalogue byte for this type.
    pub fn as_u8(self) -> u8 {
        match self {
            FieldType::Sum => 1,
            FieldType::Min => 2,
            FieldType::Max => 3,
            FieldType::Last => 4,
            FieldType::First => 5,
            FieldType::Histogram => 6,
        }
    }
}

impl TryFrom<u8> for FieldType {
    type Error = DbError;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        match b {
            1 => Ok(FieldType::Sum),
            2 => Ok(FieldType::Min),
            3 => Ok(FieldType::Max),
            4 => Ok(FieldType::Last),
            5 => Ok(FieldType::First),
            6 => Ok(FieldType::Histogram),
            other => Err(DbError::corruption(format!(
                "Unknown field type {} in field catalogue",
                other
            ))),
        }
    }
}

/// One field catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldMeta {
    pub id: FieldId,
    pub field_type: FieldType,
}

impl FieldMeta {
    pub fn new(id: FieldId, field_type: FieldType) -> Self {
        Self { id, field_type }
    }
}

/// Ordered field catalogue of a metric block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMetas(Vec<FieldMeta>);

impl FieldMetas {
    pub fn new(metas: Vec<FieldMeta>) -> Self {
        Self(metas)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&FieldMeta> {
        self.0.get(position)
    }

    /// Returns the catalogue position of `id`.
    pub fn position(&self, id: FieldId) -> Option<usize> {
        self.0.iter().position(|m| m.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldMeta> {
        self.0.iter()
    }

    /// Field id → catalogue position.
    pub fn indexes(&self) -> HashMap<FieldId, usize> {
        self.0
            .iter()
            .enumerate()
            .map(|(idx, m)| (m.id, idx))
            .collect()
    }

    pub fn as_slice(&self) -> &[FieldMeta] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a FieldMetas {
    type Item = &'a FieldMeta;
    type IntoIter = std::slice::Iter<'a, FieldMeta>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_id_halves_roundtrip() {
        let id = join_series_id(3, 65_000);
        assert_eq!(id, 3 * 65_536 + 65_000);
        assert_eq!(split_series_id(id), (3, 65_000));
    }

    #[test]
    fn unknown_field_type_is_corruption() {
        assert!(FieldType::try_from(0).unwrap_err().is_corruption());
        assert!(FieldType::try_from(7).unwrap_err().is_corruption());
        assert_eq!(FieldType::try_from(4).unwrap(), FieldType::Last);
    }

    #[test]
    fn field_positions_follow_catalogue_order() {
        let metas = FieldMetas::new(vec![
            FieldMeta::new(FieldId(9), FieldType::Sum),
            FieldMeta::new(FieldId(2), FieldType::Max),
        ]);
        assert_eq!(metas.position(FieldId(2)), Some(1));
        assert_eq!(metas.position(FieldId(3)), None);
        assert_eq!(metas.indexes().get(&FieldId(9)), Some(&0));
    }
}
