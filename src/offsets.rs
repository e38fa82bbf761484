//! Fixed-offset index: a small header followed by `count` little-endian offsets of one
//! declared width, addressable in O(1) by dense rank.
//!
//! Layout: `width:u8 (1..=4), count:u32le, count × width bytes`.

use crate::encoding::{le_u32_at, write_u32};
use crate::error::DbError;

/// Header length in bytes (width + count).
pub const FIXED_OFFSET_HEADER_LEN: usize = 1 + 4;

/// Borrowed view over an encoded fixed-offset index.
#[derive(Debug, Clone, Copy)]
pub struct FixedOffsetIndex<'a> {
    width: u8,
    count: usize,
    values: &'a [u8],
}

impl<'a> FixedOffsetIndex<'a> {
    /// Decodes the index at the start of `buf`. Trailing bytes after the offsets are ignored.
    pub fn decode(buf: &'a [u8]) -> Result<Self, DbError> {
        if buf.len() < FIXED_OFFSET_HEADER_LEN {
            return Err(DbError::corruption("Fixed-offset index header truncated"));
        }
        let width = buf[0];
        if !(1..=4).contains(&width) {
            return Err(DbError::corruption(format!(
                "Invalid fixed-offset width {}",
                width
            )));
        }
        let count = le_u32_at(buf, 1)
            .ok_or_else(|| DbError::corruption("Fixed-offset index header truncated"))?
            as usize;
        let values_len = count
            .checked_mul(width as usize)
            .ok_or_else(|| DbError::corruption("Fixed-offset index too large"))?;
        let values = buf
            .get(FIXED_OFFSET_HEADER_LEN..FIXED_OFFSET_HEADER_LEN + values_len)
            .ok_or_else(|| {
                DbError::corruption(format!(
                    "Fixed-offset index declares {} entries beyond buffer end",
                    count
                ))
            })?;
        Ok(Self {
            width,
            count,
            values,
        })
    }

    /// Offset stored at `rank`, or `None` past the last entry.
    #[inline]
    pub fn get(&self, rank: usize) -> Option<usize> {
        if rank >= self.count {
            return None;
        }
        let w = self.width as usize;
        let start = rank * w;
        let mut v: usize = 0;
        for (i, b) in self.values[start..start + w].iter().enumerate() {
            v |= (*b as usize) << (8 * i);
        }
        Some(v)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn value_width(&self) -> usize {
        self.width as usize
    }

    pub fn header_len(&self) -> usize {
        FIXED_OFFSET_HEADER_LEN
    }

    /// Bytes occupied by header plus offsets; data following the index starts here.
    pub fn encoded_len(&self) -> usize {
        FIXED_OFFSET_HEADER_LEN + self.values.len()
    }
}

/// Accumulates offsets and writes them with the narrowest width that fits the largest one.
#[derive(Debug, Default, Clone)]
pub struct FixedOffsetEncoder {
    offsets: Vec<u32>,
}

impl FixedOffsetEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, offset: u32) {
        self.offsets.push(offset);
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), DbError> {
        let count: u32 = self
            .offsets
            .len()
            .try_into()
            .map_err(|_| DbError::Internal("Too many offsets".to_string()))?;
        let max = self.offsets.iter().copied().max().unwrap_or(0);
        let width = match max {
            0..=0xFF => 1u8,
            0x100..=0xFFFF => 2,
            0x1_0000..=0xFF_FFFF => 3,
            _ => 4,
        };
        out.push(width);
        write_u32(out, count);
        for &off in &self.offsets {
            out.extend_from_slice(&off.to_le_bytes()[..width as usize]);
        }
        Ok(())
    }
}
