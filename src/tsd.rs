//! Time-series data (TSD) stream: one field's values over a range of time slots.
//!
//! Layout: `start:u16le, end:u16le, presence bitmap, values`. The presence bitmap holds
//! `ceil((end - start + 1) / 8)` bytes, bit `i` (LSB-first) marking slot `start + i`. Values of
//! present slots follow in slot order, Gorilla XOR encoded: the first as a raw `u64le`, the rest
//! as a control-bit stream.

use crate::encoding::{le_u16_at, write_u16, BitReader, BitWriter};
use crate::error::DbError;
use crate::types::TimeSlot;

const TSD_HEADER_LEN: usize = 4;

#[inline]
fn presence_len(start: TimeSlot, end: TimeSlot) -> usize {
    (end as usize - start as usize + 1).div_ceil(8)
}

/// Builds one TSD stream. Slots must be appended in strictly increasing order.
#[derive(Debug, Clone)]
pub struct TsdEncoder {
    start: TimeSlot,
    points: Vec<(TimeSlot, u64)>,
}

impl TsdEncoder {
    pub fn new(start: TimeSlot) -> Self {
        Self {
            start,
            points: Vec::new(),
        }
    }

    pub fn append(&mut self, slot: TimeSlot, value: f64) -> Result<(), DbError> {
        self.append_bits(slot, value.to_bits())
    }

    pub fn append_bits(&mut self, slot: TimeSlot, bits: u64) -> Result<(), DbError> {
        if slot < self.start {
            return Err(DbError::Internal(format!(
                "Slot {} precedes stream start {}",
                slot, self.start
            )));
        }
        if let Some(&(last, _)) = self.points.last() {
            if slot <= last {
                return Err(DbError::Internal(format!(
                    "Slots must be strictly increasing (got {} after {})",
                    slot, last
                )));
            }
        }
        self.points.push((slot, bits));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let end = self.points.last().map(|&(s, _)| s).unwrap_or(self.start);
        write_u16(out, self.start);
        write_u16(out, end);

        let mut presence = vec![0u8; presence_len(self.start, end)];
        for &(slot, _) in &self.points {
            let i = (slot - self.start) as usize;
            presence[i / 8] |= 1 << (i % 8);
        }
        out.extend_from_slice(&presence);

        let Some((&(_, first), rest)) = self.points.split_first() else {
            return;
        };
        out.extend_from_slice(&first.to_le_bytes());
        let mut bw = BitWriter::new(out);

        let mut prev = first;
        let mut prev_leading: u8 = 0;
        let mut prev_trailing: u8 = 0;
        let mut prev_sigbits: u8 = 0;

        for &(_, cur) in rest {
            let x = prev ^ cur;
            if x == 0 {
                bw.push_bit(false);
            } else {
                bw.push_bit(true);
                let leading = x.leading_zeros() as u8;
                let trailing = x.trailing_zeros() as u8;
                let sigbits = 64 - leading - trailing;

                if prev_sigbits != 0 && leading >= prev_leading && trailing >= prev_trailing {
                    bw.push_bit(false);
                    bw.push_bits(x >> prev_trailing, prev_sigbits);
                } else {
                    bw.push_bit(true);
                    bw.push_bits(leading as u64, 6);
                    bw.push_bits((sigbits - 1) as u64, 6);
                    bw.push_bits(x >> trailing, sigbits);
                    prev_leading = leading;
                    prev_trailing = trailing;
                    prev_sigbits = sigbits;
                }
            }
            prev = cur;
        }
        bw.finish();
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

/// Streaming slot-by-slot decoder, reusable across streams via
/// [`TsdDecoder::reset_with_time_range`].
#[derive(Debug, Clone)]
pub struct TsdDecoder<'a> {
    stream_start: TimeSlot,
    stream_end: TimeSlot,
    presence: &'a [u8],
    values: &'a [u8],
    bits: BitReader<'a>,

    range_end: TimeSlot,
    next_slot: u32,
    slot: TimeSlot,
    current: Option<u64>,

    decoded: usize,
    prev: u64,
    prev_trailing: u8,
    prev_sigbits: u8,
}

impl<'a> Default for TsdDecoder<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> TsdDecoder<'a> {
    /// An exhausted decoder; call `reset_with_time_range` before use.
    pub fn new() -> Self {
        Self {
            stream_start: 0,
            stream_end: 0,
            presence: &[],
            values: &[],
            bits: BitReader::new(&[]),
            range_end: 0,
            next_slot: 1,
            slot: 0,
            current: None,
            decoded: 0,
            prev: 0,
            prev_trailing: 0,
            prev_sigbits: 0,
        }
    }

    /// Points the decoder at the stream in `buf`, reporting slots `start..=end`.
    ///
    /// Present slots of the stream that fall before `start` are decoded and discarded so the
    /// XOR chain stays aligned.
    pub fn reset_with_time_range(
        &mut self,
        buf: &'a [u8],
        start: TimeSlot,
        end: TimeSlot,
    ) -> Result<(), DbError> {
        let stream_start =
            le_u16_at(buf, 0).ok_or_else(|| DbError::corruption("TSD header truncated"))?;
        let stream_end =
            le_u16_at(buf, 2).ok_or_else(|| DbError::corruption("TSD header truncated"))?;
        if stream_start > stream_end {
            return Err(DbError::corruption(format!(
                "TSD slot range inverted ({} > {})",
                stream_start, stream_end
            )));
        }
        let plen = presence_len(stream_start, stream_end);
        let presence = buf
            .get(TSD_HEADER_LEN..TSD_HEADER_LEN + plen)
            .ok_or_else(|| DbError::corruption("TSD presence bitmap truncated"))?;

        *self = Self::new();
        self.stream_start = stream_start;
        self.stream_end = stream_end;
        self.presence = presence;
        self.values = &buf[TSD_HEADER_LEN + plen..];
        self.range_end = end;
        self.next_slot = start as u32;
        if start > end {
            return Ok(());
        }

        let skip_to = (start as u32).min(stream_end as u32 + 1);
        for s in stream_start as u32..skip_to {
            if self.is_present(s as TimeSlot) {
                self.decode_next()?;
            }
        }
        Ok(())
    }

    /// Moves to the next slot in range. Returns `false` once the range is exhausted.
    pub fn advance(&mut self) -> Result<bool, DbError> {
        if self.next_slot > self.range_end as u32 {
            self.current = None;
            return Ok(false);
        }
        let slot = self.next_slot as TimeSlot;
        self.next_slot += 1;
        self.slot = slot;
        self.current = if self.is_present(slot) {
            Some(self.decode_next()?)
        } else {
            None
        };
        Ok(true)
    }

    #[inline]
    pub fn slot(&self) -> TimeSlot {
        self.slot
    }

    #[inline]
    pub fn has_value(&self) -> bool {
        self.current.is_some()
    }

    /// Raw 64-bit pattern of the current slot's value (0 when absent).
    #[inline]
    pub fn value(&self) -> u64 {
        self.current.unwrap_or(0)
    }

    /// Collects every present `(slot, bits)` of a stream over its own range.
    pub fn collect_all(buf: &'a [u8]) -> Result<Vec<(TimeSlot, u64)>, DbError> {
        let start =
            le_u16_at(buf, 0).ok_or_else(|| DbError::corruption("TSD header truncated"))?;
        let end = le_u16_at(buf, 2).ok_or_else(|| DbError::corruption("TSD header truncated"))?;
        let mut dec = TsdDecoder::new();
        dec.reset_with_time_range(buf, start, end)?;
        let mut out = Vec::new();
        while dec.advance()? {
            if dec.has_value() {
                out.push((dec.slot(), dec.value()));
            }
        }
        Ok(out)
    }

    #[inline]
    fn is_present(&self, slot: TimeSlot) -> bool {
        if slot < self.stream_start || slot > self.stream_end {
            return false;
        }
        let i = (slot - self.stream_start) as usize;
        self.presence
            .get(i / 8)
            .map_or(false, |b| (b & (1 << (i % 8))) != 0)
    }

    fn decode_next(&mut self) -> Result<u64, DbError> {
        if self.decoded == 0 {
            let first: [u8; 8] = self
                .values
                .get(..8)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| DbError::corruption("TSD first value truncated"))?;
            self.prev = u64::from_le_bytes(first);
            self.bits = BitReader::new(&self.values[8..]);
            self.decoded = 1;
            return Ok(self.prev);
        }

        self.decoded += 1;
        let br = &mut self.bits;
        if !br.read_bit()? {
            return Ok(self.prev);
        }
        let (sigbits, trailing) = if !br.read_bit()? {
            if self.prev_sigbits == 0 {
                return Err(DbError::corruption("Gorilla reuse window before initialization"));
            }
            (self.prev_sigbits, self.prev_trailing)
        } else {
            let leading = br.read_bits(6)? as u8;
            let sigbits = (br.read_bits(6)? as u8).saturating_add(1);
            if leading as u32 + sigbits as u32 > 64 {
                return Err(DbError::corruption("Invalid Gorilla bit widths"));
            }
            let trailing = 64 - leading - sigbits;
            self.prev_trailing = trailing;
            self.prev_sigbits = sigbits;
            (sigbits, trailing)
        };

        let significant = br.read_bits(sigbits)?;
        self.prev ^= significant << trailing;
        Ok(self.prev)
    }
}
