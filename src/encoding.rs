//! Binary helpers shared by the block codecs: little-endian integers, varints, crc32, bit I/O.

use crate::error::DbError;

use crc32fast::Hasher as Crc32;

pub fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}
pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
pub fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Reads exactly `n` bytes, refusing lengths larger than what remains in `buf`.
pub fn read_bytes<'a>(buf: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], DbError> {
    let end = pos
        .checked_add(n)
        .filter(|&e| e <= buf.len())
        .ok_or_else(|| DbError::corruption("Length prefix exceeds block"))?;
    let out = &buf[*pos..end];
    *pos = end;
    Ok(out)
}

/// Little-endian u16 at a fixed position.
#[inline]
pub fn le_u16_at(buf: &[u8], pos: usize) -> Option<u16> {
    let b = buf.get(pos..pos.checked_add(2)?)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

/// Little-endian u32 at a fixed position.
#[inline]
pub fn le_u32_at(buf: &[u8], pos: usize) -> Option<u32> {
    let b = buf.get(pos..pos.checked_add(4)?)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline]
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut h = Crc32::new();
    h.update(bytes);
    h.finalize()
}

pub fn write_var_u64(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

pub fn write_var_u32(buf: &mut Vec<u8>, v: u32) {
    write_var_u64(buf, v as u64);
}

/// Reads a LEB128 varint from `buf` at `pos`, advancing `pos`.
pub fn read_var_u64(buf: &[u8], pos: &mut usize) -> Result<u64, DbError> {
    let mut out: u64 = 0;
    let mut shift: u32 = 0;
    for _ in 0..10 {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| DbError::corruption("Truncated varint"))?;
        *pos += 1;
        out |= ((byte & 0x7F) as u64) << shift;
        if (byte & 0x80) == 0 {
            return Ok(out);
        }
        shift = shift.saturating_add(7);
    }
    Err(DbError::corruption("Varint too long"))
}

pub fn read_var_u32(buf: &[u8], pos: &mut usize) -> Result<u32, DbError> {
    let v = read_var_u64(buf, pos)?;
    u32::try_from(v).map_err(|_| DbError::corruption("Varint does not fit in u32"))
}

/// MSB-first bit writer appending to a byte vector.
pub(crate) struct BitWriter<'a> {
    out: &'a mut Vec<u8>,
    cur: u8,
    used: u8,
}

impl<'a> BitWriter<'a> {
    pub(crate) fn new(out: &'a mut Vec<u8>) -> Self {
        Self {
            out,
            cur: 0,
            used: 0,
        }
    }

    pub(crate) fn push_bit(&mut self, bit: bool) {
        let b = if bit { 1u8 } else { 0u8 };
        self.cur |= b << (7 - self.used);
        self.used += 1;
        if self.used == 8 {
            self.out.push(self.cur);
            self.cur = 0;
            self.used = 0;
        }
    }

    pub(crate) fn push_bits(&mut self, mut v: u64, count: u8) {
        if count == 0 {
            return;
        }
        if count < 64 {
            v &= (1u64 << count) - 1;
        }
        for i in (0..count).rev() {
            self.push_bit(((v >> i) & 1) == 1);
        }
    }

    pub(crate) fn finish(self) {
        if self.used > 0 {
            self.out.push(self.cur);
        }
    }
}

/// MSB-first bit reader over a borrowed slice.
#[derive(Debug, Clone)]
pub(crate) struct BitReader<'a> {
    buf: &'a [u8],
    pos: usize,
    cur: u8,
    left: u8,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            cur: 0,
            left: 0,
        }
    }

    pub(crate) fn read_bit(&mut self) -> Result<bool, DbError> {
        if self.left == 0 {
            self.cur = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| DbError::corruption("Truncated bit stream"))?;
            self.pos += 1;
            self.left = 8;
        }
        let bit = (self.cur & (1u8 << (self.left - 1))) != 0;
        self.left -= 1;
        Ok(bit)
    }

    pub(crate) fn read_bits(&mut self, count: u8) -> Result<u64, DbError> {
        let mut out = 0u64;
        for _ in 0..count {
            out <<= 1;
            out |= if self.read_bit()? { 1 } else { 0 };
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        for v in [0u64, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_var_u64(&mut buf, v);
            let mut pos = 0;
            assert_eq!(read_var_u64(&buf, &mut pos).unwrap(), v);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn truncated_varint_is_corruption() {
        let mut pos = 0;
        let err = read_var_u64(&[0x80, 0x80], &mut pos).unwrap_err();
        assert!(err.is_corruption(), "got {err:?}");
    }

    #[test]
    fn oversized_u32_varint_is_rejected() {
        let mut buf = Vec::new();
        write_var_u64(&mut buf, u32::MAX as u64 + 1);
        let mut pos = 0;
        assert!(read_var_u32(&buf, &mut pos).is_err());
    }

    #[test]
    fn fixed_position_reads_respect_bounds() {
        let buf = [0x34, 0x12, 0x78, 0x56];
        assert_eq!(le_u16_at(&buf, 0), Some(0x1234));
        assert_eq!(le_u32_at(&buf, 0), Some(0x5678_1234));
        assert_eq!(le_u16_at(&buf, 3), None);
        assert_eq!(le_u32_at(&buf, usize::MAX), None);
    }

    #[test]
    fn bits_survive_writer_and_reader() {
        let mut out = Vec::new();
        let mut w = BitWriter::new(&mut out);
        w.push_bit(true);
        w.push_bits(0b1011, 4);
        w.push_bits(u64::MAX, 64);
        w.finish();

        let mut r = BitReader::new(&out);
        assert!(r.read_bit().unwrap());
        assert_eq!(r.read_bits(4).unwrap(), 0b1011);
        assert_eq!(r.read_bits(64).unwrap(), u64::MAX);
    }
}
