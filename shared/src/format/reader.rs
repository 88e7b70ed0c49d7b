//! Bounds-checked cursor over a byte slice

use super::error::{DecodeError, DecodeResult};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Cursor over an in-memory stream. Every read is bounds-checked against
/// `limit`, which may be lower than the slice length (e.g. to keep reads
/// out of a trailing footer).
#[derive(Debug, Clone)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
    limit: usize,
    big_endian: bool,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            limit: data.len(),
            big_endian: false,
        }
    }

    /// Switch fixed-width integer reads to big-endian.
    pub fn big_endian(mut self, big_endian: bool) -> Self {
        self.big_endian = big_endian;
        self
    }

    /// Restrict reads to `data[..limit]`.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.min(self.data.len());
        self
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.pos)
    }

    pub fn seek_to(&mut self, pos: usize) -> DecodeResult<()> {
        if pos > self.limit {
            return Err(self.truncated(pos.saturating_sub(self.pos)));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> DecodeResult<()> {
        self.read_bytes(n).map(|_| ())
    }

    fn truncated(&self, needed: usize) -> DecodeError {
        DecodeError::Truncated {
            offset: self.pos,
            needed,
            available: self.remaining(),
        }
    }

    pub fn read_bytes(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(self.truncated(n));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        let buf = self.read_bytes(4)?;
        Ok(if self.big_endian {
            BigEndian::read_u32(buf)
        } else {
            LittleEndian::read_u32(buf)
        })
    }

    pub fn read_u64(&mut self) -> DecodeResult<u64> {
        let buf = self.read_bytes(8)?;
        Ok(if self.big_endian {
            BigEndian::read_u64(buf)
        } else {
            LittleEndian::read_u64(buf)
        })
    }

    pub fn read_uleb128(&mut self) -> DecodeResult<u64> {
        let start = self.pos;
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift == 63 && byte > 1 {
                return Err(DecodeError::Leb128Overflow(start));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(DecodeError::Leb128Overflow(start));
            }
        }
    }

    /// ULEB128 value that must fit in a `u32`.
    pub fn read_uleb128_u32(&mut self) -> DecodeResult<u32> {
        let start = self.pos;
        let value = self.read_uleb128()?;
        u32::try_from(value).map_err(|_| DecodeError::Leb128Overflow(start))
    }
}

/// Append `value` to `out` as ULEB128.
pub fn append_uleb128(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_reads() {
        let data = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02];
        let mut r = SliceReader::new(&data);
        assert_eq!(r.read_u32().unwrap(), 1);
        assert_eq!(r.remaining(), 4);

        let mut be = SliceReader::new(&data).big_endian(true);
        be.skip(4).unwrap();
        assert_eq!(be.read_u32().unwrap(), 2);
    }

    #[test]
    fn test_truncated_read() {
        let data = [0u8; 3];
        let mut r = SliceReader::new(&data);
        assert_eq!(
            r.read_u32(),
            Err(DecodeError::Truncated {
                offset: 0,
                needed: 4,
                available: 3
            })
        );
    }

    #[test]
    fn test_limit_hides_tail() {
        let data = [1u8, 2, 3, 4, 5, 6];
        let mut r = SliceReader::new(&data).with_limit(4);
        assert_eq!(r.read_bytes(4).unwrap(), &[1, 2, 3, 4]);
        assert!(r.read_u8().is_err());
        assert!(r.seek_to(5).is_err());
    }

    #[test]
    fn test_uleb128_known_values() {
        // 624485 is the classic example from the DWARF standard
        let mut r = SliceReader::new(&[0xe5, 0x8e, 0x26, 0x7f]);
        assert_eq!(r.read_uleb128().unwrap(), 624_485);
        assert_eq!(r.read_uleb128().unwrap(), 127);

        let mut buf = Vec::new();
        append_uleb128(&mut buf, 624_485);
        assert_eq!(buf, vec![0xe5, 0x8e, 0x26]);
    }

    #[test]
    fn test_uleb128_overflow_and_truncation() {
        let too_long = [0xffu8; 11];
        assert_eq!(
            SliceReader::new(&too_long).read_uleb128(),
            Err(DecodeError::Leb128Overflow(0))
        );

        let unterminated = [0x80u8, 0x80];
        assert!(matches!(
            SliceReader::new(&unterminated).read_uleb128(),
            Err(DecodeError::Truncated { .. })
        ));

        let mut big = Vec::new();
        append_uleb128(&mut big, u64::from(u32::MAX) + 1);
        assert!(SliceReader::new(&big).read_uleb128_u32().is_err());
    }
}
