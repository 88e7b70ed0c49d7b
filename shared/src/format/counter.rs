//! Counter stream decoder
//!
//! A counter stream is a header, one or more segments of per-function
//! counter records, and a footer recording how many segments precede it.
//! Records are yielded lazily; nothing beyond the current record is
//! materialized.

use super::error::{DecodeError, DecodeResult, StreamKind};
use super::reader::SliceReader;
use super::stringtab::StringTable;
use super::{
    CounterFlavor, COUNTER_FILE_FOOTER_SIZE, COUNTER_FILE_HEADER_SIZE, COUNTER_FILE_VERSION,
    COUNTER_MAGIC,
};
use crate::types::coverage::FuncPayload;
use std::collections::BTreeMap;

/// Fixed-size header at the start of a counter stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterFileHeader {
    pub version: u32,
    pub meta_hash: [u8; 16],
    pub flavor: CounterFlavor,
    pub big_endian: bool,
}

/// Per-segment header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentHeader {
    pub fcn_entries: u64,
    pub strtab_len: u32,
    pub args_len: u32,
}

/// Lazy reader over a counter stream.
#[derive(Debug)]
pub struct CounterDataReader<'a> {
    r: SliceReader<'a>,
    header: CounterFileHeader,
    num_segments: u32,
    segments_read: u32,
    segment: SegmentHeader,
    fcns_read: u64,
    args: BTreeMap<String, String>,
    finished: bool,
}

impl<'a> CounterDataReader<'a> {
    /// Validate header and footer and position the reader on the first segment.
    pub fn new(data: &'a [u8]) -> DecodeResult<Self> {
        if data.len() < COUNTER_FILE_HEADER_SIZE + COUNTER_FILE_FOOTER_SIZE {
            return Err(DecodeError::Truncated {
                offset: 0,
                needed: COUNTER_FILE_HEADER_SIZE + COUNTER_FILE_FOOTER_SIZE,
                available: data.len(),
            });
        }
        let body_end = data.len() - COUNTER_FILE_FOOTER_SIZE;
        let mut r = SliceReader::new(data).with_limit(body_end);

        let magic: [u8; 4] = r.read_array()?;
        if magic != COUNTER_MAGIC {
            return Err(DecodeError::BadMagic {
                stream: StreamKind::Counter,
                found: magic,
            });
        }
        let version = r.read_u32()?;
        if version != COUNTER_FILE_VERSION {
            return Err(DecodeError::UnsupportedVersion {
                stream: StreamKind::Counter,
                version,
            });
        }
        let meta_hash = r.read_array()?;
        let flavor_byte = r.read_u8()?;
        let flavor =
            CounterFlavor::from_u8(flavor_byte).ok_or(DecodeError::UnsupportedFlavor(flavor_byte))?;
        let big_endian = r.read_u8()? != 0;
        r.skip(6)?;

        let mut footer = SliceReader::new(data);
        footer.seek_to(body_end)?;
        let footer_magic: [u8; 4] = footer.read_array()?;
        if footer_magic != COUNTER_MAGIC {
            return Err(DecodeError::BadMagic {
                stream: StreamKind::Counter,
                found: footer_magic,
            });
        }
        footer.skip(4)?;
        let num_segments = footer.read_u32()?;

        let mut reader = Self {
            r: r.big_endian(big_endian),
            header: CounterFileHeader {
                version,
                meta_hash,
                flavor,
                big_endian,
            },
            num_segments,
            segments_read: 0,
            segment: SegmentHeader::default(),
            fcns_read: 0,
            args: BTreeMap::new(),
            finished: false,
        };
        if num_segments > 0 {
            reader.read_segment_preamble()?;
        }
        Ok(reader)
    }

    pub fn header(&self) -> &CounterFileHeader {
        &self.header
    }

    pub fn meta_hash(&self) -> [u8; 16] {
        self.header.meta_hash
    }

    pub fn num_segments(&self) -> u32 {
        self.num_segments
    }

    /// Key/value arguments recorded for the current segment.
    pub fn args(&self) -> &BTreeMap<String, String> {
        &self.args
    }

    fn read_segment_preamble(&mut self) -> DecodeResult<()> {
        let r = &mut self.r;
        self.segment = SegmentHeader {
            fcn_entries: r.read_u64()?,
            strtab_len: r.read_u32()?,
            args_len: r.read_u32()?,
        };

        let strtab_start = r.offset();
        let strings = if self.segment.strtab_len == 0 {
            StringTable::default()
        } else {
            StringTable::read(r)?
        };
        let strtab_used = r.offset() - strtab_start;
        if strtab_used != self.segment.strtab_len as usize {
            return Err(DecodeError::InvalidOffset {
                offset: strtab_start as u64,
                len: u64::from(self.segment.strtab_len),
                size: strtab_used,
            });
        }

        let args_start = r.offset();
        let mut args = BTreeMap::new();
        if self.segment.args_len > 0 {
            let nargs = r.read_uleb128()?;
            for _ in 0..nargs {
                let key = strings.get(r.read_uleb128_u32()?)?;
                let value = strings.get(r.read_uleb128_u32()?)?;
                args.insert(key.to_string(), value.to_string());
            }
        }
        if r.offset() - args_start != self.segment.args_len as usize {
            return Err(DecodeError::InvalidOffset {
                offset: args_start as u64,
                len: u64::from(self.segment.args_len),
                size: r.offset() - args_start,
            });
        }
        self.args = args;

        let misalign = r.offset() % 4;
        if misalign != 0 {
            r.skip(4 - misalign)?;
        }

        self.segments_read += 1;
        self.fcns_read = 0;
        Ok(())
    }

    /// Decode the next record into `payload`, reusing its counter buffer.
    /// Returns `false` once every segment named by the footer is exhausted.
    pub fn next_func(&mut self, payload: &mut FuncPayload) -> DecodeResult<bool> {
        if self.finished {
            return Ok(false);
        }
        while self.fcns_read >= self.segment.fcn_entries {
            if self.segments_read >= self.num_segments {
                self.finished = true;
                if self.r.remaining() != 0 {
                    return Err(DecodeError::TrailingData(self.r.remaining()));
                }
                return Ok(false);
            }
            self.read_segment_preamble()?;
        }

        let (num_ctrs, pkg_idx, func_idx) = match self.header.flavor {
            CounterFlavor::Raw => (self.r.read_u32()?, self.r.read_u32()?, self.r.read_u32()?),
            CounterFlavor::Uleb128 => (
                self.r.read_uleb128_u32()?,
                self.r.read_uleb128_u32()?,
                self.r.read_uleb128_u32()?,
            ),
        };

        let min_width = match self.header.flavor {
            CounterFlavor::Raw => 4,
            CounterFlavor::Uleb128 => 1,
        };
        if u64::from(num_ctrs) * min_width > self.r.remaining() as u64 {
            return Err(DecodeError::Truncated {
                offset: self.r.offset(),
                needed: num_ctrs as usize * min_width as usize,
                available: self.r.remaining(),
            });
        }

        payload.pkg_idx = pkg_idx;
        payload.func_idx = func_idx;
        payload.counters.clear();
        payload.counters.reserve(num_ctrs as usize);
        for _ in 0..num_ctrs {
            let value = match self.header.flavor {
                CounterFlavor::Raw => self.r.read_u32()?,
                CounterFlavor::Uleb128 => self.r.read_uleb128_u32()?,
            };
            payload.counters.push(value);
        }
        self.fcns_read += 1;
        Ok(true)
    }
}

impl Iterator for CounterDataReader<'_> {
    type Item = DecodeResult<FuncPayload>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut payload = FuncPayload::default();
        match self.next_func(&mut payload) {
            Ok(true) => Some(Ok(payload)),
            Ok(false) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
