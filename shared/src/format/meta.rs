//! Meta-data stream decoder
//!
//! The meta-data stream describes the static shape of every instrumented
//! package: its functions, their source files and their coverable units.
//! It is fixed at instrumentation time, so a decoded [`MetaFileReader`] can
//! be kept for the lifetime of the process.

use super::error::{DecodeError, DecodeResult, StreamKind};
use super::reader::SliceReader;
use super::stringtab::StringTable;
use super::{META_FILE_HEADER_SIZE, META_FILE_VERSION, META_MAGIC, PKG_HEADER_SIZE};
use crate::types::coverage::{CounterGranularity, CounterMode, CoverableUnit, FuncDesc};
use bytes::Bytes;

/// Fixed-size header at the start of a meta-data stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaFileHeader {
    pub version: u32,
    pub total_length: u64,
    pub entries: u64,
    pub meta_hash: [u8; 16],
    pub strtab_offset: u32,
    pub strtab_length: u32,
    pub counter_mode: CounterMode,
    pub granularity: CounterGranularity,
}

impl MetaFileHeader {
    fn read(r: &mut SliceReader<'_>) -> DecodeResult<Self> {
        let magic: [u8; 4] = r.read_array()?;
        if magic != META_MAGIC {
            return Err(DecodeError::BadMagic {
                stream: StreamKind::Meta,
                found: magic,
            });
        }
        let version = r.read_u32()?;
        if version != META_FILE_VERSION {
            return Err(DecodeError::UnsupportedVersion {
                stream: StreamKind::Meta,
                version,
            });
        }
        let total_length = r.read_u64()?;
        let entries = r.read_u64()?;
        let meta_hash = r.read_array()?;
        let strtab_offset = r.read_u32()?;
        let strtab_length = r.read_u32()?;
        let mode = r.read_u8()?;
        let counter_mode =
            CounterMode::from_u8(mode).ok_or(DecodeError::UnsupportedCounterMode(mode))?;
        let gran = r.read_u8()?;
        let granularity =
            CounterGranularity::from_u8(gran).ok_or(DecodeError::UnsupportedGranularity(gran))?;
        r.skip(6)?;

        Ok(Self {
            version,
            total_length,
            entries,
            meta_hash,
            strtab_offset,
            strtab_length,
            counter_mode,
            granularity,
        })
    }
}

/// Validated meta-data stream with random access to its packages.
#[derive(Debug, Clone)]
pub struct MetaFileReader {
    data: Bytes,
    header: MetaFileHeader,
    /// (offset, length) of each package blob
    packages: Vec<(usize, usize)>,
    strings: StringTable,
}

impl MetaFileReader {
    /// Validate the stream header, the package tables and the file-level
    /// string table. Package blobs are decoded on demand.
    pub fn new(data: impl Into<Bytes>) -> DecodeResult<Self> {
        let data = data.into();
        let mut r = SliceReader::new(&data);
        let header = MetaFileHeader::read(&mut r)?;

        if header.total_length != data.len() as u64 {
            return Err(DecodeError::InvalidOffset {
                offset: 0,
                len: header.total_length,
                size: data.len(),
            });
        }

        // Two u64 tables; each entry needs 16 bytes, which bounds the allocation
        if header.entries > (r.remaining() / 16) as u64 {
            return Err(DecodeError::Truncated {
                offset: r.offset(),
                needed: header.entries.saturating_mul(16) as usize,
                available: r.remaining(),
            });
        }
        let entries = header.entries as usize;
        let mut offsets = Vec::with_capacity(entries);
        for _ in 0..entries {
            offsets.push(r.read_u64()?);
        }
        let mut packages = Vec::with_capacity(entries);
        for offset in offsets {
            let len = r.read_u64()?;
            let end = offset.checked_add(len);
            match end {
                Some(end) if offset >= META_FILE_HEADER_SIZE as u64 && end <= data.len() as u64 => {
                    packages.push((offset as usize, len as usize));
                }
                _ => {
                    return Err(DecodeError::InvalidOffset {
                        offset,
                        len,
                        size: data.len(),
                    })
                }
            }
        }

        let strtab_end = u64::from(header.strtab_offset) + u64::from(header.strtab_length);
        if strtab_end > data.len() as u64 {
            return Err(DecodeError::InvalidOffset {
                offset: u64::from(header.strtab_offset),
                len: u64::from(header.strtab_length),
                size: data.len(),
            });
        }
        let strings = if header.strtab_length == 0 {
            StringTable::default()
        } else {
            let mut sr = SliceReader::new(&data).with_limit(strtab_end as usize);
            sr.seek_to(header.strtab_offset as usize)?;
            StringTable::read(&mut sr)?
        };

        Ok(Self {
            data,
            header,
            packages,
            strings,
        })
    }

    pub fn header(&self) -> &MetaFileHeader {
        &self.header
    }

    pub fn num_packages(&self) -> u32 {
        self.packages.len() as u32
    }

    pub fn meta_hash(&self) -> [u8; 16] {
        self.header.meta_hash
    }

    pub fn counter_mode(&self) -> CounterMode {
        self.header.counter_mode
    }

    pub fn granularity(&self) -> CounterGranularity {
        self.header.granularity
    }

    /// File-level string table (empty for streams written by a single process).
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// Open a cursor over package `pkg_idx`.
    pub fn package_decoder(&self, pkg_idx: u32) -> DecodeResult<PackageDecoder<'_>> {
        let &(offset, len) =
            self.packages
                .get(pkg_idx as usize)
                .ok_or(DecodeError::PackageIndexOutOfRange {
                    index: pkg_idx,
                    len: self.num_packages(),
                })?;
        PackageDecoder::new(&self.data[offset..offset + len])
    }
}

/// Fixed-size header at the start of each package blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageHeader {
    pub length: u32,
    pub pkg_name: u32,
    pub pkg_path: u32,
    pub module_path: u32,
    pub meta_hash: [u8; 16],
    pub num_files: u32,
    pub num_funcs: u32,
}

impl PackageHeader {
    fn read(r: &mut SliceReader<'_>) -> DecodeResult<Self> {
        let length = r.read_u32()?;
        let pkg_name = r.read_u32()?;
        let pkg_path = r.read_u32()?;
        let module_path = r.read_u32()?;
        let meta_hash = r.read_array()?;
        r.skip(4)?;
        let num_files = r.read_u32()?;
        let num_funcs = r.read_u32()?;
        Ok(Self {
            length,
            pkg_name,
            pkg_path,
            module_path,
            meta_hash,
            num_files,
            num_funcs,
        })
    }
}

/// Cursor over one package blob.
#[derive(Debug, Clone)]
pub struct PackageDecoder<'a> {
    blob: &'a [u8],
    header: PackageHeader,
    strings: StringTable,
}

impl<'a> PackageDecoder<'a> {
    pub fn new(blob: &'a [u8]) -> DecodeResult<Self> {
        let mut r = SliceReader::new(blob);
        let header = PackageHeader::read(&mut r)?;
        if header.length as usize != blob.len() {
            return Err(DecodeError::InvalidOffset {
                offset: 0,
                len: u64::from(header.length),
                size: blob.len(),
            });
        }
        let table_end = PKG_HEADER_SIZE as u64 + u64::from(header.num_funcs) * 4;
        if table_end > blob.len() as u64 {
            return Err(DecodeError::Truncated {
                offset: PKG_HEADER_SIZE,
                needed: (table_end as usize).saturating_sub(PKG_HEADER_SIZE),
                available: r.remaining(),
            });
        }
        r.seek_to(table_end as usize)?;
        let strings = StringTable::read(&mut r)?;

        let decoder = Self {
            blob,
            header,
            strings,
        };
        // Resolve the package's own names eagerly so later accessors are infallible
        decoder.strings.get(decoder.header.pkg_path)?;
        decoder.strings.get(decoder.header.pkg_name)?;
        decoder.strings.get(decoder.header.module_path)?;
        Ok(decoder)
    }

    pub fn header(&self) -> &PackageHeader {
        &self.header
    }

    pub fn num_funcs(&self) -> u32 {
        self.header.num_funcs
    }

    pub fn package_path(&self) -> &str {
        self.strings.get(self.header.pkg_path).unwrap_or_default()
    }

    pub fn package_name(&self) -> &str {
        self.strings.get(self.header.pkg_name).unwrap_or_default()
    }

    pub fn module_path(&self) -> &str {
        self.strings.get(self.header.module_path).unwrap_or_default()
    }

    /// Decode function `func_idx` into `desc`, reusing its unit buffer.
    pub fn read_func(&self, func_idx: u32, desc: &mut FuncDesc) -> DecodeResult<()> {
        if func_idx >= self.header.num_funcs {
            return Err(DecodeError::FunctionIndexOutOfRange {
                index: func_idx,
                len: self.header.num_funcs,
            });
        }
        let mut r = SliceReader::new(self.blob);
        r.seek_to(PKG_HEADER_SIZE + func_idx as usize * 4)?;
        let offset = r.read_u32()? as usize;
        r.seek_to(offset)?;

        let num_units = r.read_uleb128_u32()?;
        let name_idx = r.read_uleb128_u32()?;
        let file_idx = r.read_uleb128_u32()?;

        // Six ULEB128 fields per unit, at least one byte each
        if u64::from(num_units) * 6 > r.remaining() as u64 {
            return Err(DecodeError::Truncated {
                offset: r.offset(),
                needed: num_units as usize * 6,
                available: r.remaining(),
            });
        }

        desc.func_name.clear();
        desc.func_name.push_str(self.strings.get(name_idx)?);
        desc.src_file.clear();
        desc.src_file.push_str(self.strings.get(file_idx)?);
        desc.units.clear();
        desc.units.reserve(num_units as usize);
        for _ in 0..num_units {
            desc.units.push(CoverableUnit {
                st_line: r.read_uleb128_u32()?,
                st_col: r.read_uleb128_u32()?,
                en_line: r.read_uleb128_u32()?,
                en_col: r.read_uleb128_u32()?,
                nx_stmts: r.read_uleb128_u32()?,
                parent: r.read_uleb128_u32()?,
            });
        }
        desc.is_literal = r.read_uleb128()? != 0;
        Ok(())
    }
}
