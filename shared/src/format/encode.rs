//! Meta-data and counter stream encoders
//!
//! These produce exactly the layouts read by [`super::meta`] and
//! [`super::counter`]. The in-process runtime uses them to snapshot its
//! registry; tests use them to build fixtures.

use super::reader::append_uleb128;
use super::stringtab::StringTableWriter;
use super::{
    CounterFlavor, COUNTER_FILE_VERSION, COUNTER_MAGIC, META_FILE_HEADER_SIZE, META_FILE_VERSION,
    META_MAGIC, PKG_HEADER_SIZE,
};
use crate::types::coverage::{CounterGranularity, CounterMode, FuncDesc, FuncPayload};
use bytes::{BufMut, BytesMut};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// 16-byte digest used for package and file meta hashes.
pub fn meta_digest(data: &[u8]) -> [u8; 16] {
    let full = Sha256::digest(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&full[..16]);
    out
}

/// Builds one package blob.
#[derive(Debug, Clone)]
pub struct PackageMetaBuilder {
    strings: StringTableWriter,
    pkg_path: u32,
    pkg_name: u32,
    module_path: u32,
    files: BTreeSet<u32>,
    funcs: Vec<Vec<u8>>,
}

impl PackageMetaBuilder {
    pub fn new(pkg_path: &str, pkg_name: &str, module_path: &str) -> Self {
        let mut strings = StringTableWriter::new();
        let pkg_path = strings.lookup_or_add(pkg_path);
        let pkg_name = strings.lookup_or_add(pkg_name);
        let module_path = strings.lookup_or_add(module_path);
        Self {
            strings,
            pkg_path,
            pkg_name,
            module_path,
            files: BTreeSet::new(),
            funcs: Vec::new(),
        }
    }

    /// Append a function; returns its index within the package.
    pub fn add_func(&mut self, desc: &FuncDesc) -> u32 {
        let name = self.strings.lookup_or_add(&desc.func_name);
        let file = self.strings.lookup_or_add(&desc.src_file);
        self.files.insert(file);

        let mut buf = Vec::new();
        append_uleb128(&mut buf, desc.units.len() as u64);
        append_uleb128(&mut buf, u64::from(name));
        append_uleb128(&mut buf, u64::from(file));
        for u in &desc.units {
            for field in [u.st_line, u.st_col, u.en_line, u.en_col, u.nx_stmts, u.parent] {
                append_uleb128(&mut buf, u64::from(field));
            }
        }
        append_uleb128(&mut buf, u64::from(desc.is_literal));

        self.funcs.push(buf);
        (self.funcs.len() - 1) as u32
    }

    pub fn num_funcs(&self) -> u32 {
        self.funcs.len() as u32
    }

    /// Encode the blob. Returns the bytes and the package hash.
    pub fn encode(&self) -> (Vec<u8>, [u8; 16]) {
        let strtab = self.strings.encode();
        let offsets_len = self.funcs.len() * 4;
        let body_len: usize = self.funcs.iter().map(Vec::len).sum();
        let total = PKG_HEADER_SIZE + offsets_len + strtab.len() + body_len;

        let mut body = BytesMut::with_capacity(offsets_len + strtab.len() + body_len);
        let mut off = PKG_HEADER_SIZE + offsets_len + strtab.len();
        for f in &self.funcs {
            body.put_u32_le(off as u32);
            off += f.len();
        }
        body.put_slice(&strtab);
        for f in &self.funcs {
            body.put_slice(f);
        }
        let hash = meta_digest(&body);

        let mut out = BytesMut::with_capacity(total);
        out.put_u32_le(total as u32);
        out.put_u32_le(self.pkg_name);
        out.put_u32_le(self.pkg_path);
        out.put_u32_le(self.module_path);
        out.put_slice(&hash);
        out.put_bytes(0, 4);
        out.put_u32_le(self.files.len() as u32);
        out.put_u32_le(self.funcs.len() as u32);
        out.put_slice(&body);
        (out.to_vec(), hash)
    }
}

/// Builds a complete meta-data stream from package blobs.
#[derive(Debug, Clone)]
pub struct MetaFileWriter {
    mode: CounterMode,
    granularity: CounterGranularity,
    packages: Vec<PackageMetaBuilder>,
}

impl MetaFileWriter {
    pub fn new(mode: CounterMode, granularity: CounterGranularity) -> Self {
        Self {
            mode,
            granularity,
            packages: Vec::new(),
        }
    }

    /// Append a package; returns its index.
    pub fn add_package(&mut self, pkg: PackageMetaBuilder) -> u32 {
        self.packages.push(pkg);
        (self.packages.len() - 1) as u32
    }

    /// Encode the stream. The file hash covers every package hash in order.
    pub fn encode(&self) -> Vec<u8> {
        let blobs: Vec<(Vec<u8>, [u8; 16])> = self.packages.iter().map(|p| p.encode()).collect();
        let mut hash_input = Vec::with_capacity(blobs.len() * 16);
        for (_, h) in &blobs {
            hash_input.extend_from_slice(h);
        }
        let file_hash = meta_digest(&hash_input);

        // A single writer never needs file-level strings
        let strtab = StringTableWriter::new().encode();
        let strtab_offset = META_FILE_HEADER_SIZE + blobs.len() * 16;
        let preamble = strtab_offset + strtab.len();
        let total = preamble + blobs.iter().map(|(b, _)| b.len()).sum::<usize>();

        let mut out = BytesMut::with_capacity(total);
        out.put_slice(&META_MAGIC);
        out.put_u32_le(META_FILE_VERSION);
        out.put_u64_le(total as u64);
        out.put_u64_le(blobs.len() as u64);
        out.put_slice(&file_hash);
        out.put_u32_le(strtab_offset as u32);
        out.put_u32_le(strtab.len() as u32);
        out.put_u8(self.mode as u8);
        out.put_u8(self.granularity as u8);
        out.put_bytes(0, 6);

        let mut off = preamble;
        for (blob, _) in &blobs {
            out.put_u64_le(off as u64);
            off += blob.len();
        }
        for (blob, _) in &blobs {
            out.put_u64_le(blob.len() as u64);
        }
        out.put_slice(&strtab);
        for (blob, _) in &blobs {
            out.put_slice(blob);
        }
        out.to_vec()
    }

    /// Hash that counter streams must carry to be joined with this metadata.
    pub fn meta_hash(&self) -> [u8; 16] {
        let mut hash_input = Vec::with_capacity(self.packages.len() * 16);
        for p in &self.packages {
            hash_input.extend_from_slice(&p.encode().1);
        }
        meta_digest(&hash_input)
    }
}

#[derive(Debug, Clone, Default)]
struct SegmentBuilder {
    args: Vec<(String, String)>,
    funcs: Vec<FuncPayload>,
}

/// Builds a counter stream.
#[derive(Debug, Clone)]
pub struct CounterFileWriter {
    meta_hash: [u8; 16],
    flavor: CounterFlavor,
    big_endian: bool,
    segments: Vec<SegmentBuilder>,
}

impl CounterFileWriter {
    pub fn new(meta_hash: [u8; 16], flavor: CounterFlavor) -> Self {
        Self {
            meta_hash,
            flavor,
            big_endian: false,
            segments: Vec::new(),
        }
    }

    /// Encode raw counters big-endian.
    pub fn big_endian(mut self, big_endian: bool) -> Self {
        self.big_endian = big_endian;
        self
    }

    /// Start a new segment carrying the given arguments.
    pub fn begin_segment(&mut self, args: &[(&str, &str)]) {
        self.segments.push(SegmentBuilder {
            args: args
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            funcs: Vec::new(),
        });
    }

    /// Append a record to the current segment, opening one if needed.
    pub fn add_func(&mut self, payload: &FuncPayload) {
        if self.segments.is_empty() {
            self.begin_segment(&[]);
        }
        if let Some(seg) = self.segments.last_mut() {
            seg.funcs.push(payload.clone());
        }
    }

    /// Convenience: append a whole argument-less segment.
    pub fn with_segment(mut self, funcs: &[FuncPayload]) -> Self {
        self.begin_segment(&[]);
        for f in funcs {
            self.add_func(f);
        }
        self
    }

    fn put_u32(&self, out: &mut BytesMut, v: u32) {
        match self.flavor {
            CounterFlavor::Raw if self.big_endian => out.put_u32(v),
            CounterFlavor::Raw => out.put_u32_le(v),
            CounterFlavor::Uleb128 => {
                let mut tmp = Vec::with_capacity(5);
                append_uleb128(&mut tmp, u64::from(v));
                out.put_slice(&tmp);
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.put_slice(&COUNTER_MAGIC);
        out.put_u32_le(COUNTER_FILE_VERSION);
        out.put_slice(&self.meta_hash);
        out.put_u8(self.flavor as u8);
        out.put_u8(u8::from(self.big_endian));
        out.put_bytes(0, 6);

        for seg in &self.segments {
            let mut strings = StringTableWriter::new();
            let mut args = Vec::new();
            if !seg.args.is_empty() {
                append_uleb128(&mut args, seg.args.len() as u64);
                for (k, v) in &seg.args {
                    append_uleb128(&mut args, u64::from(strings.lookup_or_add(k)));
                    append_uleb128(&mut args, u64::from(strings.lookup_or_add(v)));
                }
            }
            let strtab = strings.encode();

            out.put_u64_le(seg.funcs.len() as u64);
            out.put_u32_le(strtab.len() as u32);
            out.put_u32_le(args.len() as u32);
            out.put_slice(&strtab);
            out.put_slice(&args);
            let misalign = out.len() % 4;
            if misalign != 0 {
                out.put_bytes(0, 4 - misalign);
            }

            for f in &seg.funcs {
                self.put_u32(&mut out, f.counters.len() as u32);
                self.put_u32(&mut out, f.pkg_idx);
                self.put_u32(&mut out, f.func_idx);
                for &c in &f.counters {
                    self.put_u32(&mut out, c);
                }
            }
        }

        out.put_slice(&COUNTER_MAGIC);
        out.put_u32_le(0);
        out.put_u32_le(self.segments.len() as u32);
        out.put_u32_le(0);
        out.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::meta::MetaFileReader;
    use crate::types::coverage::CoverableUnit;

    #[test]
    fn test_meta_hash_matches_encoded_header() {
        let mut pkg = PackageMetaBuilder::new("p", "p", "m");
        pkg.add_func(&FuncDesc::new("p/a.go", "A").with_unit(CoverableUnit::new(1, 1, 2, 1, 1)));
        let mut w = MetaFileWriter::new(CounterMode::Count, CounterGranularity::PerBlock);
        w.add_package(pkg);

        let reader = MetaFileReader::new(w.encode()).unwrap();
        assert_eq!(reader.meta_hash(), w.meta_hash());
    }

    #[test]
    fn test_package_hash_depends_on_content() {
        let mut a = PackageMetaBuilder::new("p", "p", "m");
        a.add_func(&FuncDesc::new("p/a.go", "A"));
        let mut b = PackageMetaBuilder::new("p", "p", "m");
        b.add_func(&FuncDesc::new("p/a.go", "B"));
        assert_ne!(a.encode().1, b.encode().1);
    }

    #[test]
    fn test_counter_segments_are_aligned() {
        let mut w = CounterFileWriter::new([0; 16], CounterFlavor::Raw);
        w.begin_segment(&[("argc", "3")]);
        w.add_func(&FuncPayload::new(0, 0, vec![1]));
        let data = w.encode();
        // header + segment header + 4-byte aligned tables + one 16-byte record + footer
        assert_eq!(data.len() % 4, 0);
        assert_eq!(&data[data.len() - 16..data.len() - 12], &COUNTER_MAGIC);
    }
}
