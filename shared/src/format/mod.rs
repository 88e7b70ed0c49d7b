//! Binary coverage stream formats
//!
//! Two streams are produced by the instrumentation runtime:
//! - the meta-data stream ([`meta`]): static package/function/unit shape,
//!   stable for the life of the process
//! - the counter stream ([`counter`]): a point-in-time snapshot of every
//!   function's execution counters
//!
//! Fixed-width fields are little-endian unless a counter stream's header
//! says otherwise. Variable-width fields are ULEB128.

pub mod counter;
pub mod encode;
pub mod error;
pub mod meta;
pub mod reader;
pub mod stringtab;

pub use counter::CounterDataReader;
pub use error::{DecodeError, DecodeResult, StreamKind};
pub use meta::{MetaFileReader, PackageDecoder};

/// Magic at the start of a meta-data stream ("\0cvm")
pub const META_MAGIC: [u8; 4] = [0x00, 0x63, 0x76, 0x6d];

/// Magic at the start and in the footer of a counter stream ("\0cwm")
pub const COUNTER_MAGIC: [u8; 4] = [0x00, 0x63, 0x77, 0x6d];

pub const META_FILE_VERSION: u32 = 1;
pub const COUNTER_FILE_VERSION: u32 = 1;

pub const META_FILE_HEADER_SIZE: usize = 4 + 4 + 8 + 8 + 16 + 4 + 4 + 1 + 1 + 6;
pub const PKG_HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 16 + 4 + 4 + 4;
pub const COUNTER_FILE_HEADER_SIZE: usize = 4 + 4 + 16 + 1 + 1 + 6;
pub const COUNTER_FILE_FOOTER_SIZE: usize = 16;

/// Encoding of counter values inside a counter stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CounterFlavor {
    /// Fixed-width u32 words
    Raw = 1,
    /// ULEB128-encoded values
    Uleb128 = 2,
}

impl CounterFlavor {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(CounterFlavor::Raw),
            2 => Some(CounterFlavor::Uleb128),
            _ => None,
        }
    }
}
