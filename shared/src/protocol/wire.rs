//! Wire protocol for coverage pulls.
//!
//! A request is a fixed 8-byte frame:
//!
//! ```text
//! [0..5]  preamble   01 C0 C0 10 07   (block header, magic, format version)
//! [5]     command    0x40 = dump
//! [6]     reserved
//! [7]     reset      nonzero = clear counters after servicing the request
//! ```
//!
//! A dump is answered with `0x11 ‖ len:u32le ‖ lcov`. Every request,
//! whatever its command, ends with the single acknowledgment byte `0x20`.

use bytes::{BufMut, Bytes, BytesMut};

/// Length of a request frame in bytes
pub const REQUEST_SIZE: usize = 8;

/// Expected first five bytes of every request.
pub const REQUEST_PREAMBLE: [u8; 5] = [0x01, 0xC0, 0xC0, 0x10, 0x07];

/// Command byte requesting a coverage dump
pub const BLOCK_CMD_DUMP: u8 = 0x40;

/// Tag preceding the length-prefixed LCOV payload
pub const BLOCK_EXECUTION_DATA: u8 = 0x11;

/// Acknowledgment byte terminating every response
pub const BLOCK_CMD_OK: u8 = 0x20;

/// Size of the coverage-info header (tag + length)
pub const COVERAGE_HEADER_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Dump,
    /// Any other command byte; answered with an acknowledgment only
    Other(u8),
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        match value {
            BLOCK_CMD_DUMP => Command::Dump,
            other => Command::Other(other),
        }
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> Self {
        match cmd {
            Command::Dump => BLOCK_CMD_DUMP,
            Command::Other(b) => b,
        }
    }
}

impl Command {
    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Command::Dump => "dump",
            Command::Other(_) => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame {
    pub preamble: [u8; 5],
    pub command: Command,
    pub reserved: u8,
    pub reset: bool,
}

impl RequestFrame {
    /// Well-formed dump request.
    pub fn dump(reset: bool) -> Self {
        Self {
            preamble: REQUEST_PREAMBLE,
            command: Command::Dump,
            reserved: 0,
            reset,
        }
    }

    /// Well-formed request that only clears counters.
    pub fn reset_only() -> Self {
        Self {
            preamble: REQUEST_PREAMBLE,
            command: Command::Other(0),
            reserved: 0,
            reset: true,
        }
    }

    pub fn from_bytes(buf: [u8; REQUEST_SIZE]) -> Self {
        let mut preamble = [0u8; 5];
        preamble.copy_from_slice(&buf[..5]);
        Self {
            preamble,
            command: Command::from(buf[5]),
            reserved: buf[6],
            reset: buf[7] != 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; REQUEST_SIZE] {
        let mut buf = [0u8; REQUEST_SIZE];
        buf[..5].copy_from_slice(&self.preamble);
        buf[5] = self.command.into();
        buf[6] = self.reserved;
        buf[7] = u8::from(self.reset);
        buf
    }

    pub fn has_valid_preamble(&self) -> bool {
        self.preamble == REQUEST_PREAMBLE
    }
}

/// Encode the coverage-info block (without the trailing acknowledgment).
///
/// Fails if the payload does not fit the 32-bit length field.
pub fn encode_coverage_info(payload: &[u8]) -> anyhow::Result<Bytes> {
    let len = u32::try_from(payload.len())
        .map_err(|_| anyhow::anyhow!("coverage payload of {} bytes exceeds u32", payload.len()))?;
    let mut buf = BytesMut::with_capacity(COVERAGE_HEADER_SIZE + payload.len());
    buf.put_u8(BLOCK_EXECUTION_DATA);
    buf.put_u32_le(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}
