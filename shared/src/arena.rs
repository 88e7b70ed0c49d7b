//! Pooled counter storage for a single dump
//!
//! A dump allocates one counter array per distinct function. Carving those
//! arrays out of a few large chunks avoids an allocation per function. The
//! arena is owned by one dump and dropped as a whole once the response is
//! produced; individual slots are never freed.

/// Minimum size of a backing chunk, in counters.
pub const ARENA_CHUNK: usize = 8192;

/// Handle to a counter array carved from a [`CounterArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSlot {
    chunk: u32,
    start: u32,
    len: u32,
}

impl CounterSlot {
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Default)]
pub struct CounterArena {
    chunks: Vec<Box<[u32]>>,
    cursor: usize,
}

impl CounterArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters left in the current chunk.
    pub fn remaining(&self) -> usize {
        self.chunks
            .last()
            .map(|c| c.len() - self.cursor)
            .unwrap_or(0)
    }

    /// Number of backing chunks allocated so far.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total counters across all chunks.
    pub fn capacity(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }

    /// Carve a zeroed array of `n` counters. Grows by a fresh chunk of
    /// `max(n, ARENA_CHUNK)` when the current one cannot fit `n`.
    pub fn allocate(&mut self, n: usize) -> CounterSlot {
        if n > self.remaining() {
            let size = n.max(ARENA_CHUNK);
            self.chunks.push(vec![0u32; size].into_boxed_slice());
            self.cursor = 0;
        }
        let slot = CounterSlot {
            chunk: self.chunks.len().saturating_sub(1) as u32,
            start: self.cursor as u32,
            len: n as u32,
        };
        self.cursor += n;
        slot
    }

    pub fn get(&self, slot: CounterSlot) -> &[u32] {
        if slot.is_empty() {
            return &[];
        }
        let start = slot.start as usize;
        &self.chunks[slot.chunk as usize][start..start + slot.len()]
    }

    pub fn get_mut(&mut self, slot: CounterSlot) -> &mut [u32] {
        if slot.is_empty() {
            return &mut [];
        }
        let start = slot.start as usize;
        &mut self.chunks[slot.chunk as usize][start..start + slot.len()]
    }
}
