//! Memory snapshots ("dumps").

use crate::codec::byte_utils::{join_u16, join_u32};

/// A captured copy of target memory covering `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySnapshot {
    start: u32,
    end: u32,
    generation: u32,
    data: Vec<u8>,
    /// Everything below this address has been received
    read_completed: u32,
}

impl MemorySnapshot {
    /// Create an empty (zero-filled) snapshot. `end` is clamped to `start`.
    pub fn new(start: u32, end: u32) -> Self {
        let end = end.max(start);
        Self {
            start,
            end,
            generation: 0,
            data: vec![0; (end - start) as usize],
            read_completed: start,
        }
    }

    /// Wrap bytes that were already fully received.
    pub fn from_bytes(start: u32, data: Vec<u8>) -> Self {
        let end = start.saturating_add(data.len() as u32);
        let mut data = data;
        data.truncate((end - start) as usize);
        Self {
            start,
            end,
            generation: 0,
            data,
            read_completed: end,
        }
    }

    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = generation;
        self
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn set_generation(&mut self, generation: u32) {
        self.generation = generation;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn read_completed(&self) -> u32 {
        self.read_completed
    }

    pub fn is_complete(&self) -> bool {
        self.read_completed >= self.end
    }

    #[inline]
    pub fn contains(&self, address: u32, size: u32) -> bool {
        address >= self.start && (address as u64 + size as u64) <= self.end as u64
    }

    /// Store a received chunk at `address` and advance the completion cursor.
    ///
    /// Chunks must arrive in ascending order starting at the cursor; the
    /// cursor never moves backwards.
    pub fn commit_chunk(&mut self, address: u32, bytes: &[u8]) {
        if !self.contains(address, bytes.len() as u32) {
            return;
        }
        let offset = (address - self.start) as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        let chunk_end = address + bytes.len() as u32;
        if address <= self.read_completed && chunk_end > self.read_completed {
            self.read_completed = chunk_end;
        }
    }

    /// Copy the overlapping part of `other` into this snapshot.
    pub fn copy_from(&mut self, other: &MemorySnapshot) {
        let low = self.start.max(other.start);
        let high = self.end.min(other.end);
        if low >= high {
            return;
        }
        let dst = (low - self.start) as usize;
        let src = (low - other.start) as usize;
        let len = (high - low) as usize;
        self.data[dst..dst + len].copy_from_slice(&other.data[src..src + len]);
    }

    /// Read a byte; out-of-range addresses read as zero.
    #[inline]
    pub fn read_u8(&self, address: u32) -> u8 {
        if !self.contains(address, 1) {
            return 0;
        }
        self.data[(address - self.start) as usize]
    }

    /// Read a big-endian word; out-of-range addresses read as zero.
    #[inline]
    pub fn read_u16(&self, address: u32) -> u16 {
        if !self.contains(address, 2) {
            return 0;
        }
        let i = (address - self.start) as usize;
        join_u16(self.data[i], self.data[i + 1])
    }

    /// Read a big-endian long; out-of-range addresses read as zero.
    #[inline]
    pub fn read_u32(&self, address: u32) -> u32 {
        if !self.contains(address, 4) {
            return 0;
        }
        let i = (address - self.start) as usize;
        join_u32(self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3])
    }

    /// Read 1, 2 or 4 bytes widened to a long.
    pub fn read_sized(&self, address: u32, size: u32) -> u32 {
        match size {
            1 => self.read_u8(address) as u32,
            2 => self.read_u16(address) as u32,
            _ => self.read_u32(address),
        }
    }
}
