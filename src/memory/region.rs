//! Target Address Map
//!
//! The console exposes a sparse 32-bit address space. Reads outside the
//! mapped ranges crash the stub, so every component checks addresses here
//! before touching the wire.
//!
//! ## Static Map
//!
//! | Address Range           | Class      | Description                 |
//! |:------------------------|:-----------|:----------------------------|
//! | 0x01000000-0x01800000   | Executable | Loader / init code (dynamic)|
//! | 0x0E300000-0x10000000   | Executable | Game code (dynamic)         |
//! | 0x10000000-0x50000000   | ReadWrite  | Game data (dynamic)         |
//! | 0xCC000000-0xCC010000   | Hardware   | Video / processor interface |
//! | 0xE0000000-0xE4000000   | ReadOnly   | Shared fonts / libraries    |
//! | 0xE8000000-0xEA000000   | ReadOnly   | System libraries            |
//! | 0xF4000000-0xF6000000   | ReadOnly   | Loader data                 |
//! | 0xF6000000-0xF6800000   | ReadOnly   | Loader heap                 |
//! | 0xF8000000-0xFB000000   | ReadOnly   | Kernel shared data          |
//! | 0xFB000000-0xFB800000   | ReadOnly   | Kernel heap                 |
//! | 0xFC000000-0xFFFFFFFF   | ReadWrite  | Kernel / hardware mirror    |
//!
//! The three dynamic entries are replaced by a [`TargetMemoryLayout`] once
//! the live target has been introspected.

use crate::error::Result;
use crate::gecko::GeckoClient;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Access class of an address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressClass {
    ReadWrite,
    ReadOnly,
    Executable,
    Hardware,
    Unknown,
}

/// Range id of the loader/init code segment
pub const EXEC_INIT_ID: u8 = 0x01;
/// Range id of the main code segment
pub const EXEC_CODE_ID: u8 = 0x0E;
/// Range id of the main data segment
pub const RW_DATA_ID: u8 = 0x10;

/// One contiguous mapped range, `[low, high)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    pub class: AddressClass,
    pub id: u8,
    pub low: u32,
    pub high: u32,
}

impl AddressRange {
    pub const fn new(class: AddressClass, id: u8, low: u32, high: u32) -> Self {
        Self { class, id, low, high }
    }

    #[inline]
    pub fn contains(&self, address: u32) -> bool {
        self.low <= address && address < self.high
    }

    pub fn len(&self) -> u32 {
        self.high - self.low
    }

    pub fn is_empty(&self) -> bool {
        self.high <= self.low
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}-{:08X} {:?}", self.low, self.high, self.class)
    }
}

/// How strictly addresses are checked before a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValidationPolicy {
    /// Only mapped addresses are valid
    #[default]
    Strict,
    /// Every address is valid (debug override)
    Permissive,
}

const STATIC_RANGES: [AddressRange; 11] = [
    AddressRange::new(AddressClass::Executable, EXEC_INIT_ID, 0x0100_0000, 0x0180_0000),
    AddressRange::new(AddressClass::Executable, EXEC_CODE_ID, 0x0E30_0000, 0x1000_0000),
    AddressRange::new(AddressClass::ReadWrite, RW_DATA_ID, 0x1000_0000, 0x5000_0000),
    AddressRange::new(AddressClass::Hardware, 0xCC, 0xCC00_0000, 0xCC01_0000),
    AddressRange::new(AddressClass::ReadOnly, 0xE0, 0xE000_0000, 0xE400_0000),
    AddressRange::new(AddressClass::ReadOnly, 0xE8, 0xE800_0000, 0xEA00_0000),
    AddressRange::new(AddressClass::ReadOnly, 0xF4, 0xF400_0000, 0xF600_0000),
    AddressRange::new(AddressClass::ReadOnly, 0xF6, 0xF600_0000, 0xF680_0000),
    AddressRange::new(AddressClass::ReadOnly, 0xF8, 0xF800_0000, 0xFB00_0000),
    AddressRange::new(AddressClass::ReadOnly, 0xFB, 0xFB00_0000, 0xFB80_0000),
    AddressRange::new(AddressClass::ReadWrite, 0xFC, 0xFC00_0000, 0xFFFF_FFFF),
];

/// Ordered table of mapped ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegionTable {
    ranges: Vec<AddressRange>,
}

impl Default for MemoryRegionTable {
    fn default() -> Self {
        Self {
            ranges: STATIC_RANGES.to_vec(),
        }
    }
}

impl MemoryRegionTable {
    /// Build a table from arbitrary ranges. Ranges are kept sorted by `low`.
    pub fn from_ranges(mut ranges: Vec<AddressRange>) -> Self {
        ranges.retain(|r| !r.is_empty());
        ranges.sort_by_key(|r| r.low);
        Self { ranges }
    }

    pub fn ranges(&self) -> &[AddressRange] {
        &self.ranges
    }

    pub fn find(&self, address: u32) -> Option<&AddressRange> {
        self.ranges.iter().find(|r| r.contains(address))
    }

    pub fn classify(&self, address: u32) -> AddressClass {
        self.find(address).map(|r| r.class).unwrap_or(AddressClass::Unknown)
    }

    pub fn valid_address(&self, address: u32, policy: ValidationPolicy) -> bool {
        policy == ValidationPolicy::Permissive || self.find(address).is_some()
    }

    /// Whether `[low, high)` lies inside a single mapped range.
    pub fn valid_range(&self, low: u32, high: u32, policy: ValidationPolicy) -> bool {
        if low >= high {
            return false;
        }
        if policy == ValidationPolicy::Permissive {
            return true;
        }
        self.find(low).is_some_and(|r| high <= r.high)
    }

    /// A copy of this table with the dynamic entries taken from `layout`.
    pub fn with_layout(&self, layout: &TargetMemoryLayout) -> Self {
        let mut ranges = self.ranges.clone();
        for replacement in layout.ranges() {
            if let Some(slot) = ranges.iter_mut().find(|r| r.id == replacement.id) {
                *slot = replacement;
            }
        }
        Self::from_ranges(ranges)
    }
}

/// Where the kernel keeps the segment bounds of the running title for one OS version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutBlock {
    pub os_version: u32,
    /// Kernel address of six longs: init low/high, code low/high, data low/high
    pub address: u32,
}

/// Segment bounds of the running title, read from the live target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetMemoryLayout {
    pub exec_init: (u32, u32),
    pub exec_code: (u32, u32),
    pub rw_data: (u32, u32),
}

impl TargetMemoryLayout {
    /// Read the segment bounds from the kernel.
    ///
    /// Returns `None` when the OS version has no known layout block or the
    /// kernel reports an empty segment; the static table stays in force then.
    pub fn introspect(client: &mut GeckoClient, blocks: &[LayoutBlock]) -> Result<Option<Self>> {
        let version = client.os_version()?;
        let Some(block) = blocks.iter().find(|b| b.os_version == version) else {
            log::debug!("no layout block for OS version {}", version);
            return Ok(None);
        };

        let mut words = [0u32; 6];
        for (i, word) in words.iter_mut().enumerate() {
            *word = client.read_kernel(block.address + (i as u32) * 4)?;
        }

        let layout = Self {
            exec_init: (words[0], words[1]),
            exec_code: (words[2], words[3]),
            rw_data: (words[4], words[5]),
        };
        if layout.ranges().iter().any(|r| r.is_empty()) {
            log::warn!("kernel reported an empty segment for OS version {}", version);
            return Ok(None);
        }
        log::debug!("target layout for OS {}: {:?}", version, layout);
        Ok(Some(layout))
    }

    pub fn ranges(&self) -> [AddressRange; 3] {
        [
            AddressRange::new(AddressClass::Executable, EXEC_INIT_ID, self.exec_init.0, self.exec_init.1),
            AddressRange::new(AddressClass::Executable, EXEC_CODE_ID, self.exec_code.0, self.exec_code.1),
            AddressRange::new(AddressClass::ReadWrite, RW_DATA_ID, self.rw_data.0, self.rw_data.1),
        ]
    }
}
