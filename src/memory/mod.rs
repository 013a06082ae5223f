//! Target memory model: the address map and captured snapshots.

pub mod region;
pub mod snapshot;

pub use region::{
    AddressClass, AddressRange, LayoutBlock, MemoryRegionTable, TargetMemoryLayout,
    ValidationPolicy,
};
pub use snapshot::MemorySnapshot;

#[cfg(test)]
mod tests_property;
