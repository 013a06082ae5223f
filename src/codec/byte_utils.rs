//! Helper functions for byte manipulation.
//!
//! The Gecko target is a big-endian PowerPC, so everything crossing the wire
//! or living in a snapshot is combined and split in big-endian order.

/// Join two bytes into a 16-bit word (Big Endian)
#[inline(always)]
pub fn join_u16(high: u8, low: u8) -> u16 {
    u16::from_be_bytes([high, low])
}

/// Join four bytes into a 32-bit long (Big Endian)
#[inline(always)]
pub fn join_u32(b0: u8, b1: u8, b2: u8, b3: u8) -> u32 {
    u32::from_be_bytes([b0, b1, b2, b3])
}

/// Split a 32-bit long into four bytes (Big Endian)
#[inline(always)]
pub fn split_u32(value: u32) -> (u8, u8, u8, u8) {
    let bytes = value.to_be_bytes();
    (bytes[0], bytes[1], bytes[2], bytes[3])
}

/// Join two 32-bit longs into a 64-bit quad (Big Endian)
#[inline(always)]
pub fn join_u64(high: u32, low: u32) -> u64 {
    ((high as u64) << 32) | (low as u64)
}

/// Split a 64-bit quad into its high and low longs
#[inline(always)]
pub fn split_u64(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

/// Read a big-endian long at `offset`, or `None` if it would run past the slice.
#[inline]
pub fn read_be_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(join_u32(bytes[0], bytes[1], bytes[2], bytes[3]))
}

/// Append a long to `out` in big-endian order.
#[inline]
pub fn push_be_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}
