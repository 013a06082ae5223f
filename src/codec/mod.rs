//! Wire Codec
//!
//! Byte-order primitives and the fixed payload layouts used by the Gecko
//! command set. All payloads are big-endian.

pub mod byte_utils;

pub use byte_utils::{join_u16, join_u32, join_u64, push_be_u32, read_be_u32, split_u32, split_u64};

/// Filler for unused RPC argument slots.
pub const RPC_ARG_PADDING: u32 = 0xFECA_D0BA;

/// Maximum number of register arguments an RPC frame carries.
pub const RPC_MAX_ARGS: usize = 8;

/// Swap between host order and big-endian (no-op on big-endian hosts).
#[inline(always)]
pub fn swap16(value: u16) -> u16 {
    u16::from_be(value)
}

/// Swap between host order and big-endian (no-op on big-endian hosts).
#[inline(always)]
pub fn swap32(value: u32) -> u32 {
    u32::from_be(value)
}

/// Swap between host order and big-endian (no-op on big-endian hosts).
#[inline(always)]
pub fn swap64(value: u64) -> u64 {
    u64::from_be(value)
}

/// Range descriptor sent after dump and upload commands: `(start << 32) | end`.
pub fn encode_range(start: u32, end: u32) -> [u8; 8] {
    join_u64(start, end).to_be_bytes()
}

/// Two longs back to back, as used by pokes, kernel writes and exact breakpoints.
pub fn encode_pair(first: u32, second: u32) -> [u8; 8] {
    join_u64(first, second).to_be_bytes()
}

/// RPC frame: target address followed by eight argument registers.
///
/// Arguments beyond the eighth are ignored; missing ones are padded.
pub fn encode_rpc(address: u32, args: &[u32]) -> [u8; 4 + 4 * RPC_MAX_ARGS] {
    let mut frame = [0u8; 4 + 4 * RPC_MAX_ARGS];
    frame[..4].copy_from_slice(&address.to_be_bytes());
    for slot in 0..RPC_MAX_ARGS {
        let value = args.get(slot).copied().unwrap_or(RPC_ARG_PADDING);
        let at = 4 + slot * 4;
        frame[at..at + 4].copy_from_slice(&value.to_be_bytes());
    }
    frame
}

/// Decode an RPC frame back into its address and the eight argument slots.
pub fn decode_rpc(frame: &[u8]) -> Option<(u32, [u32; RPC_MAX_ARGS])> {
    let address = read_be_u32(frame, 0)?;
    let mut args = [0u32; RPC_MAX_ARGS];
    for (slot, arg) in args.iter_mut().enumerate() {
        *arg = read_be_u32(frame, 4 + slot * 4)?;
    }
    Some((address, args))
}
