//! Register file of a stopped thread.
//!
//! The stub saves the register file into the context block as 72 big-endian
//! longs:
//!
//! | Index  | Registers                               |
//! |:-------|:----------------------------------------|
//! | 0-6    | CR, XER, CTR, DSIS, DAR, SRR0, SRR1     |
//! | 7-38   | r0-r31                                  |
//! | 39     | LR                                      |
//! | 40-71  | f0-f31 (single-precision bit patterns)  |

use crate::codec::byte_utils::read_be_u32;
use crate::error::{ErrorCode, GeckoError, Result};
use std::fmt;

pub const REGISTER_COUNT: usize = 72;
/// Size of the context block in target memory
pub const CONTEXT_BLOCK_SIZE: u32 = 0x120;

pub const CR: usize = 0;
pub const XER: usize = 1;
pub const CTR: usize = 2;
pub const DSIS: usize = 3;
pub const DAR: usize = 4;
pub const SRR0: usize = 5;
pub const SRR1: usize = 6;
pub const GPR_BASE: usize = 7;
pub const LR: usize = 39;
pub const FPR_BASE: usize = 40;

const SPECIAL_NAMES: [&str; 7] = ["CR", "XER", "CTR", "DSIS", "DAR", "SRR0", "SRR1"];

/// Display name of register `index`, e.g. `SRR0`, `r3`, `f12`.
pub fn register_name(index: usize) -> Option<String> {
    match index {
        0..=6 => Some(SPECIAL_NAMES[index].to_string()),
        GPR_BASE..=38 => Some(format!("r{}", index - GPR_BASE)),
        LR => Some("LR".to_string()),
        FPR_BASE..=71 => Some(format!("f{}", index - FPR_BASE)),
        _ => None,
    }
}

/// Index of a register by name, ignoring case.
pub fn register_index(name: &str) -> Option<usize> {
    let name = name.trim();
    if let Some(i) = SPECIAL_NAMES.iter().position(|s| s.eq_ignore_ascii_case(name)) {
        return Some(i);
    }
    if name.eq_ignore_ascii_case("LR") {
        return Some(LR);
    }
    let (base, number) = match name.as_bytes().first()? {
        b'r' | b'R' => (GPR_BASE, &name[1..]),
        b'f' | b'F' => (FPR_BASE, &name[1..]),
        _ => return None,
    };
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: usize = number.parse().ok()?;
    (n < 32).then_some(base + n)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSnapshot([u32; REGISTER_COUNT]);

impl Default for RegisterSnapshot {
    fn default() -> Self {
        Self([0; REGISTER_COUNT])
    }
}

impl RegisterSnapshot {
    pub fn from_values(values: [u32; REGISTER_COUNT]) -> Self {
        Self(values)
    }

    /// Decode a context block. Anything but exactly 0x120 bytes is rejected.
    pub fn from_context_block(block: &[u8]) -> Result<Self> {
        if block.len() != CONTEXT_BLOCK_SIZE as usize {
            return Err(GeckoError::with_detail(
                ErrorCode::RegisterStreamSizeInvalid,
                format!("{} bytes", block.len()),
            ));
        }
        let mut values = [0u32; REGISTER_COUNT];
        for (i, value) in values.iter_mut().enumerate() {
            *value = read_be_u32(block, i * 4).unwrap_or(0);
        }
        Ok(Self(values))
    }

    pub fn to_context_block(&self) -> Vec<u8> {
        self.0.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    pub fn values(&self) -> &[u32; REGISTER_COUNT] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.0.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: u32) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
    }

    #[inline]
    pub fn gpr(&self, n: usize) -> u32 {
        self.0[GPR_BASE + (n & 31)]
    }

    #[inline]
    pub fn fpr(&self, n: usize) -> f32 {
        f32::from_bits(self.0[FPR_BASE + (n & 31)])
    }

    /// Address of the instruction the thread stopped at
    pub fn pc(&self) -> u32 {
        self.0[SRR0]
    }

    pub fn sp(&self) -> u32 {
        self.gpr(1)
    }

    pub fn lr(&self) -> u32 {
        self.0[LR]
    }

    pub fn cr(&self) -> u32 {
        self.0[CR]
    }
}

impl fmt::Display for RegisterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            let name = register_name(i).unwrap_or_default();
            write!(f, "{:>4}: {:08X}", name, value)?;
            f.write_str(if i % 4 == 3 { "\n" } else { "  " })?;
        }
        Ok(())
    }
}
