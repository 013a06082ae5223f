//! Command codes, reply sentinels and the small enums carried on the wire.

/// Largest payload moved per chunk
pub const MAX_CHUNK: u32 = 0x5000;

pub const CMD_POKE08: u8 = 0x01;
pub const CMD_POKE16: u8 = 0x02;
pub const CMD_POKEMEM32: u8 = 0x03;
pub const CMD_DUMP: u8 = 0x04;
pub const CMD_PAUSE: u8 = 0x06;
pub const CMD_RESUME: u8 = 0x07;
pub const CMD_BREAKPOINT: u8 = 0x09;
pub const CMD_BREAKPOINT_EXACT: u8 = 0x0A;
pub const CMD_WRITE_KERNEL: u8 = 0x0B;
pub const CMD_READ_KERNEL: u8 = 0x0C;
pub const CMD_CANCEL_BREAKPOINT: u8 = 0x38;
pub const CMD_SEND_CHEATS: u8 = 0x40;
pub const CMD_UPLOAD: u8 = 0x41;
pub const CMD_HOOK: u8 = 0x42;
pub const CMD_STEP: u8 = 0x44;
pub const CMD_STATUS: u8 = 0x50;
pub const CMD_EXEC_CHEATS: u8 = 0x60;
pub const CMD_RPC: u8 = 0x70;
pub const CMD_BREAKPOINT_EXEC: u8 = 0x89;
pub const CMD_VERSION: u8 = 0x99;
pub const CMD_OS_VERSION: u8 = 0x9A;

pub const ACK: u8 = 0xAA;
pub const RETRY: u8 = 0xBB;
pub const FAIL: u8 = 0xCC;
/// Chunk status: the chunk is all zeros and no payload follows
pub const ZERO_BLOCK: u8 = 0xB0;
/// Chunk status: a payload follows
pub const DATA_BLOCK: u8 = 0xBD;
pub const BREAKPOINT_HIT: u8 = 0x11;

/// Execution state reported by the status command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Running,
    Paused,
    Breakpoint,
    Loader,
    Unknown,
}

impl From<u8> for TargetStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => TargetStatus::Running,
            1 => TargetStatus::Paused,
            2 => TargetStatus::Breakpoint,
            3 => TargetStatus::Loader,
            _ => TargetStatus::Unknown,
        }
    }
}

impl TargetStatus {
    pub fn to_byte(self) -> u8 {
        match self {
            TargetStatus::Running => 0,
            TargetStatus::Paused => 1,
            TargetStatus::Breakpoint => 2,
            TargetStatus::Loader => 3,
            TargetStatus::Unknown => 0xFF,
        }
    }
}

/// What access triggers a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BreakpointKind {
    Read,
    Write,
    ReadWrite,
    Execute,
}

impl BreakpointKind {
    /// Address with the low bits replaced by the hardware match flags.
    ///
    /// Data breakpoints match on 8-byte granules, instruction breakpoints on
    /// 4-byte words.
    pub fn flagged_address(self, address: u32) -> u32 {
        match self {
            BreakpointKind::Read => (address & !7) | 5,
            BreakpointKind::Write => (address & !7) | 6,
            BreakpointKind::ReadWrite => (address & !7) | 7,
            BreakpointKind::Execute => (address & !3) | 3,
        }
    }

    /// Recover the kind from a flagged address.
    pub fn from_flags(flagged: u32, execute: bool) -> Option<Self> {
        if execute {
            return Some(BreakpointKind::Execute);
        }
        match flagged & 7 {
            5 => Some(BreakpointKind::Read),
            6 => Some(BreakpointKind::Write),
            7 => Some(BreakpointKind::ReadWrite),
            _ => None,
        }
    }
}

/// Where the code handler is hooked into the running title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    VideoInterrupt = 0,
    Controller = 1,
}

impl HookType {
    pub fn command(self) -> u8 {
        CMD_HOOK + self as u8
    }
}
