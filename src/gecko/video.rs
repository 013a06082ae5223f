//! Video interface registers and framebuffer capture.
//!
//! Only the registers needed to locate the scanned-out frame are decoded:
//!
//! | Address    | Register | Bits used                                   |
//! |:-----------|:---------|:--------------------------------------------|
//! | 0xCC002000 | VTR      | 4-13: active lines per field                |
//! | 0xCC002002 | DCR      | 2: progressive scan                         |
//! | 0xCC00201C | TFBL     | 0-23: top field base, 28: base is `>> 5`    |
//! | 0xCC002048 | HSW      | 8-14: line width in 16-pixel units          |
//!
//! The frame is YUV 4:2:2 (`Y0 U Y1 V`, two bytes per pixel). Turning it
//! into an image file is left to the caller.

use crate::error::{ErrorCode, GeckoError, Result};
use crate::memory::MemorySnapshot;

/// First video interface register
pub const VI_BASE: u32 = 0xCC00_2000;
/// Bytes of register space read per capture
pub const VI_REGISTERS_LEN: u32 = 0x80;

pub const VI_VTR: u32 = VI_BASE;
pub const VI_DCR: u32 = VI_BASE + 0x02;
pub const VI_TFBL: u32 = VI_BASE + 0x1C;
pub const VI_HSW: u32 = VI_BASE + 0x48;

const DCR_PROGRESSIVE: u16 = 1 << 2;
const TFBL_PAGE_OFFSET: u32 = 1 << 28;

pub const BYTES_PER_PIXEL: u32 = 2;

/// Frame geometry as programmed into the video interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMode {
    pub framebuffer: u32,
    pub width: u32,
    pub height: u32,
    pub progressive: bool,
}

impl VideoMode {
    /// Decode the mode from a capture of the register block.
    pub fn from_registers(registers: &MemorySnapshot) -> Result<Self> {
        if !registers.contains(VI_BASE, VI_REGISTERS_LEN) {
            return Err(GeckoError::with_detail(
                ErrorCode::InvalidReply,
                "register capture does not cover the video interface",
            ));
        }
        let lines_per_field = u32::from(registers.read_u16(VI_VTR) >> 4) & 0x3FF;
        let progressive = registers.read_u16(VI_DCR) & DCR_PROGRESSIVE != 0;
        let tfbl = registers.read_u32(VI_TFBL);
        let width = u32::from((registers.read_u16(VI_HSW) >> 8) & 0x7F) * 16;

        let mut framebuffer = tfbl & 0x00FF_FFFF;
        if tfbl & TFBL_PAGE_OFFSET != 0 {
            framebuffer <<= 5;
        }
        let height = if progressive {
            lines_per_field
        } else {
            lines_per_field * 2
        };

        if width == 0 || height == 0 || framebuffer == 0 {
            return Err(GeckoError::with_detail(
                ErrorCode::InvalidReply,
                format!(
                    "video interface is not scanning out ({}x{} at {:08X})",
                    width, height, framebuffer
                ),
            ));
        }
        Ok(Self {
            framebuffer,
            width,
            height,
            progressive,
        })
    }

    pub fn stride(&self) -> u32 {
        self.width * BYTES_PER_PIXEL
    }

    pub fn frame_len(&self) -> u32 {
        self.stride() * self.height
    }
}

/// One captured frame, raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub mode: VideoMode,
    pub data: Vec<u8>,
}

impl Screenshot {
    /// The `Y0 U Y1 V` group holding pixel `(x, y)`, if inside the frame.
    pub fn pixel_pair(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.mode.width || y >= self.mode.height {
            return None;
        }
        let offset = (y * self.mode.stride() + (x & !1) * BYTES_PER_PIXEL) as usize;
        let group = self.data.get(offset..offset + 4)?;
        Some([group[0], group[1], group[2], group[3]])
    }
}
