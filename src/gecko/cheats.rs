//! Cheat code lists.
//!
//! Text form is one code per line, `AAAAAAAA VVVVVVVV`, with a leading `-`
//! marking a disabled line. The binary stream sent to the code handler is
//! the enabled codes wrapped in a fixed header and terminator.

use crate::codec::byte_utils::{push_be_u32, read_be_u32};
use crate::error::{ErrorCode, GeckoError, Result};
use std::fmt;

/// Header every code handler stream starts with
pub const CHEAT_MAGIC: [u8; 8] = [0x00, 0xD0, 0xC0, 0xDE, 0x00, 0xD0, 0xC0, 0xDE];
/// Terminator every code handler stream ends with
pub const CHEAT_TERMINATOR: [u8; 8] = [0xF0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

/// One code line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheatLine {
    pub address: u32,
    pub value: u32,
    pub enabled: bool,
}

impl fmt::Display for CheatLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.enabled {
            f.write_str("-")?;
        }
        write!(f, "{:08X} {:08X}", self.address, self.value)
    }
}

/// An ordered list of code lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheatList {
    pub lines: Vec<CheatLine>,
}

impl CheatList {
    /// Parse the text form. Blank lines are ignored; anything else that is
    /// not a pair of 8-digit hex words is rejected with its line number.
    pub fn parse(text: &str) -> std::result::Result<Self, CheatParseError> {
        let mut lines = Vec::new();
        for (number, raw) in text.lines().enumerate() {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let (enabled, body) = match trimmed.strip_prefix('-') {
                Some(rest) => (false, rest.trim_start()),
                None => (true, trimmed),
            };
            let mut words = body.split_whitespace();
            let (Some(a), Some(v), None) = (words.next(), words.next(), words.next()) else {
                return Err(CheatParseError { line: number + 1 });
            };
            let parse_word = |w: &str| {
                if w.len() == 8 {
                    u32::from_str_radix(w, 16).ok()
                } else {
                    None
                }
            };
            match (parse_word(a), parse_word(v)) {
                (Some(address), Some(value)) => lines.push(CheatLine {
                    address,
                    value,
                    enabled,
                }),
                _ => return Err(CheatParseError { line: number + 1 }),
            }
        }
        Ok(Self { lines })
    }

    pub fn to_text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn active(&self) -> impl Iterator<Item = &CheatLine> {
        self.lines.iter().filter(|l| l.enabled)
    }

    /// Build the code handler stream from the enabled lines.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.lines.len() * 8);
        out.extend_from_slice(&CHEAT_MAGIC);
        for line in self.active() {
            push_be_u32(&mut out, line.address);
            push_be_u32(&mut out, line.value);
        }
        out.extend_from_slice(&CHEAT_TERMINATOR);
        out
    }

    /// Read a code handler stream back into enabled lines, dropping the
    /// header and terminator when present.
    pub fn decode(stream: &[u8]) -> Result<Self> {
        if stream.len() % 8 != 0 {
            return Err(ErrorCode::CheatStreamSizeInvalid.into());
        }
        let mut body = stream;
        if body.starts_with(&CHEAT_MAGIC) {
            body = &body[8..];
        }
        if body.ends_with(&CHEAT_TERMINATOR) {
            body = &body[..body.len() - 8];
        }
        let lines = body
            .chunks_exact(8)
            .filter_map(|pair| {
                Some(CheatLine {
                    address: read_be_u32(pair, 0)?,
                    value: read_be_u32(pair, 4)?,
                    enabled: true,
                })
            })
            .collect();
        Ok(Self { lines })
    }
}

/// A text line that is not a valid code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("malformed cheat code on line {line}")]
pub struct CheatParseError {
    pub line: usize,
}

/// Validate a raw stream and add the header and terminator if missing.
pub fn frame_cheat_stream(stream: &[u8]) -> Result<Vec<u8>> {
    if stream.len() % 8 != 0 {
        return Err(GeckoError::with_detail(
            ErrorCode::CheatStreamSizeInvalid,
            format!("{} bytes", stream.len()),
        ));
    }
    let mut framed = Vec::with_capacity(stream.len() + 16);
    if !stream.starts_with(&CHEAT_MAGIC) {
        framed.extend_from_slice(&CHEAT_MAGIC);
    }
    framed.extend_from_slice(stream);
    if !stream.ends_with(&CHEAT_TERMINATOR) {
        framed.extend_from_slice(&CHEAT_TERMINATOR);
    }
    Ok(framed)
}
