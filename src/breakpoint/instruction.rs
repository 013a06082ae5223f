//! Instruction Analysis
//!
//! Decoding is left to a [`Disassembler`], typically an external
//! `objdump`-style tool, which turns an instruction word into text such as
//! `lwz r3,16(r31)` or `bne- cr7,0x80001234`. This module reads that text
//! against the register file of the stopped thread to answer three
//! questions: is this a call, is this conditional branch taken, and which
//! address does this load or store touch.

use super::registers::RegisterSnapshot;

/// Turns an instruction word into assembler text.
pub trait Disassembler: Send {
    fn disassemble(&mut self, address: u32, word: u32) -> Option<String>;
}

impl<F> Disassembler for F
where
    F: FnMut(u32, u32) -> Option<String> + Send,
{
    fn disassemble(&mut self, address: u32, word: u32) -> Option<String> {
        self(address, word)
    }
}

const CALLS: [&str; 4] = ["bl", "bctrl", "blrl", "bla"];
const CONDITIONAL_BRANCHES: [&str; 6] = ["blt", "ble", "beq", "bge", "bgt", "bne"];
/// `l`-prefixed mnemonics that do not touch memory
const NOT_LOADS: [&str; 3] = ["li", "lis", "la"];

// Bits of one condition register field
const CR_LT: u32 = 8;
const CR_GT: u32 = 4;
const CR_EQ: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: u32,
    pub word: u32,
    pub mnemonic: String,
    pub operands: Vec<String>,
}

impl Instruction {
    /// Split disassembler text into mnemonic and comma-separated operands.
    pub fn parse(address: u32, word: u32, text: &str) -> Option<Self> {
        let text = text.trim();
        let (mnemonic, rest) = match text.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, rest.trim()),
            None => (text, ""),
        };
        if mnemonic.is_empty() {
            return None;
        }
        let operands = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(|op| op.trim().to_string()).collect()
        };
        Some(Self {
            address,
            word,
            mnemonic: mnemonic.to_ascii_lowercase(),
            operands,
        })
    }

    /// Mnemonic without the `+`/`-` branch prediction hint.
    fn base_mnemonic(&self) -> &str {
        self.mnemonic.trim_end_matches(['+', '-'])
    }

    pub fn is_call(&self) -> bool {
        CALLS.contains(&self.base_mnemonic())
    }

    /// Whether a conditional branch is taken under `registers`; `None` for
    /// anything else.
    pub fn branch_taken(&self, registers: &RegisterSnapshot) -> Option<bool> {
        let base = self.base_mnemonic();
        let condition = CONDITIONAL_BRANCHES
            .iter()
            .find(|&&b| base == b || base.strip_prefix(b).is_some_and(|s| s == "lr" || s == "ctr"))?;

        let field = match self.operands.first() {
            Some(op) if op.starts_with("cr") => op[2..].parse::<u32>().ok().filter(|&f| f < 8)?,
            _ => 0,
        };
        let bits = (registers.cr() >> (28 - 4 * field)) & 0xF;

        Some(match *condition {
            "blt" => bits & CR_LT != 0,
            "ble" => bits & CR_GT == 0,
            "beq" => bits & CR_EQ != 0,
            "bge" => bits & CR_LT == 0,
            "bgt" => bits & CR_GT != 0,
            _ => bits & CR_EQ == 0,
        })
    }

    /// Address touched by a load or store, from `d(rA)` or indexed `rA,rB`
    /// operands. `rA` = r0 reads as zero.
    pub fn effective_address(&self, registers: &RegisterSnapshot) -> Option<u32> {
        let base = self.base_mnemonic();
        let is_memory_op = (base.starts_with('l') && !NOT_LOADS.contains(&base)) || base.starts_with("st");
        if !is_memory_op {
            return None;
        }

        let last = self.operands.last()?;
        if let Some((displacement, register)) = last.split_once('(') {
            let ra = parse_gpr(register.trim_end_matches(')'))?;
            let displacement = parse_displacement(displacement)?;
            return Some(base_register(registers, ra).wrapping_add(displacement as u32));
        }

        if base.ends_with('x') && self.operands.len() == 3 {
            let ra = parse_gpr(&self.operands[1])?;
            let rb = parse_gpr(&self.operands[2])?;
            return Some(base_register(registers, ra).wrapping_add(registers.gpr(rb)));
        }
        None
    }
}

fn base_register(registers: &RegisterSnapshot, ra: usize) -> u32 {
    if ra == 0 {
        0
    } else {
        registers.gpr(ra)
    }
}

/// `r31` or bare `31`
fn parse_gpr(text: &str) -> Option<usize> {
    let text = text.trim();
    let digits = text.strip_prefix('r').unwrap_or(text);
    digits.parse::<usize>().ok().filter(|&n| n < 32)
}

fn parse_displacement(text: &str) -> Option<i32> {
    let text = text.trim();
    if text.is_empty() {
        return Some(0);
    }
    let (negative, magnitude) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match magnitude.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => magnitude.parse::<i64>().ok()?,
    };
    let value = if negative { -value } else { value };
    i32::try_from(value).ok()
}

/// What the breakpoint engine reports about the stopped instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionAnalysis {
    pub instruction: Instruction,
    pub is_call: bool,
    pub branch_taken: Option<bool>,
    pub effective_address: Option<u32>,
}

impl InstructionAnalysis {
    pub fn new(instruction: Instruction, registers: &RegisterSnapshot) -> Self {
        Self {
            is_call: instruction.is_call(),
            branch_taken: instruction.branch_taken(registers),
            effective_address: instruction.effective_address(registers),
            instruction,
        }
    }
}

pub fn analyze(
    disassembler: &mut dyn Disassembler,
    address: u32,
    word: u32,
    registers: &RegisterSnapshot,
) -> Option<InstructionAnalysis> {
    let text = disassembler.disassemble(address, word)?;
    let instruction = Instruction::parse(address, word, &text)?;
    Some(InstructionAnalysis::new(instruction, registers))
}
