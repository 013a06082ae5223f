//! Breakpoint Conditions
//!
//! A condition compares one register, or the long at the memory operand of
//! the stopped instruction ("VoA", value at address), against a constant.
//! Conditions sharing a group number must all hold; a hit is reported when
//! any group holds. An empty list holds for every hit.
//!
//! Text form, one condition per line: `<group>: <register> <op> <hex>`,
//! e.g. `1: r3 == 0000002A` or `2: VoA >= 80000000`.

use super::registers::{register_index, register_name, RegisterSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const VALUE_AT_ADDRESS: &str = "VoA";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Register(usize),
    ValueAtAddress,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(i) => f.write_str(&register_name(*i).unwrap_or_else(|| "?".into())),
            Operand::ValueAtAddress => f.write_str(VALUE_AT_ADDRESS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionComparison {
    Equal,
    NotEqual,
    Lower,
    LowerEqual,
    Greater,
    GreaterEqual,
}

impl ConditionComparison {
    pub fn symbol(self) -> &'static str {
        match self {
            ConditionComparison::Equal => "==",
            ConditionComparison::NotEqual => "!=",
            ConditionComparison::Lower => "<",
            ConditionComparison::LowerEqual => "<=",
            ConditionComparison::Greater => ">",
            ConditionComparison::GreaterEqual => ">=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "==" => ConditionComparison::Equal,
            "!=" => ConditionComparison::NotEqual,
            "<" => ConditionComparison::Lower,
            "<=" => ConditionComparison::LowerEqual,
            ">" => ConditionComparison::Greater,
            ">=" => ConditionComparison::GreaterEqual,
            _ => return None,
        })
    }

    /// Unsigned comparison of `left` against `right`.
    pub fn holds(self, left: u32, right: u32) -> bool {
        match self {
            ConditionComparison::Equal => left == right,
            ConditionComparison::NotEqual => left != right,
            ConditionComparison::Lower => left < right,
            ConditionComparison::LowerEqual => left <= right,
            ConditionComparison::Greater => left > right,
            ConditionComparison::GreaterEqual => left >= right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointCondition {
    pub operand: Operand,
    pub comparison: ConditionComparison,
    pub value: u32,
    pub group: u32,
}

impl BreakpointCondition {
    pub fn new(operand: Operand, comparison: ConditionComparison, value: u32, group: u32) -> Self {
        Self {
            operand,
            comparison,
            value,
            group,
        }
    }

    /// `value_at_address` is the long at the stopped instruction's memory
    /// operand; a VoA condition never holds without one.
    pub fn matches(&self, registers: &RegisterSnapshot, value_at_address: Option<u32>) -> bool {
        let left = match self.operand {
            Operand::Register(i) => registers.get(i),
            Operand::ValueAtAddress => value_at_address,
        };
        left.is_some_and(|left| self.comparison.holds(left, self.value))
    }
}

impl fmt::Display for BreakpointCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} {} {:08X}",
            self.group,
            self.operand,
            self.comparison.symbol(),
            self.value
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionParseError {
    #[error("missing group separator")]
    MissingGroup,
    #[error("bad group number {0:?}")]
    BadGroup(String),
    #[error("expected `<register> <op> <value>`")]
    WrongFieldCount,
    #[error("unknown register {0:?}")]
    UnknownRegister(String),
    #[error("unknown comparison {0:?}")]
    UnknownComparison(String),
    #[error("bad hex value {0:?}")]
    BadValue(String),
}

impl FromStr for BreakpointCondition {
    type Err = ConditionParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (group, rest) = line.split_once(':').ok_or(ConditionParseError::MissingGroup)?;
        let group = group
            .trim()
            .parse::<u32>()
            .map_err(|_| ConditionParseError::BadGroup(group.trim().to_string()))?;

        let fields: Vec<&str> = rest.split_whitespace().collect();
        let [operand, op, value] = fields[..] else {
            return Err(ConditionParseError::WrongFieldCount);
        };

        let operand = if operand.eq_ignore_ascii_case(VALUE_AT_ADDRESS) {
            Operand::ValueAtAddress
        } else {
            register_index(operand)
                .map(Operand::Register)
                .ok_or_else(|| ConditionParseError::UnknownRegister(operand.to_string()))?
        };
        let comparison = ConditionComparison::from_symbol(op)
            .ok_or_else(|| ConditionParseError::UnknownComparison(op.to_string()))?;
        let digits = value.trim_start_matches("0x").trim_start_matches("0X");
        let value = u32::from_str_radix(digits, 16)
            .map_err(|_| ConditionParseError::BadValue(value.to_string()))?;

        Ok(Self::new(operand, comparison, value, group))
    }
}

/// Parse one condition per line. Blank and malformed lines are dropped.
pub fn parse_conditions(text: &str) -> Vec<BreakpointCondition> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match line.parse() {
            Ok(condition) => Some(condition),
            Err(e) => {
                log::debug!("skipping condition {:?}: {}", line, e);
                None
            }
        })
        .collect()
}

pub fn conditions_to_text(conditions: &[BreakpointCondition]) -> String {
    conditions.iter().map(|c| format!("{}\n", c)).collect()
}

/// OR across groups of the AND within each group.
pub fn evaluate_groups(
    conditions: &[BreakpointCondition],
    registers: &RegisterSnapshot,
    value_at_address: Option<u32>,
) -> bool {
    if conditions.is_empty() {
        return true;
    }
    let mut groups: BTreeMap<u32, bool> = BTreeMap::new();
    for condition in conditions {
        let holds = condition.matches(registers, value_at_address);
        groups
            .entry(condition.group)
            .and_modify(|all| *all &= holds)
            .or_insert(holds);
    }
    groups.values().any(|&all| all)
}
