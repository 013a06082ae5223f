//! Search predicates and the rule that combines them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonType {
    Equal,
    NotEqual,
    Lower,
    LowerEqual,
    Greater,
    GreaterEqual,
    /// Operands differ by exactly the value
    DifferentBy,
    /// Operands differ by less than the value
    DifferentByLess,
    /// Operands differ by more than the value
    DifferentByMore,
}

impl ComparisonType {
    fn is_greater(self) -> bool {
        matches!(self, ComparisonType::Greater | ComparisonType::GreaterEqual)
    }

    fn is_lower(self) -> bool {
        matches!(self, ComparisonType::Lower | ComparisonType::LowerEqual)
    }
}

/// What the current value is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// The literal value
    Exact,
    /// The previous generation
    Unknown,
    /// The generation before the previous one
    Old,
    /// Compare the change since the previous generation against the value
    Diff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchComparisonInfo {
    pub comparison: ComparisonType,
    pub value: u32,
    pub reference: ReferenceKind,
}

impl SearchComparisonInfo {
    pub fn new(comparison: ComparisonType, value: u32, reference: ReferenceKind) -> Self {
        Self {
            comparison,
            value,
            reference,
        }
    }

    pub fn exact(comparison: ComparisonType, value: u32) -> Self {
        Self::new(comparison, value, ReferenceKind::Exact)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SearchSize {
    Byte,
    Half,
    #[default]
    Word,
    /// 32-bit IEEE-754 float
    Single,
}

impl SearchSize {
    pub fn bytes(self) -> u32 {
        match self {
            SearchSize::Byte => 1,
            SearchSize::Half => 2,
            SearchSize::Word | SearchSize::Single => 4,
        }
    }

    pub fn is_float(self) -> bool {
        self == SearchSize::Single
    }

    /// Reinterpret the low bits of `value` as a signed number of this size.
    pub fn sign_extend(self, value: u32) -> i64 {
        match self {
            SearchSize::Byte => value as u8 as i8 as i64,
            SearchSize::Half => value as u16 as i16 as i64,
            SearchSize::Word | SearchSize::Single => value as i32 as i64,
        }
    }
}

/// Values read for one candidate address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub new: u32,
    /// Previous generation, when there is one
    pub old: Option<u32>,
    /// Generation before the previous one, when there is one
    pub undo: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
enum Operands {
    Int { left: i64, right: i64, by: i64 },
    Float { left: f32, right: f32, by: f32 },
}

fn resolve(info: &SearchComparisonInfo, sample: &Sample, size: SearchSize) -> Option<Operands> {
    let right = match info.reference {
        ReferenceKind::Exact | ReferenceKind::Diff => info.value,
        ReferenceKind::Unknown => sample.old?,
        ReferenceKind::Old => sample.undo?,
    };
    if size.is_float() {
        let new = f32::from_bits(sample.new);
        let left = match info.reference {
            ReferenceKind::Diff => new - f32::from_bits(sample.old?),
            _ => new,
        };
        return Some(Operands::Float {
            left,
            right: f32::from_bits(right),
            by: f32::from_bits(info.value),
        });
    }
    let (left, right) = match info.reference {
        ReferenceKind::Diff => (
            sample.new as i64 - sample.old? as i64,
            size.sign_extend(right),
        ),
        _ => (sample.new as i64, right as i64),
    };
    Some(Operands::Int {
        left,
        right,
        by: info.value as i64,
    })
}

fn compare<T>(comparison: ComparisonType, left: T, right: T, by: T, distance: T) -> bool
where
    T: PartialOrd + PartialEq,
{
    match comparison {
        ComparisonType::Equal => left == right,
        ComparisonType::NotEqual => left != right,
        ComparisonType::Lower => left < right,
        ComparisonType::LowerEqual => left <= right,
        ComparisonType::Greater => left > right,
        ComparisonType::GreaterEqual => left >= right,
        ComparisonType::DifferentBy => distance == by,
        ComparisonType::DifferentByLess => distance < by,
        ComparisonType::DifferentByMore => distance > by,
    }
}

/// Apply one comparison to a sample. A missing reference generation or a
/// NaN operand never matches.
pub fn matches(info: &SearchComparisonInfo, sample: &Sample, size: SearchSize) -> bool {
    match resolve(info, sample, size) {
        None => false,
        Some(Operands::Int { left, right, by }) => {
            compare(info.comparison, left, right, by, (left - right).abs())
        }
        Some(Operands::Float { left, right, by }) => {
            if left.is_nan() || right.is_nan() {
                return false;
            }
            compare(info.comparison, left, right, by, (left - right).abs())
        }
    }
}

fn threshold(info: &SearchComparisonInfo, size: SearchSize) -> f64 {
    match (size.is_float(), info.reference) {
        (true, _) => f32::from_bits(info.value) as f64,
        (false, ReferenceKind::Diff) => size.sign_extend(info.value) as f64,
        (false, _) => info.value as f64,
    }
}

/// Decide whether a sample passes a list of comparisons.
///
/// A matching `Equal` accepts at once. Greater-family and Lower-family
/// comparisons are each ANDed within their family; when both families are
/// present and the greater threshold lies above the lower one the two
/// halves are ORed ("outside the range"), otherwise ANDed ("inside the
/// range"). Every other comparison must match.
pub fn evaluate(comparisons: &[SearchComparisonInfo], sample: &Sample, size: SearchSize) -> bool {
    let mut greater: Option<(bool, f64)> = None;
    let mut lower: Option<(bool, f64)> = None;
    let mut rest = true;

    for info in comparisons {
        let matched = matches(info, sample, size);
        if info.comparison == ComparisonType::Equal && matched {
            return true;
        }
        let limit = threshold(info, size);
        if info.comparison.is_greater() {
            greater = Some(match greater {
                None => (matched, limit),
                Some((m, t)) => (m && matched, t.max(limit)),
            });
        } else if info.comparison.is_lower() {
            lower = Some(match lower {
                None => (matched, limit),
                Some((m, t)) => (m && matched, t.min(limit)),
            });
        } else {
            rest &= matched;
        }
    }

    if !rest {
        return false;
    }
    match (greater, lower) {
        (Some((g, above)), Some((l, below))) if above > below => g || l,
        (Some((g, _)), Some((l, _))) => g && l,
        (Some((g, _)), None) => g,
        (None, Some((l, _))) => l,
        (None, None) => true,
    }
}
