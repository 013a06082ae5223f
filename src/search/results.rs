//! Result paging, formatting and sorting.

use super::comparison::SearchSize;
use crate::memory::MemorySnapshot;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Rows per result page
pub const PAGE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Radix {
    #[default]
    Hex,
    Decimal,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortColumn {
    Address,
    Old,
    New,
    Delta,
}

/// Active sort column and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortState {
    pub column: Option<SortColumn>,
    pub descending: bool,
}

impl SortState {
    /// Select `column`; selecting the active column again flips the direction.
    pub fn select(&mut self, column: SortColumn) {
        if self.column == Some(column) {
            self.descending = !self.descending;
        } else {
            self.column = Some(column);
            self.descending = false;
        }
    }
}

/// One formatted result line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub address: String,
    pub old: String,
    pub new: String,
    pub delta: String,
}

pub fn page_count(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE)
}

/// The addresses on `page`, empty past the end.
pub fn page_slice(results: &[u32], page: usize) -> &[u32] {
    let start = page.saturating_mul(PAGE_SIZE).min(results.len());
    let end = (start + PAGE_SIZE).min(results.len());
    &results[start..end]
}

pub fn format_value(value: u32, size: SearchSize, radix: Radix) -> String {
    match radix {
        Radix::Float => format!("{}", f32::from_bits(value)),
        Radix::Decimal if size.is_float() => format!("{}", f32::from_bits(value)),
        Radix::Decimal => value.to_string(),
        Radix::Hex => match size.bytes() {
            1 => format!("{:02X}", value),
            2 => format!("{:04X}", value),
            _ => format!("{:08X}", value),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Delta {
    Int(i64),
    Float(f32),
}

fn delta(new: u32, old: u32, size: SearchSize) -> Delta {
    if size.is_float() {
        Delta::Float(f32::from_bits(new) - f32::from_bits(old))
    } else {
        Delta::Int(new as i64 - old as i64)
    }
}

fn format_delta(delta: Delta, size: SearchSize, radix: Radix) -> String {
    match (delta, radix) {
        (Delta::Float(d), _) => format!("{}", d),
        (Delta::Int(d), Radix::Hex) => {
            let sign = if d < 0 { "-" } else { "" };
            match size.bytes() {
                1 => format!("{}{:02X}", sign, d.unsigned_abs()),
                2 => format!("{}{:04X}", sign, d.unsigned_abs()),
                _ => format!("{}{:08X}", sign, d.unsigned_abs()),
            }
        }
        (Delta::Int(d), _) => d.to_string(),
    }
}

/// Format one result row from the current and previous snapshots.
pub fn format_row(
    address: u32,
    new: &MemorySnapshot,
    old: Option<&MemorySnapshot>,
    size: SearchSize,
    radix: Radix,
) -> ResultRow {
    let current = new.read_sized(address, size.bytes());
    let previous = old.map(|s| s.read_sized(address, size.bytes()));
    ResultRow {
        address: format!("{:08X}", address),
        old: previous.map_or_else(String::new, |v| format_value(v, size, radix)),
        new: format_value(current, size, radix),
        delta: previous.map_or_else(String::new, |p| {
            format_delta(delta(current, p, size), size, radix)
        }),
    }
}

fn compare_values(a: u32, b: u32, size: SearchSize) -> Ordering {
    if size.is_float() {
        f32::from_bits(a)
            .partial_cmp(&f32::from_bits(b))
            .unwrap_or(Ordering::Equal)
    } else {
        a.cmp(&b)
    }
}

/// Sort `results` by a column. Ties, including NaN floats, fall back to
/// ascending address whatever the direction.
pub fn sort_results(
    results: &mut [u32],
    state: SortState,
    new: &MemorySnapshot,
    old: Option<&MemorySnapshot>,
    size: SearchSize,
) {
    let Some(column) = state.column else {
        return;
    };
    let width = size.bytes();
    let old_value = |a: u32| old.map_or(0, |s| s.read_sized(a, width));
    results.sort_by(|&a, &b| {
        let primary = match column {
            SortColumn::Address => a.cmp(&b),
            SortColumn::New => compare_values(new.read_sized(a, width), new.read_sized(b, width), size),
            SortColumn::Old => compare_values(old_value(a), old_value(b), size),
            SortColumn::Delta => {
                let da = delta(new.read_sized(a, width), old_value(a), size);
                let db = delta(new.read_sized(b, width), old_value(b), size);
                da.partial_cmp(&db).unwrap_or(Ordering::Equal)
            }
        };
        let primary = if state.descending {
            primary.reverse()
        } else {
            primary
        };
        primary.then(a.cmp(&b))
    });
}
