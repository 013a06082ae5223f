//! Breakpoints
//!
//! Hardware breakpoints on the live target, conditional filtering of hits
//! against the saved register file, stepping and call stacks.

pub mod condition;
pub mod engine;
pub mod instruction;
pub mod registers;
pub mod stack;

pub use condition::{
    conditions_to_text, evaluate_groups, parse_conditions, BreakpointCondition, ConditionComparison,
    ConditionParseError, Operand,
};
pub use engine::{BreakpointEngine, BreakpointEvent, BreakpointHit, BreakpointSpec, EngineState};
pub use instruction::{Disassembler, Instruction, InstructionAnalysis};
pub use registers::{register_index, register_name, RegisterSnapshot};
pub use stack::StackFrame;

use crate::error::GeckoError;

#[derive(Debug, thiserror::Error)]
pub enum BreakpointError {
    #[error(transparent)]
    Gecko(#[from] GeckoError),
    #[error("a breakpoint is already armed")]
    AlreadyArmed,
    #[error("the target is not stopped at a breakpoint")]
    NotStopped,
    #[error("cannot start breakpoint waiter: {0}")]
    Spawn(std::io::Error),
}

#[cfg(test)]
mod tests_engine;
