//! Call stack reconstruction from the back chain.
//!
//! Every frame starts with the caller's stack pointer, and the caller's
//! frame keeps the saved link register one long above it:
//!
//! ```text
//! [sp]          -> next_sp
//! [next_sp + 4] -> return address
//! ```

use super::registers::RegisterSnapshot;
use crate::error::Result;
use crate::gecko::GeckoClient;
use crate::memory::{AddressClass, ValidationPolicy};

pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    pub stack_pointer: u32,
    pub return_address: u32,
}

/// Walk the back chain from r1. The walk stops at a null or unmapped
/// pointer, at a return address outside executable memory, or when a link
/// fails to move up the stack.
pub fn walk(client: &mut GeckoClient, registers: &RegisterSnapshot) -> Result<Vec<StackFrame>> {
    let regions = client.regions().clone();
    let is_stack = |address: u32| address != 0 && regions.classify(address) == AddressClass::ReadWrite;

    let mut frames = Vec::new();
    let mut sp = registers.sp();
    while frames.len() < MAX_DEPTH && is_stack(sp) {
        let Some(next_sp) = client.peek_checked(sp, ValidationPolicy::Strict)? else {
            break;
        };
        if !is_stack(next_sp) || next_sp <= sp {
            break;
        }
        let Some(return_address) = client.peek_checked(next_sp.wrapping_add(4), ValidationPolicy::Strict)? else {
            break;
        };
        if regions.classify(return_address) != AddressClass::Executable {
            break;
        }
        frames.push(StackFrame {
            stack_pointer: next_sp,
            return_address,
        });
        sp = next_sp;
    }
    log::trace!("call stack from {:08X}: {} frames", registers.sp(), frames.len());
    Ok(frames)
}
