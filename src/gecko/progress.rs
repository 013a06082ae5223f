//! Transfer progress and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One progress report from a chunked transfer.
///
/// Reports arrive in strictly increasing address order, and every transfer
/// that finishes ends with a report where `transferred == length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Address of the chunk being transferred
    pub address: u32,
    pub chunk: u32,
    pub total_chunks: u32,
    /// Bytes moved so far in this call
    pub transferred: u32,
    /// Bytes this call moves in total
    pub length: u32,
    /// `false` when the chunk is about to be retried
    pub ok: bool,
    pub is_dump: bool,
}

impl Progress {
    pub fn percent(&self) -> u32 {
        if self.length == 0 {
            return 100;
        }
        ((self.transferred as u64 * 100) / self.length as u64) as u32
    }
}

/// Progress sink that ignores every report.
pub fn no_progress(_: &Progress) {}

/// Shared cancel flag, checked once per chunk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// How a chunked transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Complete,
    /// Stopped by the cancel flag; the snapshot can be resumed
    Cancelled,
}
