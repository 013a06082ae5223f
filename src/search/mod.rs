//! Cheat Search
//!
//! Generation-based filtering of target memory: capture a range, then
//! narrow the candidate addresses pass by pass by comparing each new
//! capture against a literal, the previous capture or the one before it.

pub mod comparison;
pub mod engine;
pub mod history;
pub mod results;

pub use comparison::{ComparisonType, ReferenceKind, SearchComparisonInfo, SearchSize};
pub use engine::{
    BlockProgress, SearchEngine, SearchOutcome, SearchProgress, SearchRequest, SearchState,
    BLOCK_GAP,
};
pub use history::{Generation, History};
pub use results::{Radix, ResultRow, SortColumn, SortState, PAGE_SIZE};

use crate::error::GeckoError;
use crate::gecko::{GeckoClient, Progress, SharedClient, TransferStatus};
use crate::memory::MemorySnapshot;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Gecko(#[from] GeckoError),
    #[error("history archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("history I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt history archive {}", .0.display())]
    CorruptArchive(PathBuf),
    #[error("history writer has stopped")]
    HistoryClosed,
    #[error("search history is disabled")]
    NoHistory,
    #[error("invalid search: {0}")]
    InvalidRequest(String),
}

/// Where search passes read target memory from.
///
/// A pass calls [`begin_pass`](Self::begin_pass) once, then
/// [`dump`](Self::dump) per block. A cancel request stays raised for the
/// rest of the pass once made.
pub trait MemorySource {
    /// Drop a cancel request left over from before the pass.
    fn begin_pass(&mut self) {}

    fn dump(
        &mut self,
        snapshot: &mut MemorySnapshot,
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<TransferStatus, GeckoError>;

    fn is_cancelled(&self) -> bool {
        false
    }
}

impl MemorySource for GeckoClient {
    fn begin_pass(&mut self) {
        self.clear_cancel();
    }

    fn dump(
        &mut self,
        snapshot: &mut MemorySnapshot,
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<TransferStatus, GeckoError> {
        self.dump_part(snapshot, progress)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_token().is_cancelled()
    }
}

impl MemorySource for SharedClient {
    fn begin_pass(&mut self) {
        self.lock().unwrap_or_else(|e| e.into_inner()).clear_cancel();
    }

    fn dump(
        &mut self,
        snapshot: &mut MemorySnapshot,
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<TransferStatus, GeckoError> {
        let mut client = self.lock().unwrap_or_else(|e| e.into_inner());
        client.dump_part(snapshot, progress)
    }

    fn is_cancelled(&self) -> bool {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel_token()
            .is_cancelled()
    }
}

#[cfg(test)]
mod tests_engine;
