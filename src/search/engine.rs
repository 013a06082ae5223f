//! The search state machine.
//!
//! ```text
//! Empty --exact--> Refining <--> Refining --no results--> Exhausted
//!   \                  ^
//!    --unknown--> PendingUnknown
//! ```
//!
//! Three snapshots stay in memory: `new` (current generation), `old`
//! (previous) and `undo` (the one before). They rotate before a pass does
//! any I/O and rotate back if the pass is cancelled or fails, so an aborted
//! pass leaves the engine exactly as it was.

use super::comparison::{evaluate, ReferenceKind, Sample, SearchComparisonInfo, SearchSize};
use super::history::{Generation, History};
use super::results::{self, Radix, ResultRow, SortColumn, SortState};
use super::{MemorySource, SearchError};
use crate::gecko::{Progress, TransferStatus};
use crate::memory::{MemoryRegionTable, MemorySnapshot, ValidationPolicy};
use serde::{Deserialize, Serialize};

/// Candidates closer than this are fetched in one block
pub const BLOCK_GAP: u32 = 0x3E000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub start: u32,
    pub end: u32,
    pub size: SearchSize,
    pub comparisons: Vec<SearchComparisonInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Empty,
    /// A range was captured without a filter; the next pass filters it
    PendingUnknown,
    Refining,
    /// The last pass left no candidates
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Filtered { count: usize },
    /// Captured, waiting for a comparison against the next capture
    Pending,
    Exhausted { can_undo: bool },
    /// Nothing changed
    Cancelled,
}

/// Position within a block-sparse capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockProgress {
    pub block_id: u32,
    pub block_count: u32,
    pub block_start: u32,
    pub block_end: u32,
    /// Bytes across all blocks of the pass
    pub total_block_size: u32,
    /// Bytes received so far across all blocks
    pub blocks_dumped_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchProgress {
    pub block: BlockProgress,
    pub transfer: Progress,
}

/// Group ascending candidate addresses into blocks to fetch.
pub fn candidate_blocks(sorted: &[u32], width: u32) -> Vec<(u32, u32)> {
    let mut blocks: Vec<(u32, u32)> = Vec::new();
    for &address in sorted {
        let end = address.saturating_add(width);
        match blocks.last_mut() {
            Some((_, block_end)) if address <= block_end.saturating_add(BLOCK_GAP) => {
                *block_end = (*block_end).max(end);
            }
            _ => blocks.push((address, end)),
        }
    }
    blocks
}

fn aligned_addresses(start: u32, end: u32, width: u32) -> impl Iterator<Item = u32> {
    let first = start.checked_add(width - 1).map(|a| a / width * width);
    std::iter::successors(first, move |&a| a.checked_add(width))
        .take_while(move |&a| a.checked_add(width).is_some_and(|e| e <= end))
}

fn filter(
    candidates: impl Iterator<Item = u32>,
    comparisons: &[SearchComparisonInfo],
    size: SearchSize,
    new: &MemorySnapshot,
    old: Option<&MemorySnapshot>,
    undo: Option<&MemorySnapshot>,
) -> Vec<u32> {
    let width = size.bytes();
    candidates
        .filter(|&address| {
            let sample = Sample {
                new: new.read_sized(address, width),
                old: old.map(|s| s.read_sized(address, width)),
                undo: undo.map(|s| s.read_sized(address, width)),
            };
            evaluate(comparisons, &sample, size)
        })
        .collect()
}

fn dump_blocks(
    source: &mut dyn MemorySource,
    snapshot: &mut MemorySnapshot,
    blocks: &[(u32, u32)],
    progress: &mut dyn FnMut(&SearchProgress),
) -> Result<TransferStatus, SearchError> {
    let total: u32 = blocks.iter().map(|(s, e)| e - s).sum();
    let block_count = blocks.len() as u32;
    let mut dumped = 0u32;

    source.begin_pass();
    for (id, &(block_start, block_end)) in blocks.iter().enumerate() {
        let mut report = |p: &Progress| {
            progress(&SearchProgress {
                block: BlockProgress {
                    block_id: id as u32,
                    block_count,
                    block_start,
                    block_end,
                    total_block_size: total,
                    blocks_dumped_size: dumped + p.transferred,
                },
                transfer: *p,
            })
        };
        let whole = block_start == snapshot.start() && block_end == snapshot.end();
        let status = if whole {
            source.dump(snapshot, &mut report)?
        } else {
            let mut part = MemorySnapshot::new(block_start, block_end);
            let status = source.dump(&mut part, &mut report)?;
            snapshot.copy_from(&part);
            status
        };
        if status == TransferStatus::Cancelled || source.is_cancelled() {
            log::debug!("pass cancelled after block {} of {}", id + 1, block_count);
            return Ok(TransferStatus::Cancelled);
        }
        dumped += block_end - block_start;
    }
    Ok(TransferStatus::Complete)
}

/// Snapshots moved out by a rotation, kept until the pass commits.
struct Rotation {
    dropped_undo: Option<MemorySnapshot>,
}

pub struct SearchEngine {
    state: SearchState,
    size: SearchSize,
    bounds: Option<(u32, u32)>,
    new: Option<MemorySnapshot>,
    old: Option<MemorySnapshot>,
    undo: Option<MemorySnapshot>,
    results: Vec<u32>,
    previous_results: Option<Vec<u32>>,
    /// Id the next captured generation gets
    next_generation: u32,
    sort: SortState,
    regions: MemoryRegionTable,
    policy: ValidationPolicy,
    history: Option<History>,
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchEngine {
    pub fn new() -> Self {
        Self {
            state: SearchState::Empty,
            size: SearchSize::default(),
            bounds: None,
            new: None,
            old: None,
            undo: None,
            results: Vec::new(),
            previous_results: None,
            next_generation: 0,
            sort: SortState::default(),
            regions: MemoryRegionTable::default(),
            policy: ValidationPolicy::default(),
            history: None,
        }
    }

    /// Archive every generation through `history`.
    pub fn with_history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    /// Check search ranges against `regions` under `policy`.
    pub fn with_regions(mut self, regions: MemoryRegionTable, policy: ValidationPolicy) -> Self {
        self.regions = regions;
        self.policy = policy;
        self
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn size(&self) -> SearchSize {
        self.size
    }

    pub fn bounds(&self) -> Option<(u32, u32)> {
        self.bounds
    }

    pub fn results(&self) -> &[u32] {
        &self.results
    }

    /// The current generation's capture.
    pub fn snapshot(&self) -> Option<&MemorySnapshot> {
        self.new.as_ref()
    }

    pub fn previous_snapshot(&self) -> Option<&MemorySnapshot> {
        self.old.as_ref()
    }

    /// Id of the current generation.
    pub fn generation(&self) -> Option<u32> {
        self.new.as_ref().map(|s| s.generation())
    }

    pub fn history(&self) -> Option<&History> {
        self.history.as_ref()
    }

    pub fn can_undo(&self) -> bool {
        self.undo.is_some() && self.previous_results.is_some()
    }

    /// Run one search pass.
    pub fn search(
        &mut self,
        source: &mut dyn MemorySource,
        request: &SearchRequest,
        progress: &mut dyn FnMut(&SearchProgress),
    ) -> Result<SearchOutcome, SearchError> {
        if request.comparisons.is_empty() {
            return Err(SearchError::InvalidRequest("no comparisons".into()));
        }
        match self.state {
            SearchState::Empty => self.initial_pass(source, request, progress),
            SearchState::PendingUnknown => self.refine_pass(source, request, progress, true),
            SearchState::Refining => self.refine_pass(source, request, progress, false),
            SearchState::Exhausted => Ok(SearchOutcome::Exhausted {
                can_undo: self.can_undo(),
            }),
        }
    }

    fn initial_pass(
        &mut self,
        source: &mut dyn MemorySource,
        request: &SearchRequest,
        progress: &mut dyn FnMut(&SearchProgress),
    ) -> Result<SearchOutcome, SearchError> {
        let (start, end) = (request.start, request.end);
        if !self.regions.valid_range(start, end, self.policy) {
            return Err(SearchError::InvalidRequest(format!(
                "{:08X}-{:08X} is not a mapped range",
                start, end
            )));
        }
        let width = request.size.bytes();
        if end - start < width {
            return Err(SearchError::InvalidRequest("range smaller than one value".into()));
        }

        log::debug!("initial search {:08X}-{:08X} ({:?})", start, end, request.size);
        let mut snapshot = MemorySnapshot::new(start, end);
        if dump_blocks(source, &mut snapshot, &[(start, end)], progress)? == TransferStatus::Cancelled {
            return Ok(SearchOutcome::Cancelled);
        }

        self.size = request.size;
        self.bounds = Some((start, end));
        if request.comparisons[0].reference != ReferenceKind::Exact {
            snapshot.set_generation(self.next_generation);
            self.next_generation += 1;
            self.new = Some(snapshot);
            self.state = SearchState::PendingUnknown;
            return Ok(SearchOutcome::Pending);
        }

        let found = filter(
            aligned_addresses(start, end, width),
            &request.comparisons,
            self.size,
            &snapshot,
            None,
            None,
        );
        Ok(self.commit(snapshot, found, None))
    }

    fn refine_pass(
        &mut self,
        source: &mut dyn MemorySource,
        request: &SearchRequest,
        progress: &mut dyn FnMut(&SearchProgress),
        pending: bool,
    ) -> Result<SearchOutcome, SearchError> {
        if request.size != self.size {
            return Err(SearchError::InvalidRequest(
                "value size cannot change during a search".into(),
            ));
        }
        let Some((start, end)) = self.bounds else {
            return Err(SearchError::InvalidRequest("no search range".into()));
        };
        let width = self.size.bytes();

        let mut candidates = self.results.clone();
        candidates.sort_unstable();
        let blocks = if pending {
            vec![(start, end)]
        } else {
            candidate_blocks(&candidates, width)
        };

        let rotation = self.rotate();
        log::debug!(
            "search pass {} over {} block(s), {} candidates",
            self.next_generation,
            blocks.len(),
            candidates.len()
        );
        let mut snapshot = MemorySnapshot::new(start, end);
        match dump_blocks(source, &mut snapshot, &blocks, progress) {
            Ok(TransferStatus::Complete) => {}
            Ok(TransferStatus::Cancelled) => {
                self.unrotate(rotation);
                return Ok(SearchOutcome::Cancelled);
            }
            Err(e) => {
                self.unrotate(rotation);
                return Err(e);
            }
        }

        let found = if pending {
            filter(
                aligned_addresses(start, end, width),
                &request.comparisons,
                self.size,
                &snapshot,
                self.old.as_ref(),
                self.undo.as_ref(),
            )
        } else {
            filter(
                candidates.into_iter(),
                &request.comparisons,
                self.size,
                &snapshot,
                self.old.as_ref(),
                self.undo.as_ref(),
            )
        };
        let previous = if pending {
            None
        } else {
            Some(std::mem::take(&mut self.results))
        };
        Ok(self.commit(snapshot, found, previous))
    }

    fn rotate(&mut self) -> Rotation {
        let dropped_undo = self.undo.take();
        self.undo = self.old.take();
        self.old = self.new.take();
        Rotation { dropped_undo }
    }

    fn unrotate(&mut self, rotation: Rotation) {
        self.new = self.old.take();
        self.old = self.undo.take();
        self.undo = rotation.dropped_undo;
    }

    fn commit(
        &mut self,
        mut snapshot: MemorySnapshot,
        found: Vec<u32>,
        previous: Option<Vec<u32>>,
    ) -> SearchOutcome {
        let index = self.next_generation;
        snapshot.set_generation(index);
        self.next_generation += 1;
        if let Some(history) = &self.history {
            if let Err(e) = history.store(index, &found, &snapshot) {
                log::warn!("generation {} not archived: {}", index, e);
            }
        }

        self.new = Some(snapshot);
        self.results = found;
        self.previous_results = previous;
        self.sort = SortState::default();

        log::debug!("generation {}: {} results", index, self.results.len());
        if self.results.is_empty() {
            self.state = SearchState::Exhausted;
            SearchOutcome::Exhausted {
                can_undo: self.can_undo(),
            }
        } else {
            self.state = SearchState::Refining;
            SearchOutcome::Filtered {
                count: self.results.len(),
            }
        }
    }

    /// Step back one generation. Needs two generations before the current
    /// one; `false` when there are not.
    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        let Some(previous) = self.previous_results.take() else {
            return false;
        };
        self.new = self.old.take();
        self.old = self.undo.take();
        self.results = previous;
        self.next_generation = self.next_generation.saturating_sub(1);
        self.sort = SortState::default();
        self.state = if self.results.is_empty() {
            SearchState::Exhausted
        } else {
            SearchState::Refining
        };
        log::debug!("undo to generation {:?}", self.generation());
        true
    }

    /// Forget every generation. Archives already written stay on disk.
    pub fn reset(&mut self) {
        self.state = SearchState::Empty;
        self.bounds = None;
        self.new = None;
        self.old = None;
        self.undo = None;
        self.results.clear();
        self.previous_results = None;
        self.next_generation = 0;
        self.sort = SortState::default();
    }

    pub fn load_generation(&self, index: u32) -> Result<Generation, SearchError> {
        self.history
            .as_ref()
            .ok_or(SearchError::NoHistory)?
            .load_generation(index)
    }

    pub fn page_count(&self) -> usize {
        results::page_count(self.results.len())
    }

    /// Formatted rows of one page.
    pub fn page(&self, page: usize, radix: Radix) -> Vec<ResultRow> {
        let Some(new) = &self.new else {
            return Vec::new();
        };
        results::page_slice(&self.results, page)
            .iter()
            .map(|&address| results::format_row(address, new, self.old.as_ref(), self.size, radix))
            .collect()
    }

    pub fn sort_state(&self) -> SortState {
        self.sort
    }

    /// Sort the results by `column`; sorting by the same column again
    /// reverses the order.
    pub fn sort_by(&mut self, column: SortColumn) {
        self.sort.select(column);
        if let Some(new) = &self.new {
            results::sort_results(&mut self.results, self.sort, new, self.old.as_ref(), self.size);
        }
    }
}
