//! On-disk search history.
//!
//! Every completed generation is written to `<session>/<index>.zip` with two
//! members:
//!
//! | Member | Layout (big-endian)                          |
//! |:-------|:---------------------------------------------|
//! | `dump` | start u32, end u32, raw snapshot bytes       |
//! | `list` | count u32, then `count` result addresses u32 |
//!
//! Writes happen on a background thread fed through a bounded queue. A
//! reader asking for generation `i` blocks until any queued or running write
//! of `i` has finished.

use super::SearchError;
use crate::codec::byte_utils::{push_be_u32, read_be_u32};
use crate::memory::MemorySnapshot;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Generations that may wait in the queue before `store` blocks
const QUEUE_DEPTH: usize = 2;

/// One generation read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub results: Vec<u32>,
    pub snapshot: MemorySnapshot,
}

struct Job {
    index: u32,
    path: PathBuf,
    results: Vec<u32>,
    snapshot: MemorySnapshot,
}

#[derive(Default)]
struct Pending {
    /// Queued or running writes per generation index
    indices: HashMap<u32, usize>,
    failed: Vec<(u32, String)>,
}

impl Pending {
    fn finish(&mut self, index: u32) {
        if let Some(count) = self.indices.get_mut(&index) {
            *count -= 1;
            if *count == 0 {
                self.indices.remove(&index);
            }
        }
    }
}

type PendingSet = Arc<(Mutex<Pending>, Condvar)>;

fn member_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Writes `results` and `snapshot` as one generation archive.
pub fn write_archive(path: &Path, results: &[u32], snapshot: &MemorySnapshot) -> Result<(), SearchError> {
    let mut zip = ZipWriter::new(File::create(path)?);

    let mut header = Vec::with_capacity(8);
    push_be_u32(&mut header, snapshot.start());
    push_be_u32(&mut header, snapshot.end());
    zip.start_file("dump", member_options())?;
    zip.write_all(&header)?;
    zip.write_all(snapshot.data())?;

    let mut list = Vec::with_capacity(4 + results.len() * 4);
    push_be_u32(&mut list, results.len() as u32);
    for &address in results {
        push_be_u32(&mut list, address);
    }
    zip.start_file("list", member_options())?;
    zip.write_all(&list)?;

    zip.finish()?;
    Ok(())
}

fn read_member(archive: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>, SearchError> {
    let mut member = archive.by_name(name)?;
    let mut bytes = Vec::with_capacity(member.size() as usize);
    member.read_to_end(&mut bytes)?;
    Ok(bytes)
}

pub fn read_archive(path: &Path) -> Result<Generation, SearchError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;

    let dump = read_member(&mut archive, "dump")?;
    let (Some(start), Some(end)) = (read_be_u32(&dump, 0), read_be_u32(&dump, 4)) else {
        return Err(SearchError::CorruptArchive(path.to_path_buf()));
    };
    if end < start || dump.len() - 8 != (end - start) as usize {
        return Err(SearchError::CorruptArchive(path.to_path_buf()));
    }
    let snapshot = MemorySnapshot::from_bytes(start, dump[8..].to_vec());

    let list = read_member(&mut archive, "list")?;
    let count = read_be_u32(&list, 0).ok_or_else(|| SearchError::CorruptArchive(path.to_path_buf()))?;
    if list.len() != 4 + count as usize * 4 {
        return Err(SearchError::CorruptArchive(path.to_path_buf()));
    }
    let results = list[4..]
        .chunks_exact(4)
        .filter_map(|word| read_be_u32(word, 0))
        .collect();

    Ok(Generation { results, snapshot })
}

/// A search session's archive directory and its background writer.
pub struct History {
    dir: PathBuf,
    sender: Option<SyncSender<Job>>,
    pending: PendingSet,
    worker: Option<JoinHandle<()>>,
}

impl History {
    /// Start a new session directory under `parent`, named after the local time.
    pub fn create(parent: &Path) -> Result<Self, SearchError> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        Self::open(parent.join(format!("search_{}", stamp)))
    }

    /// Use `dir` as the session directory, creating it if needed.
    pub fn open(dir: PathBuf) -> Result<Self, SearchError> {
        std::fs::create_dir_all(&dir)?;
        let (sender, receiver) = mpsc::sync_channel::<Job>(QUEUE_DEPTH);
        let pending: PendingSet = Arc::new((Mutex::new(Pending::default()), Condvar::new()));

        let worker_pending = Arc::clone(&pending);
        let worker = std::thread::Builder::new()
            .name("search-history".into())
            .spawn(move || {
                for job in receiver {
                    let outcome = write_archive(&job.path, &job.results, &job.snapshot);
                    let (lock, cvar) = &*worker_pending;
                    let mut pending = lock.lock().unwrap_or_else(|e| e.into_inner());
                    pending.finish(job.index);
                    match outcome {
                        Ok(()) => log::trace!("stored generation {}", job.index),
                        Err(e) => {
                            log::warn!("failed to store generation {}: {}", job.index, e);
                            pending.failed.push((job.index, e.to_string()));
                        }
                    }
                    cvar.notify_all();
                }
            })?;

        log::debug!("search history in {}", dir.display());
        Ok(Self {
            dir,
            sender: Some(sender),
            pending,
            worker: Some(worker),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, index: u32) -> PathBuf {
        self.dir.join(format!("{}.zip", index))
    }

    /// Queue generation `index` for writing. The data is copied, so the
    /// caller keeps ownership of its results and snapshot.
    pub fn store(&self, index: u32, results: &[u32], snapshot: &MemorySnapshot) -> Result<(), SearchError> {
        let Some(sender) = &self.sender else {
            return Err(SearchError::HistoryClosed);
        };
        {
            let (lock, _) = &*self.pending;
            let mut pending = lock.lock().unwrap_or_else(|e| e.into_inner());
            *pending.indices.entry(index).or_insert(0) += 1;
        }
        let job = Job {
            index,
            path: self.path_of(index),
            results: results.to_vec(),
            snapshot: snapshot.clone(),
        };
        if sender.send(job).is_err() {
            let (lock, cvar) = &*self.pending;
            lock.lock().unwrap_or_else(|e| e.into_inner()).finish(index);
            cvar.notify_all();
            return Err(SearchError::HistoryClosed);
        }
        Ok(())
    }

    /// Block until no write of `index` is queued or running.
    pub fn wait_for(&self, index: u32) {
        let (lock, cvar) = &*self.pending;
        let mut pending = lock.lock().unwrap_or_else(|e| e.into_inner());
        while pending.indices.contains_key(&index) {
            pending = cvar.wait(pending).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Block until every queued write has finished.
    pub fn flush(&self) {
        let (lock, cvar) = &*self.pending;
        let mut pending = lock.lock().unwrap_or_else(|e| e.into_inner());
        while !pending.indices.is_empty() {
            pending = cvar.wait(pending).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Writes that failed since the last call, with their error text.
    pub fn take_failures(&self) -> Vec<(u32, String)> {
        let (lock, _) = &*self.pending;
        std::mem::take(&mut lock.lock().unwrap_or_else(|e| e.into_inner()).failed)
    }

    pub fn load_generation(&self, index: u32) -> Result<Generation, SearchError> {
        self.wait_for(index);
        let mut generation = read_archive(&self.path_of(index))?;
        generation.snapshot.set_generation(index);
        Ok(generation)
    }
}

impl Drop for History {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
