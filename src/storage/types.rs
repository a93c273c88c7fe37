use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use thiserror::Error;

/// Identifies one chunk of one backed-up file across the whole group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId {
    pub file_id: String,
    pub chunk_no: u32,
}

impl ChunkId {
    pub fn new(file_id: impl Into<String>, chunk_no: u32) -> Self {
        Self {
            file_id: file_id.into(),
            chunk_no,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.file_id, self.chunk_no)
    }
}

/// A file this peer originated a backup for.
///
/// Only the initiator holds one. The per-chunk counters are the initiator's
/// view of how many STORED acknowledgements each chunk has collected.
#[derive(Debug)]
pub struct FileRecord {
    pub file_id: String,
    pub path: PathBuf,
    pub desired_replication: u32,
    replication: Vec<AtomicI64>,
}

impl FileRecord {
    pub fn new(file_id: String, path: PathBuf, desired_replication: u32, chunk_count: usize) -> Self {
        Self {
            file_id,
            path,
            desired_replication,
            replication: (0..chunk_count).map(|_| AtomicI64::new(0)).collect(),
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.replication.len()
    }

    pub fn replication(&self, chunk_no: u32) -> Option<i64> {
        self.replication
            .get(chunk_no as usize)
            .map(|counter| counter.load(Ordering::SeqCst))
    }

    /// Applies `delta` to one chunk's counter, returning the new value.
    pub fn adjust(&self, chunk_no: u32, delta: i64) -> Option<i64> {
        self.replication
            .get(chunk_no as usize)
            .map(|counter| counter.fetch_add(delta, Ordering::SeqCst) + delta)
    }
}

/// A chunk this peer physically stores.
///
/// The payload itself lives on disk; the record keeps the accounting data.
/// Redundancy is derived from the two counters on every read.
#[derive(Debug)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub size: u64,
    desired: AtomicU32,
    perceived: AtomicI64,
}

impl ChunkRecord {
    pub fn new(id: ChunkId, size: u64, desired: u32, perceived: i64) -> Self {
        Self {
            id,
            size,
            desired: AtomicU32::new(desired),
            perceived: AtomicI64::new(perceived),
        }
    }

    pub fn desired(&self) -> u32 {
        self.desired.load(Ordering::SeqCst)
    }

    pub fn set_desired(&self, desired: u32) {
        self.desired.store(desired, Ordering::SeqCst);
    }

    pub fn perceived(&self) -> i64 {
        self.perceived.load(Ordering::SeqCst)
    }

    pub fn adjust_perceived(&self, delta: i64) -> i64 {
        self.perceived.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn redundancy(&self) -> i64 {
        self.perceived() - self.desired() as i64
    }

    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            desired_replication: self.desired(),
            perceived_replication: self.perceived(),
            size: self.size,
        }
    }
}

/// Sidecar written next to every stored chunk payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub desired_replication: u32,
    pub perceived_replication: i64,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("no backup registered for {0}")]
    NotBackedUp(PathBuf),

    #[error("unknown file id {0}")]
    UnknownFileId(String),

    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),
}
