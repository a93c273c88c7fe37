//! Local Storage Engine
//!
//! Owns everything a peer knows about stored data:
//! - **File records** for files this peer backed up (initiator side).
//! - **Chunk records** for chunks this peer physically holds (holder side).
//! - **Pending counts** for STORED/REMOVED messages about chunks this peer
//!   neither owns nor holds (yet).
//! - **Capacity accounting**, guarded by the storage lock.
//!
//! `store_chunk`, `delete_chunks`, `discard_chunk` and `reclaim_space` all
//! run inside the storage lock, so the used/max comparison that drives
//! acceptance and eviction is exact. Replication counters are atomics and
//! are updated without the lock.

use super::accounting::CapacityAccount;
use super::chunking;
use super::disk::DiskLayout;
use super::types::{ChunkId, ChunkRecord, FileRecord, StorageError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::cmp::Ordering;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct StorageManager {
    peer_id: String,
    disk: DiskLayout,
    files: DashMap<String, Arc<FileRecord>>,
    paths: DashMap<PathBuf, String>,
    chunks: DashMap<ChunkId, Arc<ChunkRecord>>,
    pending: DashMap<ChunkId, i64>,
    space: Mutex<CapacityAccount>,
}

impl StorageManager {
    pub fn new(peer_id: impl Into<String>, storage_root: &Path, capacity: u64) -> Self {
        let peer_id = peer_id.into();
        let disk = DiskLayout::new(storage_root, &peer_id);

        Self {
            peer_id,
            disk,
            files: DashMap::new(),
            paths: DashMap::new(),
            chunks: DashMap::new(),
            pending: DashMap::new(),
            space: Mutex::new(CapacityAccount::new(capacity)),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn disk(&self) -> &DiskLayout {
        &self.disk
    }

    // ============================================================
    // INITIATOR SIDE
    // ============================================================

    pub fn is_backed_up(&self, path: &Path) -> bool {
        self.paths.contains_key(&normalize(path))
    }

    pub fn is_initiator(&self, file_id: &str) -> bool {
        self.files.contains_key(file_id)
    }

    pub fn file_id_for(&self, path: &Path) -> Option<String> {
        self.paths.get(&normalize(path)).map(|id| id.value().clone())
    }

    pub fn chunk_count(&self, file_id: &str) -> Option<usize> {
        self.files.get(file_id).map(|record| record.chunk_count())
    }

    /// Computes the file id of `path` and registers a fresh `FileRecord` for it.
    pub async fn generate_file_id(&self, path: &Path, desired_replication: u32) -> Result<String, StorageError> {
        let path = normalize(path);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(StorageError::NotFound(path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path));
            }
            Err(e) => return Err(e.into()),
        };

        let file_id = chunking::compute_file_id(&path, metadata.len(), metadata.modified()?, &self.peer_id);
        let record = FileRecord::new(
            file_id.clone(),
            path.clone(),
            desired_replication,
            chunking::chunk_count(metadata.len()),
        );

        self.files.insert(file_id.clone(), Arc::new(record));
        self.paths.insert(path, file_id.clone());

        tracing::debug!("Registered file id {}", file_id);

        Ok(file_id)
    }

    pub async fn retrieve_chunks(&self, file_id: &str) -> Result<Vec<Vec<u8>>, StorageError> {
        let path = self
            .files
            .get(file_id)
            .map(|record| record.path.clone())
            .ok_or_else(|| StorageError::UnknownFileId(file_id.to_string()))?;

        let data = tokio::fs::read(&path).await?;
        Ok(chunking::split_chunks(&data))
    }

    /// Forgets the backup of `path`, returning the file id it had.
    pub fn delete_file(&self, path: &Path) -> Option<String> {
        let (_, file_id) = self.paths.remove(&normalize(path))?;
        self.files.remove(&file_id);
        Some(file_id)
    }

    /// Writes the concatenation of `chunks` into the restore directory under
    /// the original file name.
    pub async fn restore_file(&self, path: &Path, chunks: &[Vec<u8>]) -> Result<PathBuf, StorageError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))?;

        let data = chunking::join_chunks(chunks);
        Ok(self.disk.write_restored(file_name, &data).await?)
    }

    // ============================================================
    // HOLDER SIDE
    // ============================================================

    pub fn has_chunk(&self, id: &ChunkId) -> bool {
        self.chunks.contains_key(id)
    }

    pub fn chunk_record(&self, id: &ChunkId) -> Option<Arc<ChunkRecord>> {
        self.chunks.get(id).map(|record| record.value().clone())
    }

    pub async fn read_chunk(&self, id: &ChunkId) -> Result<Vec<u8>, StorageError> {
        Ok(self.disk.read_chunk(id).await?)
    }

    /// Accepts a chunk if it fits in the remaining capacity.
    ///
    /// A chunk already held only has its desired degree refreshed; nothing is
    /// reserved or written twice.
    pub async fn store_chunk(&self, id: &ChunkId, desired_replication: u32, body: &[u8]) -> bool {
        let mut space = self.space.lock().await;

        if let Some(existing) = self.chunks.get(id) {
            existing.set_desired(desired_replication);
            return true;
        }

        let size = body.len() as u64;
        if !space.try_reserve(size) {
            tracing::debug!(
                "Refusing chunk {} ({} bytes, {}/{} used)",
                id,
                size,
                space.used(),
                space.max()
            );
            return false;
        }

        let record = Arc::new(ChunkRecord::new(id.clone(), size, desired_replication, 0));
        let mut metadata = record.metadata();
        metadata.perceived_replication = self.pending.get(id).map(|count| *count).unwrap_or(0);

        if let Err(e) = self.disk.write_chunk(id, body, &metadata).await {
            tracing::error!("Failed to persist chunk {}: {}", id, e);
            space.release(size);
            return false;
        }

        // Counts that arrived before the chunk itself are folded in while the
        // pending entry is held, so a concurrent signal lands on exactly one side.
        match self.pending.entry(id.clone()) {
            Entry::Occupied(early) => {
                record.adjust_perceived(*early.get());
                self.chunks.insert(id.clone(), record);
                early.remove();
            }
            Entry::Vacant(_slot) => {
                self.chunks.insert(id.clone(), record);
            }
        }

        tracing::debug!("Stored chunk {} ({} bytes)", id, size);
        true
    }

    /// Drops a chunk that was stored but never announced.
    pub async fn discard_chunk(&self, id: &ChunkId) -> bool {
        let mut space = self.space.lock().await;

        let Some((_, record)) = self.chunks.remove(id) else {
            return false;
        };
        space.release(record.size);

        if let Err(e) = self.disk.remove_chunk(id).await {
            tracing::warn!("Failed to remove discarded chunk {}: {}", id, e);
        }
        true
    }

    pub fn signal_store_chunk(&self, id: &ChunkId) {
        self.adjust_replication(id, 1);
    }

    /// Records a REMOVED for `id`. When this peer holds the chunk, the record
    /// is returned (not deleted) so the caller can decide to re-replicate it.
    pub fn signal_remove_chunk(&self, id: &ChunkId) -> Option<Arc<ChunkRecord>> {
        self.adjust_replication(id, -1)
    }

    fn adjust_replication(&self, id: &ChunkId, delta: i64) -> Option<Arc<ChunkRecord>> {
        if let Some(file) = self.files.get(&id.file_id) {
            file.adjust(id.chunk_no, delta);
            return None;
        }

        match self.pending.entry(id.clone()) {
            Entry::Occupied(mut count) => {
                *count.get_mut() += delta;
                None
            }
            Entry::Vacant(slot) => match self.chunk_record(id) {
                Some(record) => {
                    record.adjust_perceived(delta);
                    Some(record)
                }
                None => {
                    slot.insert(delta);
                    None
                }
            },
        }
    }

    /// Perceived replication of a chunk, or -1 when nothing is known about it.
    pub fn get_chunk_replication(&self, id: &ChunkId) -> i64 {
        if let Some(file) = self.files.get(&id.file_id) {
            return file.replication(id.chunk_no).unwrap_or(-1);
        }

        if let Some(count) = self.pending.get(id) {
            return *count;
        }

        self.chunks
            .get(id)
            .map(|record| record.perceived())
            .unwrap_or(-1)
    }

    /// Removes every locally stored chunk of `file_id`, returning how many were held.
    pub async fn delete_chunks(&self, file_id: &str) -> usize {
        let mut space = self.space.lock().await;

        let doomed: Vec<ChunkId> = self
            .chunks
            .iter()
            .filter(|entry| entry.key().file_id == file_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in &doomed {
            if let Some((_, record)) = self.chunks.remove(id) {
                space.release(record.size);
                removed += 1;
            }
        }
        self.pending.retain(|id, _| id.file_id != file_id);

        if let Err(e) = self.disk.remove_file(file_id).await {
            tracing::warn!("Failed to remove chunk files of {}: {}", file_id, e);
        }

        removed
    }

    /// Sets a new capacity and evicts chunks until the used space fits in it.
    ///
    /// Returns the evicted chunks in eviction order; the caller announces
    /// each one with a REMOVED message.
    pub async fn reclaim_space(&self, max: u64) -> Vec<ChunkId> {
        let mut space = self.space.lock().await;
        space.set_max(max);

        let mut evicted = Vec::new();
        if !space.is_over_budget() {
            return evicted;
        }

        let mut candidates: Vec<EvictionCandidate> = self
            .chunks
            .iter()
            .map(|entry| EvictionCandidate::of(entry.value()))
            .collect();
        candidates.sort_by(EvictionCandidate::eviction_order);

        for candidate in candidates {
            if !space.is_over_budget() {
                break;
            }

            let Some((_, record)) = self.chunks.remove(&candidate.record.id) else {
                continue;
            };
            space.release(record.size);

            if let Err(e) = self.disk.remove_chunk(&record.id).await {
                tracing::warn!("Failed to remove evicted chunk {}: {}", record.id, e);
            }

            tracing::info!(
                "Evicted chunk {} (redundancy {}, {} bytes)",
                record.id,
                candidate.redundancy,
                record.size
            );
            evicted.push(record.id.clone());
        }

        evicted
    }

    pub async fn used(&self) -> u64 {
        self.space.lock().await.used()
    }

    pub async fn capacity(&self) -> u64 {
        self.space.lock().await.max()
    }

    /// Human-readable report of backed-up files, stored chunks and capacity.
    pub async fn get_state(&self) -> String {
        let space = self.space.lock().await;
        let mut report = String::new();

        let _ = writeln!(report, "Peer {}", self.peer_id);

        let mut files: Vec<Arc<FileRecord>> = self.files.iter().map(|e| e.value().clone()).collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let _ = writeln!(report, "Backed up files ({}):", files.len());
        for file in &files {
            let _ = writeln!(report, "  {}", file.path.display());
            let _ = writeln!(report, "    file id: {}", file.file_id);
            let _ = writeln!(report, "    desired replication: {}", file.desired_replication);
            for chunk_no in 0..file.chunk_count() as u32 {
                let _ = writeln!(
                    report,
                    "    chunk {}: perceived replication {}",
                    chunk_no,
                    file.replication(chunk_no).unwrap_or_default()
                );
            }
        }

        let mut chunks: Vec<Arc<ChunkRecord>> = self.chunks.iter().map(|e| e.value().clone()).collect();
        chunks.sort_by(|a, b| a.id.cmp(&b.id));

        let _ = writeln!(report, "Stored chunks ({}):", chunks.len());
        for chunk in &chunks {
            let _ = writeln!(
                report,
                "  {}: {} bytes, desired {}, perceived {}, redundancy {}",
                chunk.id,
                chunk.size,
                chunk.desired(),
                chunk.perceived(),
                chunk.redundancy()
            );
        }

        let _ = writeln!(report, "Storage: {} / {} bytes used", space.used(), space.max());

        report
    }
}

/// Snapshot of the values eviction sorts on, taken once so concurrent
/// counter updates cannot reorder the candidates mid-sort.
struct EvictionCandidate {
    redundancy: i64,
    desired: u32,
    record: Arc<ChunkRecord>,
}

impl EvictionCandidate {
    fn of(record: &Arc<ChunkRecord>) -> Self {
        Self {
            redundancy: record.redundancy(),
            desired: record.desired(),
            record: record.clone(),
        }
    }

    /// Highest redundancy first, then larger desired degree, then chunk id.
    fn eviction_order(a: &Self, b: &Self) -> Ordering {
        b.redundancy
            .cmp(&a.redundancy)
            .then_with(|| b.desired.cmp(&a.desired))
            .then_with(|| a.record.id.cmp(&b.record.id))
    }
}

fn normalize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
