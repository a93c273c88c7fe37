//! File ↔ chunk conversion and file identity.

use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Size of every chunk except the last one of a file.
pub const CHUNK_SIZE: usize = 64_000;

/// Number of chunks a file of `size` bytes is split into.
///
/// A file whose size is an exact multiple of `CHUNK_SIZE` (the empty file
/// included) still ends with one empty chunk, so the count is always
/// `size / CHUNK_SIZE + 1`.
pub fn chunk_count(size: u64) -> usize {
    (size / CHUNK_SIZE as u64) as usize + 1
}

pub fn split_chunks(data: &[u8]) -> Vec<Vec<u8>> {
    let mut chunks: Vec<Vec<u8>> = data.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect();
    if data.len() % CHUNK_SIZE == 0 {
        chunks.push(Vec::new());
    }
    chunks
}

pub fn join_chunks(chunks: &[Vec<u8>]) -> Vec<u8> {
    chunks.concat()
}

/// Derives the group-wide id of a file from its path, size, modification
/// time and the peer that owns it.
pub fn compute_file_id(path: &Path, size: u64, modified: SystemTime, owner: &str) -> String {
    let modified_ms = modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(b":");
    hasher.update(size.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(modified_ms.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(owner.as_bytes());

    hex::encode(hasher.finalize())
}
