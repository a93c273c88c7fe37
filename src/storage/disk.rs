//! On-disk layout of a peer.
//!
//! ```text
//! <storage_root>/peer<ID>/backup/<fileId>/chk<N>        chunk payload
//! <storage_root>/peer<ID>/info/<fileId>/chk<N>.json     ChunkMetadata
//! <storage_root>/peer<ID>/restored/<file name>          restored files
//! ```

use super::types::{ChunkId, ChunkMetadata};

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DiskLayout {
    root: PathBuf,
}

impl DiskLayout {
    pub fn new(storage_root: &Path, peer_id: &str) -> Self {
        Self {
            root: storage_root.join(format!("peer{}", peer_id)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunk_path(&self, id: &ChunkId) -> PathBuf {
        self.root
            .join("backup")
            .join(&id.file_id)
            .join(format!("chk{}", id.chunk_no))
    }

    pub fn metadata_path(&self, id: &ChunkId) -> PathBuf {
        self.root
            .join("info")
            .join(&id.file_id)
            .join(format!("chk{}.json", id.chunk_no))
    }

    pub fn restored_dir(&self) -> PathBuf {
        self.root.join("restored")
    }

    pub async fn write_chunk(&self, id: &ChunkId, body: &[u8], meta: &ChunkMetadata) -> io::Result<()> {
        let chunk_path = self.chunk_path(id);
        create_parent(&chunk_path).await?;
        tokio::fs::write(&chunk_path, body).await?;

        self.write_metadata(id, meta).await
    }

    pub async fn write_metadata(&self, id: &ChunkId, meta: &ChunkMetadata) -> io::Result<()> {
        let metadata_path = self.metadata_path(id);
        create_parent(&metadata_path).await?;
        let encoded = serde_json::to_vec_pretty(meta).map_err(io::Error::other)?;
        tokio::fs::write(&metadata_path, encoded).await
    }

    pub async fn read_chunk(&self, id: &ChunkId) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.chunk_path(id)).await
    }

    pub async fn read_metadata(&self, id: &ChunkId) -> io::Result<ChunkMetadata> {
        let raw = tokio::fs::read(self.metadata_path(id)).await?;
        serde_json::from_slice(&raw).map_err(io::Error::other)
    }

    pub async fn remove_chunk(&self, id: &ChunkId) -> io::Result<()> {
        ignore_missing(tokio::fs::remove_file(self.chunk_path(id)).await)?;
        ignore_missing(tokio::fs::remove_file(self.metadata_path(id)).await)
    }

    /// Removes every chunk payload and metadata file of `file_id`.
    pub async fn remove_file(&self, file_id: &str) -> io::Result<()> {
        ignore_missing(tokio::fs::remove_dir_all(self.root.join("backup").join(file_id)).await)?;
        ignore_missing(tokio::fs::remove_dir_all(self.root.join("info").join(file_id)).await)
    }

    pub async fn write_restored(&self, file_name: &OsStr, data: &[u8]) -> io::Result<PathBuf> {
        let dir = self.restored_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let target = dir.join(file_name);
        tokio::fs::write(&target, data).await?;
        Ok(target)
    }
}

async fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => tokio::fs::create_dir_all(parent).await,
        None => Ok(()),
    }
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
