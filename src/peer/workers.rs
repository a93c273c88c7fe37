//! Per-chunk workers of the backup and restore orchestrators.

use super::config::RetryPolicy;
use crate::coordination::cache::CoordinationCache;
use crate::multicast::channel::ChannelSet;
use crate::multicast::message::{Envelope, Message};
use crate::storage::manager::StorageManager;
use crate::storage::types::ChunkId;

use std::sync::Arc;

/// Pushes one chunk until enough peers acknowledged it.
pub struct BackupWorker {
    pub channels: ChannelSet,
    pub storage: Arc<StorageManager>,
    pub envelope: Envelope,
    pub chunk: ChunkId,
    pub body: Vec<u8>,
    pub replication_degree: u32,
    pub retry: RetryPolicy,
}

impl BackupWorker {
    /// Sends PUTCHUNK, waits, and checks the acknowledgement count, doubling
    /// the wait every round. Returns whether the desired degree was reached.
    pub async fn run(self) -> bool {
        let message = Message::PutChunk {
            envelope: self.envelope.clone(),
            chunk: self.chunk.clone(),
            replication_degree: self.replication_degree,
            body: self.body,
        };

        for (attempt, wait) in self.retry.waits().enumerate() {
            if let Err(e) = self.channels.send(&message).await {
                tracing::warn!("PUTCHUNK {} attempt {} not sent: {}", self.chunk, attempt + 1, e);
            }

            tokio::time::sleep(wait).await;

            let replication = self.storage.get_chunk_replication(&self.chunk);
            if replication >= self.replication_degree as i64 {
                tracing::debug!("Chunk {} replicated {} times", self.chunk, replication);
                return true;
            }

            tracing::debug!(
                "Chunk {} at {}/{} after attempt {}",
                self.chunk,
                replication,
                self.replication_degree,
                attempt + 1
            );
        }

        false
    }
}

/// Fetches one chunk from whichever peer answers first.
pub struct RestoreWorker {
    pub channels: ChannelSet,
    pub cache: Arc<CoordinationCache>,
    pub envelope: Envelope,
    pub chunk: ChunkId,
    pub retry: RetryPolicy,
}

impl RestoreWorker {
    pub async fn run(self) -> Option<Vec<u8>> {
        // Closed when the guard drops, whatever the outcome.
        let Some(slot) = self.cache.open_slot(self.chunk.clone()) else {
            tracing::warn!("Chunk {} is already being restored", self.chunk);
            return None;
        };
        let request = Message::GetChunk {
            envelope: self.envelope,
            chunk: self.chunk.clone(),
        };

        for wait in self.retry.waits() {
            if let Err(e) = self.channels.send(&request).await {
                tracing::warn!("GETCHUNK {} not sent: {}", self.chunk, e);
            }

            if let Some(payload) = slot.wait_for(wait).await {
                return Some(payload);
            }
        }

        tracing::warn!("No holder answered for chunk {}", self.chunk);
        None
    }
}
