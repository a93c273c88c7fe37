//! Protocol State Machine
//!
//! One `handle_message` call per received datagram. Every reply that could
//! be sent by several peers at once (STORED, CHUNK, rescue PUTCHUNK) is
//! delayed by the backoff and guarded by a coordination flag, so a peer that
//! overhears an equivalent reply during its wait can stay silent.

use super::backoff::Backoff;
use crate::coordination::cache::{CoordinationCache, Flag};
use crate::multicast::channel::ChannelSet;
use crate::multicast::message::{Envelope, Message};
use crate::storage::manager::StorageManager;
use crate::storage::types::ChunkId;

use anyhow::Result;
use std::sync::Arc;

pub struct MessageHandler {
    peer_id: String,
    version: String,
    storage: Arc<StorageManager>,
    cache: Arc<CoordinationCache>,
    channels: ChannelSet,
    backoff: Backoff,
}

impl MessageHandler {
    pub fn new(
        version: impl Into<String>,
        storage: Arc<StorageManager>,
        cache: Arc<CoordinationCache>,
        channels: ChannelSet,
        backoff: Backoff,
    ) -> Arc<Self> {
        Arc::new(Self {
            peer_id: storage.peer_id().to_string(),
            version: version.into(),
            storage,
            cache,
            channels,
            backoff,
        })
    }

    fn envelope(&self) -> Envelope {
        Envelope::new(self.version.clone(), self.peer_id.clone())
    }

    /// Decodes one datagram and runs it through the state machine.
    /// Malformed datagrams are logged and dropped.
    pub async fn handle_datagram(&self, header: Vec<String>, body: Option<Vec<u8>>) {
        let message = match Message::decode(&header, body) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Message discarded ({}): {}", e, header.join("|"));
                return;
            }
        };

        let kind = message.kind();
        if let Err(e) = self.handle_message(message).await {
            tracing::error!("Error handling {} message: {}", kind, e);
        }
    }

    pub async fn handle_message(&self, message: Message) -> Result<()> {
        tracing::debug!("Received {} from peer {}", message.kind(), message.sender());

        match message {
            Message::PutChunk {
                envelope,
                chunk,
                replication_degree,
                body,
            } => {
                self.handle_put_chunk(envelope, chunk, replication_degree, body)
                    .await?;
            }

            Message::Stored { chunk, .. } => {
                self.storage.signal_store_chunk(&chunk);
            }

            Message::GetChunk { chunk, .. } => {
                self.handle_get_chunk(chunk).await?;
            }

            Message::Chunk { chunk, body, .. } => {
                self.handle_chunk(chunk, body);
            }

            Message::Delete { file_id, .. } => {
                let removed = self.storage.delete_chunks(&file_id).await;
                if removed > 0 {
                    tracing::info!("Deleted {} chunks of {}", removed, file_id);
                }
            }

            Message::Removed { envelope, chunk } => {
                self.handle_removed(envelope, chunk).await?;
            }
        }

        Ok(())
    }

    async fn handle_put_chunk(
        &self,
        envelope: Envelope,
        chunk: ChunkId,
        replication_degree: u32,
        body: Vec<u8>,
    ) -> Result<()> {
        // Someone is already re-storing this chunk; a pending rescue of ours is redundant.
        if self.cache.take(&Flag::Rescue(chunk.clone())) {
            tracing::debug!("Rescue of {} overheard, cancelling", chunk);
        }

        if envelope.sender == self.peer_id || self.storage.is_initiator(&chunk.file_id) {
            return Ok(());
        }

        let already_held = self.storage.has_chunk(&chunk);
        if !self.storage.store_chunk(&chunk, replication_degree, &body).await {
            tracing::debug!("Not storing {}", chunk);
            return Ok(());
        }

        let flag = Flag::Stored(chunk.clone());
        if !self.cache.mark(flag.clone()) {
            tracing::debug!("Duplicate PUTCHUNK for {} while an ack is pending", chunk);
            return Ok(());
        }

        self.backoff.wait().await;
        self.cache.take(&flag);

        if !already_held && self.storage.get_chunk_replication(&chunk) >= replication_degree as i64 {
            tracing::debug!("{} already has {} copies, dropping ours", chunk, replication_degree);
            self.storage.discard_chunk(&chunk).await;
            return Ok(());
        }

        self.channels
            .send(&Message::Stored {
                envelope: self.envelope(),
                chunk,
            })
            .await?;

        Ok(())
    }

    async fn handle_get_chunk(&self, chunk: ChunkId) -> Result<()> {
        if !self.storage.has_chunk(&chunk) {
            return Ok(());
        }

        let flag = Flag::Response(chunk.clone());
        if !self.cache.mark(flag.clone()) {
            return Ok(());
        }

        self.backoff.wait().await;

        if !self.cache.take(&flag) {
            tracing::debug!("CHUNK {} answered by another peer", chunk);
            return Ok(());
        }

        let body = self.storage.read_chunk(&chunk).await?;
        self.channels
            .send(&Message::Chunk {
                envelope: self.envelope(),
                chunk,
                body,
            })
            .await?;

        Ok(())
    }

    fn handle_chunk(&self, chunk: ChunkId, body: Vec<u8>) {
        self.cache.take(&Flag::Response(chunk.clone()));

        if self.cache.deliver(&chunk, body) {
            tracing::debug!("Received payload of {}", chunk);
        }
    }

    /// Any holder that hears a REMOVED becomes a rescue candidate.
    async fn handle_removed(&self, envelope: Envelope, chunk: ChunkId) -> Result<()> {
        // Our own announcement, looped back after the record is already gone.
        if envelope.sender == self.peer_id {
            return Ok(());
        }

        let Some(record) = self.storage.signal_remove_chunk(&chunk) else {
            return Ok(());
        };

        let flag = Flag::Rescue(chunk.clone());
        if !self.cache.mark(flag.clone()) {
            return Ok(());
        }

        self.backoff.wait().await;

        if !self.cache.take(&flag) {
            return Ok(());
        }

        let body = self.storage.read_chunk(&chunk).await?;
        tracing::info!(
            "Re-replicating {} ({} of {} copies left)",
            chunk,
            record.perceived(),
            record.desired()
        );

        self.channels
            .send(&Message::PutChunk {
                envelope: self.envelope(),
                chunk,
                replication_degree: record.desired(),
                body,
            })
            .await?;

        Ok(())
    }
}
