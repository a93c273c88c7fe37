//! Peer Service & Operation Orchestrators
//!
//! `Peer` owns every component of one participant (storage, coordination cache,
//! channels, message dispatch) and runs the whole-file operations. Backup and
//! restore fan out into one task per chunk, bounded by their own semaphores.

use super::config::PeerConfig;
use super::workers::{BackupWorker, RestoreWorker};
use crate::coordination::cache::{CoordinationCache, FLAG_TTL};
use crate::multicast::channel::ChannelSet;
use crate::multicast::message::{Envelope, Message};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handler::MessageHandler;
use crate::storage::manager::StorageManager;
use crate::storage::types::{ChunkId, StorageError};

use anyhow::{Result, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

pub struct Peer {
    config: PeerConfig,
    storage: Arc<StorageManager>,
    cache: Arc<CoordinationCache>,
    channels: ChannelSet,
    handler: Arc<MessageHandler>,
    backup_pool: Arc<Semaphore>,
    restore_pool: Arc<Semaphore>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl Peer {
    pub fn new(config: PeerConfig, channels: ChannelSet) -> Arc<Self> {
        let storage = Arc::new(StorageManager::new(
            config.peer_id.clone(),
            &config.storage_root,
            config.capacity,
        ));
        let flag_ttl = FLAG_TTL.max(config.backoff.max().saturating_mul(2));
        let cache = CoordinationCache::with_flag_ttl(flag_ttl);
        let handler = MessageHandler::new(
            config.protocol_version.clone(),
            storage.clone(),
            cache.clone(),
            channels.clone(),
            config.backoff,
        );

        Arc::new(Self {
            backup_pool: Arc::new(Semaphore::new(config.backup_workers)),
            restore_pool: Arc::new(Semaphore::new(config.restore_workers)),
            config,
            storage,
            cache,
            channels,
            handler,
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Starts the receive loops of all three channels.
    pub async fn start(self: &Arc<Self>) {
        tracing::info!("Starting peer {}...", self.config.peer_id);

        let dispatcher = Dispatcher::new(self.handler.clone(), self.config.dispatch_workers);
        let handles = dispatcher.start(&self.channels);
        self.listeners.lock().await.extend(handles);

        tracing::info!(
            "Peer {} ready (protocol {}, capacity {} bytes)",
            self.config.peer_id,
            self.config.protocol_version,
            self.config.capacity
        );
    }

    /// Stops receiving. Operations already running are left to finish.
    pub async fn shutdown(&self) {
        for handle in self.listeners.lock().await.drain(..) {
            handle.abort();
        }
        tracing::info!("Peer {} stopped listening", self.config.peer_id);
    }

    pub fn id(&self) -> &str {
        &self.config.peer_id
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    pub fn cache(&self) -> &Arc<CoordinationCache> {
        &self.cache
    }

    fn envelope(&self) -> Envelope {
        Envelope::new(self.config.protocol_version.clone(), self.config.peer_id.clone())
    }

    // ============================================================
    // OPERATIONS
    // ============================================================

    /// Backs up `path` with `replication_degree` copies of every chunk.
    ///
    /// Returns `Ok(false)` as soon as one chunk cannot reach the degree; the
    /// other chunk tasks are aborted and chunks already stored stay stored.
    pub async fn backup(&self, path: &Path, replication_degree: u32) -> Result<bool> {
        if replication_degree == 0 {
            bail!("replication degree must be at least 1");
        }

        if self.storage.is_backed_up(path) {
            tracing::info!("{} was backed up before, deleting the old backup", path.display());
            self.delete(path).await?;
        }

        let file_id = self.storage.generate_file_id(path, replication_degree).await?;
        let chunks = self.storage.retrieve_chunks(&file_id).await?;

        tracing::info!(
            "Backing up {} as {} ({} chunks, degree {})",
            path.display(),
            file_id,
            chunks.len(),
            replication_degree
        );

        let mut tasks = JoinSet::new();
        for (chunk_no, body) in chunks.into_iter().enumerate() {
            let chunk = ChunkId::new(file_id.clone(), chunk_no as u32);
            let worker = BackupWorker {
                channels: self.channels.clone(),
                storage: self.storage.clone(),
                envelope: self.envelope(),
                chunk: chunk.clone(),
                body,
                replication_degree,
                retry: self.config.backup_retry,
            };
            let pool = self.backup_pool.clone();

            tasks.spawn(async move {
                let Ok(_permit) = pool.acquire_owned().await else {
                    return (chunk, false);
                };
                (chunk, worker.run().await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (chunk, replicated) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tasks.abort_all();
                    return Err(e.into());
                }
            };

            if !replicated {
                tracing::warn!("Backup of {} failed: chunk {} not replicated", path.display(), chunk);
                tasks.abort_all();
                return Ok(false);
            }
        }

        tracing::info!("Backup of {} complete", path.display());
        Ok(true)
    }

    /// Fetches every chunk of a backed-up file and writes the file into the
    /// restore directory, returning where it was written.
    pub async fn restore(&self, path: &Path) -> Result<PathBuf> {
        let file_id = self
            .storage
            .file_id_for(path)
            .ok_or_else(|| StorageError::NotBackedUp(path.to_path_buf()))?;
        let chunk_count = self
            .storage
            .chunk_count(&file_id)
            .ok_or_else(|| StorageError::UnknownFileId(file_id.clone()))?;

        tracing::info!("Restoring {} ({} chunks)", path.display(), chunk_count);

        let mut tasks = JoinSet::new();
        for chunk_no in 0..chunk_count {
            let worker = RestoreWorker {
                channels: self.channels.clone(),
                cache: self.cache.clone(),
                envelope: self.envelope(),
                chunk: ChunkId::new(file_id.clone(), chunk_no as u32),
                retry: self.config.restore_retry,
            };
            let pool = self.restore_pool.clone();

            tasks.spawn(async move {
                let Ok(_permit) = pool.acquire_owned().await else {
                    return (chunk_no, None);
                };
                (chunk_no, worker.run().await)
            });
        }

        let mut chunks: Vec<Option<Vec<u8>>> = vec![None; chunk_count];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((chunk_no, Some(payload))) => chunks[chunk_no] = Some(payload),
                Ok((chunk_no, None)) => {
                    tasks.abort_all();
                    bail!("chunk {} of {} could not be restored", chunk_no, path.display());
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(e.into());
                }
            }
        }

        let chunks: Vec<Vec<u8>> = chunks.into_iter().flatten().collect();
        let restored = self.storage.restore_file(path, &chunks).await?;

        tracing::info!("Restored {} to {}", path.display(), restored.display());
        Ok(restored)
    }

    /// Forgets the backup of `path` and tells every holder to drop its chunks.
    pub async fn delete(&self, path: &Path) -> Result<()> {
        let file_id = self
            .storage
            .delete_file(path)
            .ok_or_else(|| StorageError::NotBackedUp(path.to_path_buf()))?;

        self.channels
            .send(&Message::Delete {
                envelope: self.envelope(),
                file_id: file_id.clone(),
            })
            .await?;

        tracing::info!("Deleted backup of {} ({})", path.display(), file_id);
        Ok(())
    }

    /// Shrinks local storage to `max_bytes`, announcing every evicted chunk.
    pub async fn reclaim(&self, max_bytes: u64) -> Result<Vec<ChunkId>> {
        let evicted = self.storage.reclaim_space(max_bytes).await;

        for chunk in &evicted {
            let removed = Message::Removed {
                envelope: self.envelope(),
                chunk: chunk.clone(),
            };
            if let Err(e) = self.channels.send(&removed).await {
                tracing::warn!("REMOVED {} not sent: {}", chunk, e);
            }
        }

        tracing::info!(
            "Reclaimed space down to {} bytes, {} chunks evicted",
            max_bytes,
            evicted.len()
        );
        Ok(evicted)
    }

    pub async fn state(&self) -> String {
        self.storage.get_state().await
    }
}
