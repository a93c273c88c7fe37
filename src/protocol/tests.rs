//! Protocol Module Tests
//!
//! Runs message handlers of several peers over an in-process loopback network.
//!
//! ## Test Scopes
//! - **Backup**: PUTCHUNK storage, STORED acknowledgement and ack suppression.
//! - **Restore**: Concurrent holders answer a GETCHUNK with exactly one CHUNK.
//! - **Maintenance**: DELETE, REMOVED bookkeeping and re-replication (rescue).
//! - **Robustness**: Malformed datagrams and messages from the peer itself.

#[cfg(test)]
mod tests {
    use crate::coordination::cache::{CoordinationCache, Flag};
    use crate::multicast::channel::{Channel, ChannelSet, MAX_DATAGRAM_SIZE};
    use crate::multicast::loopback::LoopbackNetwork;
    use crate::multicast::message::{Envelope, Message, PROTOCOL_VERSION};
    use crate::protocol::backoff::Backoff;
    use crate::protocol::dispatcher::Dispatcher;
    use crate::protocol::handler::MessageHandler;
    use crate::storage::manager::StorageManager;
    use crate::storage::types::ChunkId;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct TestPeer {
        dir: TempDir,
        storage: Arc<StorageManager>,
        cache: Arc<CoordinationCache>,
        channels: ChannelSet,
        handler: Arc<MessageHandler>,
    }

    impl TestPeer {
        fn new(network: &LoopbackNetwork, id: &str, backoff: Backoff) -> Self {
            Self::with_cache(network, id, backoff, CoordinationCache::new())
        }

        fn with_cache(
            network: &LoopbackNetwork,
            id: &str,
            backoff: Backoff,
            cache: Arc<CoordinationCache>,
        ) -> Self {
            let dir = TempDir::new().expect("Failed to create temp dir");
            let storage = Arc::new(StorageManager::new(id, dir.path(), 1_000_000));
            let channels = network.join();
            let handler = MessageHandler::new(
                PROTOCOL_VERSION,
                storage.clone(),
                cache.clone(),
                channels.clone(),
                backoff,
            );

            Self {
                dir,
                storage,
                cache,
                channels,
                handler,
            }
        }

        fn listen(&self) {
            Dispatcher::new(self.handler.clone(), 8).start(&self.channels);
        }
    }

    fn envelope(sender: &str) -> Envelope {
        Envelope::new(PROTOCOL_VERSION, sender)
    }

    fn put_chunk(sender: &str, chunk: &ChunkId, degree: u32, body: &[u8]) -> Message {
        Message::PutChunk {
            envelope: envelope(sender),
            chunk: chunk.clone(),
            replication_degree: degree,
            body: body.to_vec(),
        }
    }

    /// Next decodable message on `channel`, or None once `wait` passes in silence.
    async fn next_message(channel: &Channel, wait: Duration) -> Option<Message> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (header, body) = tokio::time::timeout(wait, channel.receive(&mut buf))
                .await
                .ok()?
                .ok()?;
            if let Ok(message) = Message::decode(&header, body) {
                return Some(message);
            }
        }
    }

    // ============================================================
    // BACKUP TESTS
    // ============================================================

    #[tokio::test]
    async fn test_putchunk_is_stored_and_acknowledged() {
        let network = LoopbackNetwork::new();
        let spy = network.join();
        let holder = TestPeer::new(&network, "2", Backoff::Fixed(Duration::ZERO));
        holder.listen();
        let chunk = ChunkId::new("file", 0);

        spy.send(&put_chunk("1", &chunk, 1, b"abc")).await.unwrap();

        let reply = next_message(&spy.control, Duration::from_secs(2)).await;
        assert_eq!(
            reply,
            Some(Message::Stored {
                envelope: envelope("2"),
                chunk: chunk.clone(),
            })
        );
        assert!(holder.storage.has_chunk(&chunk));
        assert_eq!(holder.storage.read_chunk(&chunk).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_own_putchunk_is_ignored() {
        let network = LoopbackNetwork::new();
        let peer = TestPeer::new(&network, "1", Backoff::Fixed(Duration::ZERO));
        let chunk = ChunkId::new("file", 0);

        peer.handler
            .handle_message(put_chunk("1", &chunk, 1, b"abc"))
            .await
            .unwrap();

        assert!(!peer.storage.has_chunk(&chunk));
    }

    #[tokio::test]
    async fn test_initiator_does_not_store_its_own_file() {
        let network = LoopbackNetwork::new();
        let peer = TestPeer::new(&network, "1", Backoff::Fixed(Duration::ZERO));
        let path = peer.dir.path().join("mine.txt");
        tokio::fs::write(&path, b"data").await.unwrap();
        let file_id = peer.storage.generate_file_id(&path, 1).await.unwrap();
        let chunk = ChunkId::new(file_id, 0);

        peer.handler
            .handle_message(put_chunk("9", &chunk, 1, b"data"))
            .await
            .unwrap();

        assert!(!peer.storage.has_chunk(&chunk));
    }

    #[tokio::test]
    async fn test_ack_suppressed_when_degree_already_met() {
        let network = LoopbackNetwork::new();
        let spy = network.join();
        let holder = TestPeer::new(&network, "3", Backoff::Fixed(Duration::from_millis(150)));
        let chunk = ChunkId::new("file", 1);

        let handling = {
            let handler = holder.handler.clone();
            let message = put_chunk("1", &chunk, 1, &[5u8; 1_000]);
            tokio::spawn(async move { handler.handle_message(message).await })
        };

        // Another peer's STORED arrives during the backoff.
        tokio::time::sleep(Duration::from_millis(30)).await;
        holder.storage.signal_store_chunk(&chunk);
        handling.await.unwrap().unwrap();

        assert!(!holder.storage.has_chunk(&chunk), "Surplus copy is dropped");
        assert_eq!(holder.storage.used().await, 0);
        assert!(next_message(&spy.control, Duration::from_millis(100)).await.is_none());
    }

    #[tokio::test]
    async fn test_held_chunk_is_acknowledged_again() {
        let network = LoopbackNetwork::new();
        let spy = network.join();
        let holder = TestPeer::new(&network, "3", Backoff::Fixed(Duration::ZERO));
        let chunk = ChunkId::new("file", 2);
        holder.storage.store_chunk(&chunk, 1, b"xyz").await;
        holder.storage.signal_store_chunk(&chunk);
        holder.storage.signal_store_chunk(&chunk);

        holder
            .handler
            .handle_message(put_chunk("1", &chunk, 1, b"xyz"))
            .await
            .unwrap();

        assert!(holder.storage.has_chunk(&chunk));
        assert!(matches!(
            next_message(&spy.control, Duration::from_secs(1)).await,
            Some(Message::Stored { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_ack_flag_does_not_block_later_putchunk() {
        let network = LoopbackNetwork::new();
        let spy = network.join();
        let holder = TestPeer::with_cache(
            &network,
            "3",
            Backoff::Fixed(Duration::ZERO),
            CoordinationCache::with_flag_ttl(Duration::from_millis(50)),
        );
        let chunk = ChunkId::new("file", 5);

        // Left behind by a handler that was cut off before its take.
        assert!(holder.cache.mark(Flag::Stored(chunk.clone())));
        tokio::time::sleep(Duration::from_millis(100)).await;

        holder
            .handler
            .handle_message(put_chunk("1", &chunk, 1, b"late"))
            .await
            .unwrap();

        assert!(holder.storage.has_chunk(&chunk));
        assert_eq!(
            next_message(&spy.control, Duration::from_secs(1)).await,
            Some(Message::Stored {
                envelope: envelope("3"),
                chunk,
            })
        );
    }

    #[tokio::test]
    async fn test_stored_updates_replication() {
        let network = LoopbackNetwork::new();
        let peer = TestPeer::new(&network, "4", Backoff::default());
        let chunk = ChunkId::new("elsewhere", 3);

        for sender in ["1", "2"] {
            peer.handler
                .handle_message(Message::Stored {
                    envelope: envelope(sender),
                    chunk: chunk.clone(),
                })
                .await
                .unwrap();
        }

        assert_eq!(peer.storage.get_chunk_replication(&chunk), 2);
    }

    // ============================================================
    // RESTORE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_concurrent_holders_send_one_chunk() {
        let network = LoopbackNetwork::new();
        let spy = network.join();
        let fast = TestPeer::new(&network, "2", Backoff::Fixed(Duration::from_millis(10)));
        let slow = TestPeer::new(&network, "3", Backoff::Fixed(Duration::from_millis(250)));
        let chunk = ChunkId::new("file", 0);
        for holder in [&fast, &slow] {
            holder.storage.store_chunk(&chunk, 2, b"payload").await;
            holder.listen();
        }

        spy.send(&Message::GetChunk {
            envelope: envelope("1"),
            chunk: chunk.clone(),
        })
        .await
        .unwrap();

        let first = next_message(&spy.restore, Duration::from_secs(2)).await;
        assert_eq!(
            first,
            Some(Message::Chunk {
                envelope: envelope("2"),
                chunk: chunk.clone(),
                body: b"payload".to_vec(),
            })
        );
        assert!(
            next_message(&spy.restore, Duration::from_millis(500)).await.is_none(),
            "Slower holder overheard the answer and stayed silent"
        );
        assert!(!slow.cache.is_marked(&Flag::Response(chunk)));
    }

    #[tokio::test]
    async fn test_getchunk_for_unheld_chunk_is_ignored() {
        let network = LoopbackNetwork::new();
        let spy = network.join();
        let peer = TestPeer::new(&network, "2", Backoff::Fixed(Duration::ZERO));

        peer.handler
            .handle_message(Message::GetChunk {
                envelope: envelope("1"),
                chunk: ChunkId::new("unknown", 0),
            })
            .await
            .unwrap();

        assert!(next_message(&spy.restore, Duration::from_millis(100)).await.is_none());
    }

    #[tokio::test]
    async fn test_chunk_fills_open_slot() {
        let network = LoopbackNetwork::new();
        let peer = TestPeer::new(&network, "1", Backoff::default());
        let chunk = ChunkId::new("file", 4);
        let slot = peer.cache.open_slot(chunk.clone()).unwrap();

        peer.handler
            .handle_message(Message::Chunk {
                envelope: envelope("2"),
                chunk: chunk.clone(),
                body: vec![1, 2, 3],
            })
            .await
            .unwrap();

        assert_eq!(slot.take(), Some(vec![1, 2, 3]));
    }

    // ============================================================
    // DELETE & REMOVED TESTS
    // ============================================================

    #[tokio::test]
    async fn test_delete_drops_local_chunks() {
        let network = LoopbackNetwork::new();
        let peer = TestPeer::new(&network, "2", Backoff::default());
        peer.storage.store_chunk(&ChunkId::new("doomed", 0), 1, &[0; 100]).await;
        peer.storage.store_chunk(&ChunkId::new("doomed", 1), 1, &[0; 100]).await;

        peer.handler
            .handle_message(Message::Delete {
                envelope: envelope("1"),
                file_id: "doomed".to_string(),
            })
            .await
            .unwrap();

        assert!(!peer.storage.has_chunk(&ChunkId::new("doomed", 0)));
        assert_eq!(peer.storage.used().await, 0);
    }

    #[tokio::test]
    async fn test_removed_below_degree_triggers_rescue() {
        let network = LoopbackNetwork::new();
        let spy = network.join();
        let holder = TestPeer::new(&network, "2", Backoff::Fixed(Duration::from_millis(10)));
        let chunk = ChunkId::new("file", 0);
        holder.storage.store_chunk(&chunk, 2, b"precious").await;
        holder.storage.signal_store_chunk(&chunk);
        holder.storage.signal_store_chunk(&chunk);

        holder
            .handler
            .handle_message(Message::Removed {
                envelope: envelope("3"),
                chunk: chunk.clone(),
            })
            .await
            .unwrap();

        assert_eq!(holder.storage.chunk_record(&chunk).unwrap().perceived(), 1);
        assert_eq!(
            next_message(&spy.backup, Duration::from_secs(1)).await,
            Some(put_chunk("2", &chunk, 2, b"precious"))
        );
    }

    #[tokio::test]
    async fn test_removed_rescues_despite_inflated_count() {
        let network = LoopbackNetwork::new();
        let spy = network.join();
        let holder = TestPeer::new(&network, "2", Backoff::Fixed(Duration::from_millis(10)));
        let chunk = ChunkId::new("file", 0);
        holder.storage.store_chunk(&chunk, 2, b"last copy").await;
        // Two other holders acknowledged in two backup rounds each.
        for _ in 0..4 {
            holder.storage.signal_store_chunk(&chunk);
        }

        holder
            .handler
            .handle_message(Message::Removed {
                envelope: envelope("3"),
                chunk: chunk.clone(),
            })
            .await
            .unwrap();

        assert!(holder.storage.chunk_record(&chunk).unwrap().redundancy() >= 0);
        assert_eq!(
            next_message(&spy.backup, Duration::from_secs(1)).await,
            Some(put_chunk("2", &chunk, 2, b"last copy"))
        );
    }

    #[tokio::test]
    async fn test_own_removed_leaves_no_count_behind() {
        let network = LoopbackNetwork::new();
        let spy = network.join();
        let peer = TestPeer::new(&network, "2", Backoff::Fixed(Duration::ZERO));
        let chunk = ChunkId::new("file", 6);
        peer.storage.store_chunk(&chunk, 1, b"gone").await;
        assert_eq!(peer.storage.reclaim_space(0).await, vec![chunk.clone()]);

        // The REMOVED this peer announced comes back over the group.
        peer.handler
            .handle_message(Message::Removed {
                envelope: envelope("2"),
                chunk: chunk.clone(),
            })
            .await
            .unwrap();

        assert_eq!(peer.storage.get_chunk_replication(&chunk), -1);
        peer.storage.reclaim_space(1_000_000).await;
        assert!(peer.storage.store_chunk(&chunk, 1, b"back").await);
        assert_eq!(peer.storage.chunk_record(&chunk).unwrap().perceived(), 0);
        assert!(next_message(&spy.backup, Duration::from_millis(100)).await.is_none());
    }

    #[tokio::test]
    async fn test_overheard_putchunk_cancels_rescue() {
        let network = LoopbackNetwork::new();
        let spy = network.join();
        let holder = TestPeer::new(&network, "2", Backoff::Fixed(Duration::from_millis(200)));
        let chunk = ChunkId::new("file", 0);
        holder.storage.store_chunk(&chunk, 2, b"shared").await;
        holder.storage.signal_store_chunk(&chunk);

        let rescue = {
            let handler = holder.handler.clone();
            let message = Message::Removed {
                envelope: envelope("3"),
                chunk: chunk.clone(),
            };
            tokio::spawn(async move { handler.handle_message(message).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(holder.cache.is_marked(&Flag::Rescue(chunk.clone())));

        // Another holder re-stores the chunk first.
        holder
            .handler
            .handle_message(put_chunk("4", &chunk, 2, b"shared"))
            .await
            .unwrap();
        rescue.await.unwrap().unwrap();

        assert!(!holder.cache.is_marked(&Flag::Rescue(chunk)));

        assert!(next_message(&spy.backup, Duration::from_millis(100)).await.is_none());
    }

    // ============================================================
    // ROBUSTNESS TESTS
    // ============================================================

    #[tokio::test]
    async fn test_malformed_datagram_is_dropped() {
        let network = LoopbackNetwork::new();
        let peer = TestPeer::new(&network, "2", Backoff::Fixed(Duration::ZERO));

        peer.handler
            .handle_datagram(vec!["PUTCHUNK".to_string(), "1.0".to_string()], Some(vec![1]))
            .await;
        peer.handler.handle_datagram(Vec::new(), None).await;

        assert_eq!(peer.storage.used().await, 0);
    }
}
