//! Peer Module Tests
//!
//! End-to-end scenarios with several peers sharing an in-process loopback network.
//!
//! ## Test Scopes
//! - **Backup**: Degree reached with willing peers; fail-fast when a chunk fits nowhere.
//! - **Restore**: Byte-exact round trip, including the empty file.
//! - **Delete & Reclaim**: DELETE propagation, one REMOVED per eviction, re-replication.
//! - **Admin Surface**: HTTP handlers called directly.

#[cfg(test)]
mod tests {
    use crate::multicast::channel::{Channel, MAX_DATAGRAM_SIZE};
    use crate::multicast::loopback::LoopbackNetwork;
    use crate::multicast::message::Message;
    use crate::peer::config::{PeerConfig, RetryPolicy};
    use crate::peer::handlers::{handle_backup, handle_reclaim, handle_state};
    use crate::peer::protocol::{BackupRequest, ReclaimRequest};
    use crate::peer::service::Peer;
    use crate::protocol::backoff::Backoff;
    use crate::storage::types::ChunkId;
    use axum::{Extension, Json, http::StatusCode};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const ROUND: Duration = Duration::from_millis(150);

    fn fast_config(id: &str, root: &Path, capacity: u64) -> PeerConfig {
        PeerConfig::new(id, root)
            .with_capacity(capacity)
            .with_backoff(Backoff::Uniform(Duration::from_millis(20)))
            .with_backup_retry(RetryPolicy {
                attempts: 5,
                initial_wait: ROUND,
                max_wait: Duration::from_secs(5),
            })
            .with_restore_retry(RetryPolicy {
                attempts: 5,
                initial_wait: ROUND,
                max_wait: ROUND * 4,
            })
    }

    async fn start_peer(network: &LoopbackNetwork, config: PeerConfig) -> Arc<Peer> {
        let peer = Peer::new(config, network.join());
        peer.start().await;
        peer
    }

    async fn write_file(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
        tokio::fs::write(&path, data).await.unwrap();
        path
    }

    async fn eventually(condition: impl Fn() -> bool) -> bool {
        for _ in 0..150 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        condition()
    }

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
    async fn test_backup_reaches_degree_with_two_willing_peers() {
        let dir = TempDir::new().unwrap();
        let network = LoopbackNetwork::new();
        let initiator = start_peer(&network, fast_config("1", dir.path(), 1_000_000)).await;
        let b = start_peer(&network, fast_config("2", dir.path(), 1_000_000)).await;
        let c = start_peer(&network, fast_config("3", dir.path(), 1_000_000)).await;
        let path = write_file(dir.path(), "report.bin", 70_000).await;

        let succeeded = initiator.backup(&path, 2).await.unwrap();

        assert!(succeeded);
        let file_id = initiator.storage().file_id_for(&path).unwrap();
        for chunk_no in 0..2 {
            let chunk = ChunkId::new(file_id.clone(), chunk_no);
            assert!(initiator.storage().get_chunk_replication(&chunk) >= 2);
            assert!(b.storage().has_chunk(&chunk));
            assert!(c.storage().has_chunk(&chunk));
            assert!(!initiator.storage().has_chunk(&chunk), "Initiator keeps no copy");
        }
    }

    #[tokio::test]
    async fn test_backup_fails_when_chunk_fits_nowhere() {
        let dir = TempDir::new().unwrap();
        let network = LoopbackNetwork::new();
        let config = fast_config("1", dir.path(), 1_000_000).with_backup_retry(RetryPolicy {
            attempts: 2,
            initial_wait: ROUND,
            max_wait: Duration::from_secs(5),
        });
        let initiator = start_peer(&network, config).await;
        let b = start_peer(&network, fast_config("2", dir.path(), 10_000)).await;
        let c = start_peer(&network, fast_config("3", dir.path(), 10_000)).await;
        let path = write_file(dir.path(), "big.bin", 70_000).await;

        let succeeded = initiator.backup(&path, 2).await.unwrap();

        assert!(!succeeded, "64,000-byte chunk 0 exceeds every peer's capacity");
        let file_id = initiator.storage().file_id_for(&path).unwrap();
        let first = ChunkId::new(file_id.clone(), 0);
        let second = ChunkId::new(file_id, 1);
        for holder in [&b, &c] {
            assert!(!holder.storage().has_chunk(&first));
            assert!(holder.storage().has_chunk(&second), "Stored chunks stay stored");
        }
    }

    #[tokio::test]
    async fn test_backup_rejects_missing_file_and_zero_degree() {
        let dir = TempDir::new().unwrap();
        let network = LoopbackNetwork::new();
        let peer = start_peer(&network, fast_config("1", dir.path(), 1_000_000)).await;
        let path = write_file(dir.path(), "tiny.txt", 10).await;

        assert!(peer.backup(&dir.path().join("absent.txt"), 1).await.is_err());
        assert!(peer.backup(&path, 0).await.is_err());
        assert!(!peer.storage().is_backed_up(&path));
    }

    // ============================================================
    // RESTORE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_restore_reproduces_file() {
        let dir = TempDir::new().unwrap();
        let network = LoopbackNetwork::new();
        let initiator = start_peer(&network, fast_config("1", dir.path(), 1_000_000)).await;
        let _b = start_peer(&network, fast_config("2", dir.path(), 1_000_000)).await;
        let _c = start_peer(&network, fast_config("3", dir.path(), 1_000_000)).await;
        let path = write_file(dir.path(), "photo.raw", 150_000).await;
        assert!(initiator.backup(&path, 1).await.unwrap());

        let restored = initiator.restore(&path).await.unwrap();

        assert_eq!(restored, initiator.storage().disk().restored_dir().join("photo.raw"));
        let original = tokio::fs::read(&path).await.unwrap();
        let copy = tokio::fs::read(&restored).await.unwrap();
        assert_eq!(copy, original);
    }

    #[tokio::test]
    async fn test_empty_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let network = LoopbackNetwork::new();
        let initiator = start_peer(&network, fast_config("1", dir.path(), 1_000_000)).await;
        let _b = start_peer(&network, fast_config("2", dir.path(), 1_000_000)).await;
        let path = write_file(dir.path(), "empty.txt", 0).await;

        assert!(initiator.backup(&path, 1).await.unwrap());
        let file_id = initiator.storage().file_id_for(&path).unwrap();
        assert_eq!(initiator.storage().chunk_count(&file_id), Some(1));

        let restored = initiator.restore(&path).await.unwrap();
        assert!(tokio::fs::read(&restored).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_of_unknown_file_fails() {
        let dir = TempDir::new().unwrap();
        let network = LoopbackNetwork::new();
        let peer = start_peer(&network, fast_config("1", dir.path(), 1_000_000)).await;

        assert!(peer.restore(&dir.path().join("never.bin")).await.is_err());
    }

    #[tokio::test]
    async fn test_restore_fails_without_holders() {
        let dir = TempDir::new().unwrap();
        let network = LoopbackNetwork::new();
        let config = fast_config("1", dir.path(), 1_000_000).with_restore_retry(RetryPolicy {
            attempts: 2,
            initial_wait: Duration::from_millis(50),
            max_wait: Duration::from_millis(100),
        });
        let initiator = start_peer(&network, config).await;
        let path = write_file(dir.path(), "lonely.bin", 100).await;
        initiator.storage().generate_file_id(&path, 1).await.unwrap();

        assert!(initiator.restore(&path).await.is_err());
        assert!(
            !initiator
                .cache()
                .has_slot(&ChunkId::new(initiator.storage().file_id_for(&path).unwrap(), 0)),
            "Restore slot is closed after the attempt"
        );
    }

    // ============================================================
    // DELETE & RECLAIM TESTS
    // ============================================================

    #[tokio::test]
    async fn test_delete_reaches_every_holder() {
        let dir = TempDir::new().unwrap();
        let network = LoopbackNetwork::new();
        let initiator = start_peer(&network, fast_config("1", dir.path(), 1_000_000)).await;
        let b = start_peer(&network, fast_config("2", dir.path(), 1_000_000)).await;
        let c = start_peer(&network, fast_config("3", dir.path(), 1_000_000)).await;
        let path = write_file(dir.path(), "secret.txt", 5_000).await;
        assert!(initiator.backup(&path, 2).await.unwrap());
        let chunk = ChunkId::new(initiator.storage().file_id_for(&path).unwrap(), 0);

        initiator.delete(&path).await.unwrap();

        assert!(!initiator.storage().is_backed_up(&path));
        assert!(eventually(|| !b.storage().has_chunk(&chunk) && !c.storage().has_chunk(&chunk)).await);
        assert!(initiator.delete(&path).await.is_err(), "Nothing left to delete");
    }

    #[tokio::test]
    async fn test_reclaim_announces_each_eviction() {
        let dir = TempDir::new().unwrap();
        let network = LoopbackNetwork::new();
        let spy = network.join();
        let peer = Peer::new(fast_config("2", dir.path(), 100_000), network.join());
        let spare = ChunkId::new("x", 0);
        let needed = ChunkId::new("y", 0);
        peer.storage().store_chunk(&spare, 1, &vec![0u8; 30_000]).await;
        peer.storage().store_chunk(&needed, 1, &vec![0u8; 40_000]).await;
        for _ in 0..3 {
            peer.storage().signal_store_chunk(&spare);
        }
        peer.storage().signal_store_chunk(&needed);

        let evicted = peer.reclaim(50_000).await.unwrap();

        assert_eq!(evicted, vec![spare.clone()]);
        assert!(matches!(
            next_message(&spy.control, Duration::from_secs(1)).await,
            Some(Message::Removed { chunk, .. }) if chunk == spare
        ));
        assert!(next_message(&spy.control, Duration::from_millis(100)).await.is_none());
    }

    #[tokio::test]
    async fn test_reclaim_announces_evictions_in_order() {
        let dir = TempDir::new().unwrap();
        let network = LoopbackNetwork::new();
        let spy = network.join();
        let peer = Peer::new(fast_config("2", dir.path(), 100_000), network.join());
        let chunks: Vec<ChunkId> = (0..4).map(|n| ChunkId::new("spread", n)).collect();
        for (copies, chunk) in (1..=4).rev().zip(&chunks) {
            peer.storage().store_chunk(chunk, 1, &vec![0u8; 10_000]).await;
            for _ in 0..copies {
                peer.storage().signal_store_chunk(chunk);
            }
        }

        let evicted = peer.reclaim(10_000).await.unwrap();

        assert_eq!(evicted, chunks[..3].to_vec());
        for expected in &chunks[..3] {
            assert!(matches!(
                next_message(&spy.control, Duration::from_secs(1)).await,
                Some(Message::Removed { chunk, .. }) if &chunk == expected
            ));
        }
        assert!(next_message(&spy.control, Duration::from_millis(100)).await.is_none());
        assert!(peer.storage().has_chunk(&chunks[3]));
    }

    #[tokio::test]
    async fn test_reclaim_triggers_re_replication() {
        let dir = TempDir::new().unwrap();
        let network = LoopbackNetwork::new();
        let initiator = start_peer(&network, fast_config("1", dir.path(), 1_000_000)).await;
        let b = start_peer(&network, fast_config("2", dir.path(), 1_000_000)).await;
        let c = start_peer(&network, fast_config("3", dir.path(), 1_000_000)).await;
        let path = write_file(dir.path(), "important.doc", 1_000).await;
        assert!(initiator.backup(&path, 2).await.unwrap());
        let chunk = ChunkId::new(initiator.storage().file_id_for(&path).unwrap(), 0);
        assert!(c.storage().has_chunk(&chunk));

        // A fresh peer joins with room to spare, then B gives its copy up.
        let d = start_peer(&network, fast_config("4", dir.path(), 1_000_000)).await;
        let evicted = b.reclaim(0).await.unwrap();

        assert_eq!(evicted, vec![chunk.clone()]);
        assert!(eventually(|| d.storage().has_chunk(&chunk)).await, "C re-replicated onto D");
        assert!(!b.storage().has_chunk(&chunk));
        assert!(eventually(|| initiator.storage().get_chunk_replication(&chunk) >= 2).await);
    }

    // ============================================================
    // ADMIN SURFACE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_admin_handlers() {
        let dir = TempDir::new().unwrap();
        let network = LoopbackNetwork::new();
        let peer = start_peer(&network, fast_config("1", dir.path(), 1_000_000)).await;

        let (status, Json(state)) = handle_state(Extension(peer.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.state.contains("Peer 1"));

        let (status, Json(response)) = handle_backup(
            Extension(peer.clone()),
            Json(BackupRequest {
                path: dir.path().join("missing").display().to_string(),
                replication_degree: 1,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.success);
        assert!(response.detail.is_some());

        let (status, Json(response)) =
            handle_reclaim(Extension(peer.clone()), Json(ReclaimRequest { max_bytes: 0 })).await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.success);
        assert_eq!(peer.storage().capacity().await, 0);
    }
}
