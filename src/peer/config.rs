//! Peer configuration and protocol constants.

use crate::multicast::message::PROTOCOL_VERSION;
use crate::protocol::backoff::Backoff;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

/// PUTCHUNK rounds per chunk before a backup gives up.
pub const BACKUP_ATTEMPTS: usize = 5;
/// GETCHUNK rounds per chunk before a restore gives up.
pub const RESTORE_ATTEMPTS: usize = 5;
pub const INITIAL_RETRY_WAIT: Duration = Duration::from_millis(1000);
pub const MAX_RESTORE_WAIT: Duration = Duration::from_millis(8000);

pub const BACKUP_WORKERS: usize = 50;
pub const RESTORE_WORKERS: usize = 20;
pub const DISPATCH_WORKERS: usize = 64;

/// Default local storage budget: 1 GB.
pub const DEFAULT_CAPACITY: u64 = 1_000_000_000;

/// Doubling waits between rounds of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub initial_wait: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub fn backup() -> Self {
        Self {
            attempts: BACKUP_ATTEMPTS,
            initial_wait: INITIAL_RETRY_WAIT,
            max_wait: Duration::MAX,
        }
    }

    pub fn restore() -> Self {
        Self {
            attempts: RESTORE_ATTEMPTS,
            initial_wait: INITIAL_RETRY_WAIT,
            max_wait: MAX_RESTORE_WAIT,
        }
    }

    /// The wait after each attempt: `initial, 2*initial, ...`, capped at `max_wait`.
    pub fn waits(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut next = self.initial_wait;
        (0..self.attempts).map(move |_| {
            let wait = next.min(self.max_wait);
            next = next.saturating_mul(2);
            wait
        })
    }
}

/// The three multicast groups a peer joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulticastConfig {
    pub control: SocketAddrV4,
    pub backup: SocketAddrV4,
    pub restore: SocketAddrV4,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            control: SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 1), 8001),
            backup: SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 2), 8002),
            restore: SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 3), 8003),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub peer_id: String,
    pub protocol_version: String,
    pub storage_root: PathBuf,
    pub capacity: u64,
    pub backoff: Backoff,
    pub backup_retry: RetryPolicy,
    pub restore_retry: RetryPolicy,
    pub backup_workers: usize,
    pub restore_workers: usize,
    pub dispatch_workers: usize,
}

impl PeerConfig {
    pub fn new(peer_id: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            peer_id: peer_id.into(),
            storage_root: storage_root.into(),
            ..Self::default()
        }
    }

    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_backup_retry(mut self, retry: RetryPolicy) -> Self {
        self.backup_retry = retry;
        self
    }

    pub fn with_restore_retry(mut self, retry: RetryPolicy) -> Self {
        self.restore_retry = retry;
        self
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            peer_id: uuid::Uuid::new_v4().to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            storage_root: PathBuf::from("storage"),
            capacity: DEFAULT_CAPACITY,
            backoff: Backoff::default(),
            backup_retry: RetryPolicy::backup(),
            restore_retry: RetryPolicy::restore(),
            backup_workers: BACKUP_WORKERS,
            restore_workers: RESTORE_WORKERS,
            dispatch_workers: DISPATCH_WORKERS,
        }
    }
}
