use crate::storage::types::ChunkId;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Age after which a flag reads as absent.
pub const FLAG_TTL: Duration = Duration::from_secs(5);

/// Short-lived markers that let a peer cancel its own pending reply when it
/// overhears someone else's.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// A STORED for this chunk is scheduled after the backoff.
    Stored(ChunkId),
    /// A CHUNK answer for this chunk is scheduled after the backoff.
    Response(ChunkId),
    /// A re-replicating PUTCHUNK for this chunk is scheduled after the backoff.
    Rescue(ChunkId),
}

struct Slot {
    payload: Option<Vec<u8>>,
    notify: Arc<Notify>,
}

pub struct CoordinationCache {
    flags: DashMap<Flag, Instant>,
    slots: DashMap<ChunkId, Slot>,
    flag_ttl: Duration,
}

impl Default for CoordinationCache {
    fn default() -> Self {
        Self {
            flags: DashMap::new(),
            slots: DashMap::new(),
            flag_ttl: FLAG_TTL,
        }
    }
}

impl CoordinationCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_flag_ttl(flag_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            flag_ttl,
            ..Self::default()
        })
    }

    fn is_live(&self, set_at: &Instant) -> bool {
        set_at.elapsed() < self.flag_ttl
    }

    /// Sets `flag` if it is not set yet (or only stale). Returns false when it already was.
    pub fn mark(&self, flag: Flag) -> bool {
        match self.flags.entry(flag) {
            Entry::Occupied(mut existing) => {
                if self.is_live(existing.get()) {
                    return false;
                }
                tracing::debug!("Replacing stale flag {:?}", existing.key());
                existing.insert(Instant::now());
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                true
            }
        }
    }

    /// Clears `flag`, returning whether it was still set.
    pub fn take(&self, flag: &Flag) -> bool {
        self.flags
            .remove(flag)
            .is_some_and(|(_, set_at)| self.is_live(&set_at))
    }

    pub fn is_marked(&self, flag: &Flag) -> bool {
        self.flags.get(flag).is_some_and(|set_at| self.is_live(&set_at))
    }

    /// Opens the restore slot for `id`. The slot is closed when the guard drops.
    ///
    /// Returns None while another restore holds the slot of the same chunk.
    pub fn open_slot(self: &Arc<Self>, id: ChunkId) -> Option<RestoreSlot> {
        let notify = Arc::new(Notify::new());
        match self.slots.entry(id.clone()) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(slot) => {
                slot.insert(Slot {
                    payload: None,
                    notify: notify.clone(),
                });
            }
        }

        Some(RestoreSlot {
            cache: self.clone(),
            id,
            notify,
        })
    }

    /// Hands a received payload to an open slot. Payloads for chunks nobody
    /// is restoring are dropped.
    pub fn deliver(&self, id: &ChunkId, body: Vec<u8>) -> bool {
        match self.slots.get_mut(id) {
            Some(mut slot) => {
                if slot.payload.is_none() {
                    slot.payload = Some(body);
                    slot.notify.notify_one();
                }
                true
            }
            None => false,
        }
    }

    pub fn has_slot(&self, id: &ChunkId) -> bool {
        self.slots.contains_key(id)
    }

    fn take_payload(&self, id: &ChunkId) -> Option<Vec<u8>> {
        self.slots.get_mut(id).and_then(|mut slot| slot.payload.take())
    }

    fn close_slot(&self, id: &ChunkId) {
        self.slots.remove(id);
    }
}

/// An open restore slot for one chunk.
pub struct RestoreSlot {
    cache: Arc<CoordinationCache>,
    id: ChunkId,
    notify: Arc<Notify>,
}

impl RestoreSlot {
    pub fn id(&self) -> &ChunkId {
        &self.id
    }

    pub fn take(&self) -> Option<Vec<u8>> {
        self.cache.take_payload(&self.id)
    }

    /// Waits up to `timeout` for a payload to be delivered.
    pub async fn wait_for(&self, timeout: Duration) -> Option<Vec<u8>> {
        if let Some(payload) = self.take() {
            return Some(payload);
        }

        // notify_one stores a permit, so a delivery between the check above
        // and this wait is not missed.
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        self.take()
    }
}

impl Drop for RestoreSlot {
    fn drop(&mut self) {
        self.cache.close_slot(&self.id);
    }
}
