use crate::bencode::Value;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::net::SocketAddr;
use tokio::sync::Notify;

/// One harvested `announce_peer` event.
#[derive(Debug, Clone)]
pub struct Announcement {
    /// The full decoded message, kept for downstream consumers.
    pub raw: BTreeMap<Bytes, Value>,
    /// UDP source of the announce.
    pub source: SocketAddr,
    /// Address the peer claims to serve the content on.
    pub peer: SocketAddr,
    pub info_hash: [u8; 20],
    pub info_hash_hex: String,
}

impl Announcement {
    pub fn new(
        raw: BTreeMap<Bytes, Value>,
        source: SocketAddr,
        peer: SocketAddr,
        info_hash: [u8; 20],
    ) -> Self {
        let mut info_hash_hex = String::with_capacity(40);
        for byte in &info_hash {
            let _ = write!(info_hash_hex, "{:02x}", byte);
        }

        Self {
            raw,
            source,
            peer,
            info_hash,
            info_hash_hex,
        }
    }
}

/// Bounded FIFO queue of harvested announcements with a coalesced
/// ready signal.
///
/// `push` refuses new entries at capacity instead of evicting old ones;
/// back-pressure is applied to the producer by refusal, never blocking.
/// The consumer waits on [`ready`](AnnouncementStore::ready) and is
/// expected to [`drain`](AnnouncementStore::drain) everything on each
/// wake-up, since the signal carries no count.
pub struct AnnouncementStore {
    queue: Mutex<VecDeque<Announcement>>,
    capacity: usize,
    signal: Notify,
}

impl AnnouncementStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity,
            signal: Notify::new(),
        }
    }

    /// Appends an announcement, returning `false` when the queue is full.
    ///
    /// On success one wake-up permit is stored on the ready signal.
    /// Permits do not stack: a consumer sees at least one wake-up per
    /// drain cycle, not one per item.
    pub fn push(&self, announcement: Announcement) -> bool {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                return false;
            }
            queue.push_back(announcement);
        }
        self.signal.notify_one();
        true
    }

    pub fn pop(&self) -> Option<Announcement> {
        self.queue.lock().pop_front()
    }

    /// Removes and returns everything currently queued, in push order.
    pub fn drain(&self) -> Vec<Announcement> {
        self.queue.lock().drain(..).collect()
    }

    /// Waits until at least one announcement has been pushed since the
    /// last wake-up.
    pub async fn ready(&self) {
        self.signal.notified().await;
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
