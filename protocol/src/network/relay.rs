//! # Relay
//!
//! Outbound side of znode gossip. Once a ping or announcement is accepted
//! (or created locally) the lifecycle hands it to a [`Relay`], which pushes
//! an inventory item to peers.
//!
//! [`RelayQueue`] collects outbound messages for the P2P layer to drain.
//! Every message is identified by its double SHA-256 hash; the queue keeps a
//! bounded set of recently relayed hashes so the same announcement is not
//! pushed twice.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::znode::{ZnodeBroadcast, ZnodePing};

/// Pushes accepted znode messages to peers.
pub trait Relay: Send + Sync {
    fn relay_ping(&self, ping: &ZnodePing);
    fn relay_broadcast(&self, broadcast: &ZnodeBroadcast);
}

/// A message waiting to be announced to peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Ping(ZnodePing),
    Broadcast(ZnodeBroadcast),
}

impl RelayMessage {
    pub fn hash(&self) -> [u8; 32] {
        match self {
            Self::Ping(p) => p.hash(),
            Self::Broadcast(b) => b.hash(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping(_) => "ping",
            Self::Broadcast(_) => "broadcast",
        }
    }
}

/// Default bound on the relayed-hash cache.
pub const DEFAULT_RELAY_CACHE_SIZE: usize = 10_000;

/// Queue of outbound znode messages with hash deduplication.
pub struct RelayQueue {
    pending: Mutex<VecDeque<RelayMessage>>,
    /// Hash -> insertion sequence number, for oldest-first eviction.
    relayed: DashMap<[u8; 32], u64>,
    seq: AtomicU64,
    cache_size: usize,
}

impl RelayQueue {
    pub fn new(cache_size: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            relayed: DashMap::new(),
            seq: AtomicU64::new(0),
            cache_size: cache_size.max(1),
        }
    }

    /// Takes every queued message, oldest first.
    pub fn drain(&self) -> Vec<RelayMessage> {
        self.pending.lock().drain(..).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn relayed_count(&self) -> usize {
        self.relayed.len()
    }

    fn enqueue(&self, message: RelayMessage) {
        let hash = message.hash();
        if self.relayed.contains_key(&hash) {
            trace!(kind = message.kind(), "message already relayed, skipping");
            return;
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.relayed.insert(hash, seq);
        self.maybe_evict();

        debug!(kind = message.kind(), hash = %hex::encode(&hash[..8]), "queued for relay");
        self.pending.lock().push_back(message);
    }

    /// Trims the relayed-hash cache to 75% once it exceeds its bound.
    fn maybe_evict(&self) {
        if self.relayed.len() <= self.cache_size {
            return;
        }
        let target = self.cache_size * 3 / 4;
        let mut entries: Vec<([u8; 32], u64)> = self
            .relayed
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        entries.sort_by_key(|(_, seq)| *seq);

        let to_remove = entries.len().saturating_sub(target);
        for (hash, _) in entries.iter().take(to_remove) {
            self.relayed.remove(hash);
        }
    }
}

impl Default for RelayQueue {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_CACHE_SIZE)
    }
}

impl Relay for RelayQueue {
    fn relay_ping(&self, ping: &ZnodePing) {
        self.enqueue(RelayMessage::Ping(ping.clone()));
    }

    fn relay_broadcast(&self, broadcast: &ZnodeBroadcast) {
        self.enqueue(RelayMessage::Broadcast(broadcast.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{BlockHash, OutPoint};

    fn ping(sig_time: i64) -> ZnodePing {
        ZnodePing {
            outpoint: OutPoint::new([1; 32], 0),
            anchor: BlockHash([2; 32]),
            sig_time,
            signature: Default::default(),
        }
    }

    #[test]
    fn duplicate_messages_are_queued_once() {
        let queue = RelayQueue::default();
        queue.relay_ping(&ping(100));
        queue.relay_ping(&ping(100));
        queue.relay_ping(&ping(200));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0], RelayMessage::Ping(ping(100)));
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn cache_is_bounded() {
        let queue = RelayQueue::new(8);
        for t in 0..20 {
            queue.relay_ping(&ping(t));
        }
        assert!(queue.relayed_count() <= 8);
        assert_eq!(queue.drain().len(), 20);
    }
}
