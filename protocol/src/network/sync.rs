//! # Sync Status
//!
//! Tracks how far the node has come in catching up with the network. The
//! znode lifecycle consults it in three places:
//!
//! - announcements are refused until the blockchain is synced,
//! - records are held in their terminal states while the znode list is
//!   still syncing (so a slow list sync does not flap them),
//! - the watchdog rule only applies once everything is synced.
//!
//! Accepting list data pushes the list-sync timeout back via
//! [`SyncTracker::bump_list_timeout`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Read side of the sync state, plus the one write the lifecycle needs.
pub trait SyncTracker: Send + Sync {
    fn is_blockchain_synced(&self) -> bool;
    fn is_list_synced(&self) -> bool;
    fn is_synced(&self) -> bool;
    /// Notes that useful list data arrived, postponing the sync timeout.
    fn bump_list_timeout(&self);
}

/// Stages of the znode list sync, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum SyncStage {
    Initial = 0,
    List = 1,
    Winners = 2,
    Finished = 3,
}

impl SyncStage {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Initial,
            1 => Self::List,
            2 => Self::Winners,
            _ => Self::Finished,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::List => "list",
            Self::Winners => "winners",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free sync status shared between the P2P layer and the lifecycle.
#[derive(Debug, Default)]
pub struct ZnodeSync {
    blockchain_synced: AtomicBool,
    stage: AtomicU8,
    list_bumps: AtomicU64,
}

impl ZnodeSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker that reports everything as synced.
    pub fn synced() -> Self {
        let sync = Self::new();
        sync.set_blockchain_synced(true);
        sync.set_stage(SyncStage::Finished);
        sync
    }

    pub fn set_blockchain_synced(&self, synced: bool) {
        let was = self.blockchain_synced.swap(synced, Ordering::SeqCst);
        if was != synced {
            info!(synced, "blockchain sync status changed");
        }
    }

    pub fn stage(&self) -> SyncStage {
        SyncStage::from_u8(self.stage.load(Ordering::SeqCst))
    }

    pub fn set_stage(&self, stage: SyncStage) {
        let prev = SyncStage::from_u8(self.stage.swap(stage as u8, Ordering::SeqCst));
        if prev != stage {
            info!(from = %prev, to = %stage, "znode sync stage changed");
        }
    }

    /// Moves to the next stage. Stays put once finished.
    pub fn advance(&self) -> SyncStage {
        let next = match self.stage() {
            SyncStage::Initial => SyncStage::List,
            SyncStage::List => SyncStage::Winners,
            SyncStage::Winners | SyncStage::Finished => SyncStage::Finished,
        };
        self.set_stage(next);
        next
    }

    /// Number of times list data postponed the sync timeout.
    pub fn list_bumps(&self) -> u64 {
        self.list_bumps.load(Ordering::Relaxed)
    }
}

impl SyncTracker for ZnodeSync {
    fn is_blockchain_synced(&self) -> bool {
        self.blockchain_synced.load(Ordering::SeqCst)
    }

    fn is_list_synced(&self) -> bool {
        self.stage() > SyncStage::List
    }

    fn is_synced(&self) -> bool {
        self.stage() == SyncStage::Finished
    }

    fn bump_list_timeout(&self) {
        let bumps = self.list_bumps.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(bumps, "znode list sync timeout bumped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_gate_the_predicates() {
        let sync = ZnodeSync::new();
        assert!(!sync.is_blockchain_synced());
        assert!(!sync.is_list_synced());

        sync.set_stage(SyncStage::List);
        assert!(!sync.is_list_synced());

        sync.set_stage(SyncStage::Winners);
        assert!(sync.is_list_synced());
        assert!(!sync.is_synced());

        sync.set_stage(SyncStage::Finished);
        assert!(sync.is_synced());
    }

    #[test]
    fn synced_constructor_reports_everything_done() {
        let sync = ZnodeSync::synced();
        assert!(sync.is_blockchain_synced());
        assert!(sync.is_list_synced());
        assert!(sync.is_synced());
    }

    #[test]
    fn advance_walks_the_stages_in_order() {
        let sync = ZnodeSync::new();
        assert_eq!(sync.advance(), SyncStage::List);
        assert_eq!(sync.advance(), SyncStage::Winners);
        assert!(sync.is_list_synced());
        assert_eq!(sync.advance(), SyncStage::Finished);
        assert_eq!(sync.advance(), SyncStage::Finished);
        assert!(sync.is_synced());
    }

    #[test]
    fn bumps_are_counted() {
        let sync = ZnodeSync::new();
        sync.bump_list_timeout();
        sync.bump_list_timeout();
        assert_eq!(sync.list_bumps(), 2);
    }
}
