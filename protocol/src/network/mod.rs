//! # Network Module
//!
//! The edges between the znode core and the P2P layer.
//!
//! ```text
//! list.rs   : ZnodeList, the registry gossip feeds into
//! relay.rs  : outbound relay of accepted pings and announcements
//! sync.rs   : blockchain / znode-list sync status
//! ```
//!
//! ## Design Decisions
//!
//! - The protocol crate does no socket I/O. Inbound messages arrive as typed
//!   values through `ZnodeList`; outbound ones leave through the `Relay`
//!   trait, which the daemon backs with a drainable queue.
//! - Deduplication is by double SHA-256 message hash, with bounded caches
//!   that evict oldest-first at 75% capacity.

pub mod list;
pub mod relay;
pub mod sync;

pub use list::{Acceptance, ZnodeList, DEFAULT_SEEN_CACHE_SIZE};
pub use relay::{Relay, RelayMessage, RelayQueue, DEFAULT_RELAY_CACHE_SIZE};
pub use sync::{SyncStage, SyncTracker, ZnodeSync};
