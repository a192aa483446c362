//! # Znode Lifecycle
//!
//! Znodes are collateral-backed service nodes. Each one is announced by a
//! [`ZnodeBroadcast`] signed with its collateral key, then kept alive by a
//! stream of [`ZnodePing`]s signed with its operating key. This module
//! validates both message kinds as they arrive from gossip and maintains a
//! [`ZnodeRecord`] per collateral outpoint whose lifecycle state decides
//! whether the node is eligible for payment.
//!
//! ```text
//! error.rs      : ZnodeError, DoS weights, error classes
//! state.rs      : ZnodeState
//! identity.rs   : NodeIdentity
//! codec.rs      : signed byte strings and gossip hashes
//! env.rs        : ZnodeEnv (shared collaborators) and CheckScope
//! ping.rs       : ZnodePing
//! broadcast.rs  : ZnodeBroadcast
//! record.rs     : ZnodeRecord, the Znode lock wrapper, ZnodeInfo
//! ```
//!
//! Nothing in here panics on hostile input. Every rejection is a
//! [`ZnodeError`] whose [`dos_weight`](ZnodeError::dos_weight) tells the
//! peer layer how much to blame the sender.

pub mod broadcast;
pub mod codec;
pub mod env;
pub mod error;
pub mod identity;
pub mod ping;
pub mod record;
pub mod state;

pub use broadcast::{AnnounceRequest, CollateralCheck, UpdateOutcome, ZnodeBroadcast};
pub use env::{CheckScope, ZnodeEnv};
pub use error::{ErrorClass, KeyRole, SignedMessage, ZnodeError};
pub use identity::NodeIdentity;
pub use ping::ZnodePing;
pub use record::{Znode, ZnodeInfo, ZnodeRecord};
pub use state::ZnodeState;
