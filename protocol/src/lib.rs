// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Znode Protocol
//!
//! Lifecycle and gossip validation for znodes: collateral-backed service
//! nodes that announce themselves to the network, prove liveness with
//! periodic signed pings, and become eligible for payment only while they
//! keep doing so.
//!
//! ## Architecture
//!
//! - **config**: protocol constants, network modes, timing policy.
//! - **crypto**: Ed25519 keys, key identifiers, hashes.
//! - **chain**: the chain-state oracle the core queries, plus an in-memory
//!   implementation.
//! - **clock**: network-adjusted time.
//! - **wallet**: collateral key lookup for announcing a znode.
//! - **znode**: pings, announcements, records and the lifecycle state
//!   machine.
//! - **network**: the znode list, relay and sync status.
//!
//! ## Ground Rules
//!
//! 1. Hostile input never panics. It produces a `ZnodeError` with a DoS
//!    weight.
//! 2. No globals. Chain, clock, sync status and relay travel in a
//!    `ZnodeEnv`; the local identity and payment cycle in a `CheckScope`.
//! 3. Chain access from the lifecycle check never blocks.

pub mod chain;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod network;
pub mod wallet;
pub mod znode;

pub use chain::{ChainHandle, ChainStateOracle, MemoryChain, OutPoint};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{NetworkMode, NetworkParams, TimingPolicy};
pub use network::{Acceptance, Relay, RelayQueue, SyncTracker, ZnodeList, ZnodeSync};
pub use znode::{
    CheckScope, NodeIdentity, Znode, ZnodeBroadcast, ZnodeEnv, ZnodeError, ZnodePing, ZnodeState,
};
