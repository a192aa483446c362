//! # Chain State
//!
//! The znode core does not own the blockchain. It asks a
//! [`ChainStateOracle`] three kinds of questions:
//!
//! ```text
//! get_coin(outpoint)          : collateral presence, spent flag, depth
//! current_height / block_at   : tip height and block N
//! block_index_lookup(hash)    : known ping anchors
//! ```
//!
//! The oracle sits behind a [`ChainHandle`]: a shared `RwLock` that the
//! block-connection code write-locks while it updates the tip. Callers that
//! must not stall behind it (`Znode::check`, collateral verification) take
//! [`ChainHandle::try_view`] and defer their work when it returns `None`.

pub mod memory;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

pub use memory::MemoryChain;

// ---------------------------------------------------------------------------
// Chain Types
// ---------------------------------------------------------------------------

/// Reference to a transaction output. Identifies a znode by its collateral.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// Hash of the transaction holding the output.
    pub txid: [u8; 32],
    /// Output index inside that transaction.
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: [u8; 32], index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", hex::encode(self.txid), self.index)
    }
}

impl fmt::Debug for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutPoint({})", self)
    }
}

/// Block identifier.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", &hex::encode(self.0)[..16])
    }
}

/// An unspent (or spent) output as the UTXO index reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Output value in the smallest currency unit.
    pub value: u64,
    /// Whether the output has been spent on the active chain.
    pub spent: bool,
    /// Height of the block that confirmed the output.
    pub height: u32,
}

/// A block on the active chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub hash: BlockHash,
    pub height: u32,
    /// Block timestamp, Unix seconds.
    pub time: i64,
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Read-only questions the znode core asks the chain.
pub trait ChainStateOracle: Send + Sync {
    /// Looks up an output in the UTXO set.
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin>;

    /// Height of the active tip, `None` before genesis is connected.
    fn current_height(&self) -> Option<u32>;

    /// Block at `height` on the active chain.
    fn block_at(&self, height: u32) -> Option<BlockRef>;

    /// Looks a block up by hash in the block index.
    fn block_index_lookup(&self, hash: &BlockHash) -> Option<BlockRef>;

    /// Whether `addr` is publicly routable from this network.
    fn is_routable(&self, addr: &SocketAddr) -> bool;
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Shared, lock-guarded access to the chain state.
pub struct ChainHandle<C> {
    inner: Arc<RwLock<C>>,
}

impl<C: ChainStateOracle> ChainHandle<C> {
    pub fn new(chain: C) -> Self {
        Self {
            inner: Arc::new(RwLock::new(chain)),
        }
    }

    /// Blocking read access.
    pub fn view(&self) -> RwLockReadGuard<'_, C> {
        self.inner.read()
    }

    /// Non-blocking read access. `None` while the chain is being updated.
    pub fn try_view(&self) -> Option<RwLockReadGuard<'_, C>> {
        self.inner.try_read()
    }

    /// Exclusive access for the code that connects blocks.
    pub fn write(&self) -> RwLockWriteGuard<'_, C> {
        self.inner.write()
    }
}

impl<C> Clone for ChainHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
