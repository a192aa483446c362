//! In-memory chain state. Backs the tests and the daemon until it is wired
//! to a real block index.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use super::{BlockHash, BlockRef, ChainStateOracle, Coin, OutPoint};
use crate::crypto::double_sha256;

/// Ordered chain of blocks plus a UTXO map.
#[derive(Debug, Clone, Default)]
pub struct MemoryChain {
    blocks: Vec<BlockRef>,
    by_hash: HashMap<BlockHash, usize>,
    coins: HashMap<OutPoint, Coin>,
}

impl MemoryChain {
    /// Empty chain, not even a genesis block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain of `count` blocks starting at `start_time`, `spacing` seconds apart.
    /// The tip ends up at height `count - 1`.
    pub fn with_blocks(count: u32, start_time: i64, spacing: i64) -> Self {
        let mut chain = Self::new();
        for i in 0..count {
            chain.push_block(start_time + i as i64 * spacing);
        }
        chain
    }

    /// Appends a block at the tip.
    pub fn push_block(&mut self, time: i64) -> BlockRef {
        let height = self.blocks.len() as u32;
        let mut preimage = Vec::with_capacity(12);
        preimage.extend_from_slice(&height.to_le_bytes());
        preimage.extend_from_slice(&time.to_le_bytes());
        let block = BlockRef {
            hash: BlockHash(double_sha256(&preimage)),
            height,
            time,
        };
        self.by_hash.insert(block.hash, self.blocks.len());
        self.blocks.push(block);
        block
    }

    /// Latest block, if any.
    pub fn tip(&self) -> Option<&BlockRef> {
        self.blocks.last()
    }

    /// Records an unspent output confirmed at `height`.
    pub fn add_coin(&mut self, outpoint: OutPoint, value: u64, height: u32) {
        self.coins.insert(
            outpoint,
            Coin {
                value,
                spent: false,
                height,
            },
        );
    }

    /// Marks an output spent. Returns `false` if it was unknown.
    pub fn spend(&mut self, outpoint: &OutPoint) -> bool {
        match self.coins.get_mut(outpoint) {
            Some(coin) => {
                coin.spent = true;
                true
            }
            None => false,
        }
    }
}

impl ChainStateOracle for MemoryChain {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.get(outpoint).copied()
    }

    fn current_height(&self) -> Option<u32> {
        self.tip().map(|b| b.height)
    }

    fn block_at(&self, height: u32) -> Option<BlockRef> {
        self.blocks.get(height as usize).copied()
    }

    fn block_index_lookup(&self, hash: &BlockHash) -> Option<BlockRef> {
        self.by_hash.get(hash).map(|&i| self.blocks[i])
    }

    fn is_routable(&self, addr: &SocketAddr) -> bool {
        match addr.ip() {
            IpAddr::V4(ip) => {
                !(ip.is_private()
                    || ip.is_loopback()
                    || ip.is_link_local()
                    || ip.is_broadcast()
                    || ip.is_documentation()
                    || ip.is_unspecified())
            }
            IpAddr::V6(ip) => !(ip.is_loopback() || ip.is_unspecified()),
        }
    }
}
