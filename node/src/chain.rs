//! # Chain Source
//!
//! The daemon keeps chain state in a [`MemoryChain`]. A JSON seed fills it
//! at startup, the `/chain/*` API routes extend it afterwards, and
//! [`refresh_sync`] derives the sync status from how recent its tip is.
//!
//! ```json
//! {
//!   "blocks": 300,
//!   "genesis_time": 1700000000,
//!   "block_spacing": 150,
//!   "coins": [{ "txid": "42..42", "index": 0, "value": 100000000000, "height": 100 }]
//! }
//! ```

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use znode_protocol::chain::{ChainStateOracle, MemoryChain, OutPoint};
use znode_protocol::network::{SyncTracker, ZnodeSync};

/// The blockchain counts as synced while its tip is at most this old.
pub const BLOCKCHAIN_SYNC_WINDOW_SECONDS: i64 = 60 * 60;

const DEFAULT_BLOCK_SPACING: i64 = 150;

fn default_block_spacing() -> i64 {
    DEFAULT_BLOCK_SPACING
}

/// Initial chain contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainSeed {
    /// Number of blocks. The tip lands at height `blocks - 1`.
    pub blocks: u32,
    pub genesis_time: i64,
    #[serde(default = "default_block_spacing")]
    pub block_spacing: i64,
    #[serde(default)]
    pub coins: Vec<SeedCoin>,
}

/// An unspent output to place in the UTXO set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedCoin {
    /// Transaction hash, hex.
    pub txid: String,
    pub index: u32,
    pub value: u64,
    /// Confirmation height. The current tip when absent.
    #[serde(default)]
    pub height: Option<u32>,
}

impl ChainSeed {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read chain seed {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid chain seed {}", path.display()))
    }

    pub fn build(&self) -> Result<MemoryChain> {
        if self.block_spacing <= 0 {
            bail!("block_spacing must be positive, got {}", self.block_spacing);
        }
        let mut chain =
            MemoryChain::with_blocks(self.blocks, self.genesis_time, self.block_spacing);
        for coin in &self.coins {
            add_coin(&mut chain, coin)?;
        }
        Ok(chain)
    }
}

pub fn parse_outpoint(txid: &str, index: u32) -> Result<OutPoint> {
    let bytes = hex::decode(txid).with_context(|| format!("txid {txid} is not hex"))?;
    let txid: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow!("txid must be 32 bytes, got {}", b.len()))?;
    Ok(OutPoint::new(txid, index))
}

/// Adds `coin` to the UTXO set. Coins cannot be confirmed above the tip.
pub fn add_coin(chain: &mut MemoryChain, coin: &SeedCoin) -> Result<OutPoint> {
    let outpoint = parse_outpoint(&coin.txid, coin.index)?;
    let Some(tip) = chain.current_height() else {
        bail!("cannot confirm {outpoint} on an empty chain");
    };
    let height = coin.height.unwrap_or(tip);
    if height > tip {
        bail!("coin height {height} is above the tip {tip}");
    }
    chain.add_coin(outpoint, coin.value, height);
    Ok(outpoint)
}

/// Updates `sync` from the chain tip. Once the blockchain is synced the
/// list sync moves one stage per call. No peer serves list data, so each
/// stage finishes as soon as it starts.
pub fn refresh_sync(chain: &MemoryChain, sync: &ZnodeSync, now: i64) {
    let synced = chain
        .tip()
        .map_or(false, |tip| now.saturating_sub(tip.time) <= BLOCKCHAIN_SYNC_WINDOW_SECONDS);
    sync.set_blockchain_synced(synced);
    if synced && !sync.is_synced() {
        sync.advance();
    }
}
