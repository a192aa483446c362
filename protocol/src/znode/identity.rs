use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::chain::OutPoint;
use crate::crypto::ZnodePublicKey;

/// Who a znode is: its collateral, where it listens and which keys speak
/// for it. The outpoint is the unique key in the znode list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub outpoint: OutPoint,
    pub addr: SocketAddr,
    /// Key controlling the collateral. Signs announcements.
    pub collateral_pubkey: ZnodePublicKey,
    /// Day-to-day operating key. Signs pings.
    pub znode_pubkey: ZnodePublicKey,
    pub protocol_version: u32,
}

impl NodeIdentity {
    /// Whether this identity is run by the local node `local`.
    pub fn is_operated_by(&self, local: &NodeIdentity) -> bool {
        self.znode_pubkey == local.znode_pubkey
    }
}
