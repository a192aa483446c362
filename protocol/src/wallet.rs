//! # Collateral Wallet
//!
//! Announcing a znode needs the key pair that controls its collateral
//! output. The znode core never talks to a wallet directly; it asks a
//! [`CollateralWallet`] to resolve a `(tx hash, output index)` pair the
//! operator configured.
//!
//! [`KeyringWallet`] is a plain in-memory keyring. The daemon loads it from
//! its config file and the tests build one inline.

use std::fmt;

use parking_lot::RwLock;

use crate::chain::OutPoint;
use crate::crypto::{ZnodeKeypair, ZnodePublicKey};

/// A collateral output together with the key that can spend it.
#[derive(Clone)]
pub struct CollateralKeys {
    pub outpoint: OutPoint,
    pub keypair: ZnodeKeypair,
}

impl CollateralKeys {
    pub fn public_key(&self) -> ZnodePublicKey {
        self.keypair.public_key()
    }
}

impl fmt::Debug for CollateralKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollateralKeys")
            .field("outpoint", &self.outpoint)
            .field("public_key", &self.public_key())
            .finish()
    }
}

/// Looks up collateral outputs and their keys.
pub trait CollateralWallet: Send + Sync {
    /// Resolves the output `output_index` of transaction `tx_hash` (hex).
    /// `None` when the wallet does not control that output.
    fn resolve_collateral(&self, tx_hash: &str, output_index: u32) -> Option<CollateralKeys>;
}

/// In-memory collateral keyring.
#[derive(Default)]
pub struct KeyringWallet {
    entries: RwLock<Vec<CollateralKeys>>,
}

impl KeyringWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `keypair` as the owner of `outpoint`. Replaces any key
    /// already registered for that output.
    pub fn insert(&self, outpoint: OutPoint, keypair: ZnodeKeypair) {
        let mut entries = self.entries.write();
        entries.retain(|e| e.outpoint != outpoint);
        entries.push(CollateralKeys { outpoint, keypair });
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CollateralWallet for KeyringWallet {
    fn resolve_collateral(&self, tx_hash: &str, output_index: u32) -> Option<CollateralKeys> {
        let txid: [u8; 32] = hex::decode(tx_hash.trim()).ok()?.try_into().ok()?;
        let wanted = OutPoint::new(txid, output_index);
        self.entries
            .read()
            .iter()
            .find(|e| e.outpoint == wanted)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_output() {
        let wallet = KeyringWallet::new();
        let key = ZnodeKeypair::generate();
        let op = OutPoint::new([0x11; 32], 1);
        wallet.insert(op, key.clone());

        let found = wallet
            .resolve_collateral(&hex::encode([0x11; 32]), 1)
            .unwrap();
        assert_eq!(found.outpoint, op);
        assert_eq!(found.public_key(), key.public_key());
    }

    #[test]
    fn unknown_or_malformed_lookups_miss() {
        let wallet = KeyringWallet::new();
        wallet.insert(OutPoint::new([0x11; 32], 1), ZnodeKeypair::generate());

        assert!(wallet.resolve_collateral(&hex::encode([0x11; 32]), 0).is_none());
        assert!(wallet.resolve_collateral("not-hex", 1).is_none());
        assert!(wallet.resolve_collateral("abcd", 1).is_none());
    }

    #[test]
    fn insert_replaces_existing_owner() {
        let wallet = KeyringWallet::new();
        let op = OutPoint::new([0x22; 32], 0);
        wallet.insert(op, ZnodeKeypair::generate());
        let second = ZnodeKeypair::generate();
        wallet.insert(op, second.clone());

        assert_eq!(wallet.len(), 1);
        let found = wallet.resolve_collateral(&hex::encode([0x22; 32]), 0).unwrap();
        assert_eq!(found.public_key(), second.public_key());
    }
}
