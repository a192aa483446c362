//! Collaborators every lifecycle operation needs, bundled so they can be
//! passed around explicitly instead of living in globals.

use std::sync::Arc;

use crate::chain::{ChainHandle, ChainStateOracle};
use crate::clock::Clock;
use crate::config::NetworkParams;
use crate::network::{Relay, SyncTracker};
use crate::znode::NodeIdentity;

/// Shared environment of the znode core.
pub struct ZnodeEnv<C> {
    pub chain: ChainHandle<C>,
    pub params: NetworkParams,
    pub clock: Arc<dyn Clock>,
    pub sync: Arc<dyn SyncTracker>,
    pub relay: Arc<dyn Relay>,
    /// Skips the collateral lookup in `check`. Only for tests that do not
    /// model the UTXO set.
    pub unit_test: bool,
}

impl<C: ChainStateOracle> ZnodeEnv<C> {
    pub fn new(
        chain: ChainHandle<C>,
        params: NetworkParams,
        clock: Arc<dyn Clock>,
        sync: Arc<dyn SyncTracker>,
        relay: Arc<dyn Relay>,
    ) -> Self {
        Self {
            chain,
            params,
            clock,
            sync,
            relay,
            unit_test: false,
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }
}

impl<C> Clone for ZnodeEnv<C> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            params: self.params.clone(),
            clock: Arc::clone(&self.clock),
            sync: Arc::clone(&self.sync),
            relay: Arc::clone(&self.relay),
            unit_test: self.unit_test,
        }
    }
}

/// Per-call context: which node is us, and how long a PoSe ban lasts.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckScope<'a> {
    /// Identity of the znode this process operates, if any.
    pub local: Option<&'a NodeIdentity>,
    /// Blocks in one payment cycle. A PoSe ban lasts this long.
    pub payment_cycle: u32,
    /// Whether watchdog votes have been seen recently. Stale votes only
    /// expire records while this holds.
    pub watchdog_active: bool,
}

impl<'a> CheckScope<'a> {
    pub fn new(local: Option<&'a NodeIdentity>, payment_cycle: u32) -> Self {
        Self {
            local,
            payment_cycle,
            watchdog_active: false,
        }
    }

    pub fn with_watchdog(mut self, active: bool) -> Self {
        self.watchdog_active = active;
        self
    }

    /// Whether `identity` belongs to the local node.
    pub fn is_local(&self, identity: &NodeIdentity) -> bool {
        self.local.map_or(false, |local| identity.is_operated_by(local))
    }
}
