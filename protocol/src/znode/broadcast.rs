//! # Znode Announcements
//!
//! A [`ZnodeBroadcast`] ("mnb" on the wire) announces that a collateral
//! output backs a znode at a given address, run with a given operating key.
//! It is signed by the collateral key and carries a first ping signed by
//! the operating key.
//!
//! Incoming announcements go through three stages:
//!
//! 1. [`simple_check`](ZnodeBroadcast::simple_check): context-free sanity.
//! 2. For a known outpoint, [`update`](ZnodeBroadcast::update) merges the
//!    announcement into the existing record.
//! 3. For an unknown outpoint, [`check_outpoint`](ZnodeBroadcast::check_outpoint)
//!    verifies the collateral before the znode list creates a record.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chain::ChainStateOracle;
use crate::config::{
    NetworkParams, MAX_FUTURE_DRIFT_SECONDS, PROTOCOL_VERSION, ZNODE_MIN_MNB_SECONDS,
};
use crate::crypto::{ZnodeKeypair, ZnodePublicKey, ZnodeSignature, STANDARD_SCRIPT_LENGTH};
use crate::wallet::CollateralWallet;
use crate::znode::codec::{broadcast_message, message_hash};
use crate::znode::ping::PingTarget;
use crate::znode::{
    CheckScope, KeyRole, NodeIdentity, SignedMessage, Znode, ZnodeEnv, ZnodeError, ZnodePing,
    ZnodeState,
};

fn announced_state() -> ZnodeState {
    ZnodeState::Enabled
}

/// A signed znode announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZnodeBroadcast {
    pub identity: NodeIdentity,
    /// Spend-authorization script of the collateral input. Must be empty.
    pub script_sig: Vec<u8>,
    pub last_ping: Option<ZnodePing>,
    pub signature: ZnodeSignature,
    pub sig_time: i64,
    /// Set locally to re-apply an announcement with an unchanged sig time.
    #[serde(skip)]
    pub recovery: bool,
    /// State a record created from this announcement starts in.
    #[serde(skip, default = "announced_state")]
    pub provisional_state: ZnodeState,
}

/// What the operator asks for when announcing a znode.
#[derive(Debug, Clone, Copy)]
pub struct AnnounceRequest<'a> {
    pub service: SocketAddr,
    /// Collateral transaction hash, hex.
    pub collateral_tx: &'a str,
    pub collateral_index: u32,
    pub znode_key: &'a ZnodeKeypair,
}

/// Result of merging an announcement into an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The record now reflects the announcement.
    Applied,
    /// Valid, but the record was announced too recently to change again.
    Throttled,
}

/// Result of verifying a new announcement's collateral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollateralCheck {
    Verified,
    /// Our own announcement coming back to us. Nothing to do.
    LocalNode,
}

impl ZnodeBroadcast {
    /// Builds and signs an announcement for a collateral the wallet controls.
    ///
    /// `offline` skips the blockchain-sync requirement, for announcements
    /// prepared on a cold machine.
    pub fn create<C, W>(
        request: AnnounceRequest<'_>,
        wallet: &W,
        env: &ZnodeEnv<C>,
        offline: bool,
    ) -> Result<Self, ZnodeError>
    where
        C: ChainStateOracle,
        W: CollateralWallet + ?Sized,
    {
        if !offline && !env.sync.is_blockchain_synced() {
            return Err(ZnodeError::SyncIncomplete);
        }

        let collateral = wallet
            .resolve_collateral(request.collateral_tx, request.collateral_index)
            .ok_or_else(|| {
                ZnodeError::NoCollateral(format!(
                    "{}:{}",
                    request.collateral_tx, request.collateral_index
                ))
            })?;

        let port = request.service.port();
        if !env.params.is_valid_service_port(port) {
            return Err(ZnodeError::PortMismatch {
                port,
                network: env.params.mode,
            });
        }

        let mut ping = {
            let chain = env.chain.view();
            ZnodePing::new(collateral.outpoint, &*chain, env.clock.as_ref())?
        };
        ping.sign(request.znode_key, env.clock.as_ref())?;

        let mut mnb = Self {
            identity: NodeIdentity {
                outpoint: collateral.outpoint,
                addr: request.service,
                collateral_pubkey: collateral.public_key(),
                znode_pubkey: request.znode_key.public_key(),
                protocol_version: PROTOCOL_VERSION,
            },
            script_sig: Vec::new(),
            last_ping: Some(ping),
            signature: ZnodeSignature::default(),
            sig_time: env.now(),
            recovery: false,
            provisional_state: announced_state(),
        };

        if !mnb.is_valid_net_addr(&*env.chain.view(), &env.params) {
            return Err(ZnodeError::InvalidAddress(request.service));
        }

        mnb.sign(&collateral.keypair)?;
        info!(outpoint = %mnb.identity.outpoint, addr = %mnb.identity.addr, "znode announcement created");
        Ok(mnb)
    }

    /// Bytes covered by the collateral-key signature.
    pub fn message(&self) -> Vec<u8> {
        broadcast_message(
            &self.identity.addr,
            self.sig_time,
            &self.identity.collateral_pubkey.key_id(),
            &self.identity.znode_pubkey.key_id(),
            self.identity.protocol_version,
        )
    }

    pub fn sign(&mut self, collateral_key: &ZnodeKeypair) -> Result<(), ZnodeError> {
        self.signature = collateral_key.sign(&self.message()).map_err(|e| {
            warn!(outpoint = %self.identity.outpoint, error = %e, "announcement signing failed");
            ZnodeError::SignFailed(SignedMessage::Broadcast)
        })?;
        Ok(())
    }

    pub fn check_signature(&self) -> Result<(), ZnodeError> {
        if self
            .identity
            .collateral_pubkey
            .verify(&self.message(), &self.signature)
        {
            Ok(())
        } else {
            Err(ZnodeError::BadSignature(SignedMessage::Broadcast))
        }
    }

    /// Gossip identifier. Covers every field sent on the wire, the
    /// signatures and the embedded ping included.
    pub fn hash(&self) -> [u8; 32] {
        let ping = self.last_ping.as_ref().map(ZnodePing::hash);
        message_hash(&[
            &self.identity.outpoint.txid[..],
            &self.identity.outpoint.index.to_le_bytes()[..],
            &self.identity.collateral_pubkey.as_bytes()[..],
            &self.identity.znode_pubkey.as_bytes()[..],
            self.message().as_slice(),
            self.script_sig.as_slice(),
            self.signature.as_bytes(),
            ping.as_ref().map_or(&[][..], |h| &h[..]),
        ])
    }

    /// Regtest accepts any address. Elsewhere it must be routable IPv4.
    pub fn is_valid_net_addr<C: ChainStateOracle + ?Sized>(
        &self,
        chain: &C,
        params: &NetworkParams,
    ) -> bool {
        params.is_regtest() || (self.identity.addr.is_ipv4() && chain.is_routable(&self.identity.addr))
    }

    /// Context-free validation. A missing or stale embedded ping is not an
    /// error; it only lowers the state a new record starts in.
    pub fn simple_check<C: ChainStateOracle>(&mut self, env: &ZnodeEnv<C>) -> Result<(), ZnodeError> {
        let now = env.now();
        let outpoint = self.identity.outpoint;
        {
            let chain = env.chain.view();
            if !self.is_valid_net_addr(&*chain, &env.params) {
                warn!(%outpoint, addr = %self.identity.addr, "announcement with invalid address");
                return Err(ZnodeError::InvalidAddress(self.identity.addr));
            }

            if self.sig_time > now + MAX_FUTURE_DRIFT_SECONDS {
                warn!(%outpoint, sig_time = self.sig_time, now, "announcement signed in the future");
                return Err(ZnodeError::FutureSignature {
                    sig_time: self.sig_time,
                    now,
                });
            }

            let ping_ok = self
                .last_ping
                .as_ref()
                .map_or(false, |p| p.simple_check(&*chain, env.clock.as_ref()).is_ok());
            if !ping_ok {
                self.provisional_state = ZnodeState::Expired;
            }
        }

        check_script(&self.identity.collateral_pubkey, KeyRole::Collateral)?;
        check_script(&self.identity.znode_pubkey, KeyRole::Operating)?;

        if !self.script_sig.is_empty() {
            warn!(%outpoint, "announcement collateral input is already signed");
            return Err(ZnodeError::NonEmptySigScript);
        }

        let port = self.identity.addr.port();
        if !env.params.is_valid_service_port(port) {
            return Err(ZnodeError::PortMismatch {
                port,
                network: env.params.mode,
            });
        }

        Ok(())
    }

    /// Merges this announcement into the record it re-announces.
    pub fn update<C: ChainStateOracle>(
        &self,
        znode: &Znode,
        env: &ZnodeEnv<C>,
        scope: CheckScope<'_>,
    ) -> Result<UpdateOutcome, ZnodeError> {
        let outpoint = self.identity.outpoint;
        let current = znode.lock().sig_time;
        if current == self.sig_time && !self.recovery {
            return Err(ZnodeError::Duplicate);
        }
        if current > self.sig_time {
            warn!(%outpoint, sig_time = self.sig_time, current, "backdated announcement");
            return Err(ZnodeError::Backdated {
                sig_time: self.sig_time,
                current,
            });
        }

        znode.check(env, scope, false);

        let now = env.now();
        let (state, collateral_pubkey, last_ping_time, recently) = {
            let record = znode.lock();
            (
                record.state,
                record.identity.collateral_pubkey,
                record.last_ping.as_ref().map(|p| p.sig_time),
                record.is_broadcasted_within(ZNODE_MIN_MNB_SECONDS, now),
            )
        };

        if state == ZnodeState::PoseBan {
            return Err(ZnodeError::PoseBanned);
        }

        if collateral_pubkey != self.identity.collateral_pubkey {
            warn!(%outpoint, "announcement signed by a different collateral key");
            return Err(ZnodeError::IdentityMismatch(outpoint));
        }

        self.check_signature().map_err(|e| {
            warn!(%outpoint, "bad announcement signature");
            e
        })?;

        if recently && !scope.is_local(&self.identity) {
            debug!(%outpoint, "znode re-announced too recently, not applied");
            return Ok(UpdateOutcome::Throttled);
        }

        let ping_verified = self.last_ping.as_ref().map_or(false, |ping| {
            let target = PingTarget {
                state,
                znode_pubkey: self.identity.znode_pubkey,
                last_ping_time,
            };
            ping.verify_for(&target, true, env).is_ok()
        });

        {
            let mut record = znode.lock();
            record.apply_broadcast(self, ping_verified, env)?;
            record.check(env, scope, true);
        }

        info!(%outpoint, addr = %self.identity.addr, "znode announcement updated");
        env.relay.relay_broadcast(self);
        env.sync.bump_list_timeout();
        Ok(UpdateOutcome::Applied)
    }

    /// Verifies the collateral of an announcement for an unknown outpoint.
    pub fn check_outpoint<C: ChainStateOracle>(
        &self,
        env: &ZnodeEnv<C>,
        scope: CheckScope<'_>,
    ) -> Result<CollateralCheck, ZnodeError> {
        let outpoint = self.identity.outpoint;
        if let Some(local) = scope.local {
            if local.outpoint == outpoint && local.znode_pubkey == self.identity.znode_pubkey {
                return Ok(CollateralCheck::LocalNode);
            }
        }

        self.check_signature().map_err(|e| {
            warn!(%outpoint, "bad announcement signature");
            e
        })?;

        let chain = env.chain.try_view().ok_or(ZnodeError::ChainBusy)?;

        let coin = chain
            .get_coin(&outpoint)
            .filter(|coin| !coin.spent)
            .ok_or(ZnodeError::CollateralNotFound(outpoint))?;

        if coin.value != env.params.collateral_amount {
            return Err(ZnodeError::CollateralValueMismatch {
                actual: coin.value,
                required: env.params.collateral_amount,
            });
        }

        let required = env.params.min_collateral_confirmations;
        let tip = chain.current_height().unwrap_or(0);
        let confirmations = (tip + 1).saturating_sub(coin.height);
        if confirmations < required {
            debug!(%outpoint, confirmations, required, "collateral not mature yet");
            return Err(ZnodeError::InsufficientConfirmations {
                confirmations,
                required,
            });
        }

        let matured_height = coin.height + required.max(1) - 1;
        if let Some(block) = chain.block_at(matured_height) {
            if block.time > self.sig_time {
                warn!(%outpoint, sig_time = self.sig_time, matured_at = block.time, "announcement predates collateral maturity");
                return Err(ZnodeError::SigTimeBeforeConfirmation {
                    sig_time: self.sig_time,
                    matured_at: block.time,
                });
            }
        }

        Ok(CollateralCheck::Verified)
    }
}

fn check_script(key: &ZnodePublicKey, role: KeyRole) -> Result<(), ZnodeError> {
    match key.script_pubkey() {
        Ok(script) if script.len() == STANDARD_SCRIPT_LENGTH => Ok(()),
        _ => {
            warn!(%role, key = %key, "identity key has no standard script");
            Err(ZnodeError::BadIdentityScript(role))
        }
    }
}
