//! Liveness pings.
//!
//! A running znode signs a ping every few minutes with its operating key.
//! The ping is anchored to the block 12 below the tip, so it cannot be
//! produced much earlier than it claims and cannot be replayed for long.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chain::{BlockHash, BlockRef, ChainStateOracle, OutPoint};
use crate::clock::Clock;
use crate::config::{
    MAX_FUTURE_DRIFT_SECONDS, PING_ANCHOR_DEPTH, PING_MAX_ANCHOR_AGE,
    PING_SPACING_TOLERANCE_SECONDS,
};
use crate::crypto::{ZnodeKeypair, ZnodePublicKey, ZnodeSignature};
use crate::znode::codec::{message_hash, ping_message};
use crate::znode::{CheckScope, SignedMessage, Znode, ZnodeEnv, ZnodeError, ZnodeState};

/// A signed liveness proof for one znode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZnodePing {
    pub outpoint: OutPoint,
    /// Block the ping is anchored to.
    pub anchor: BlockHash,
    pub sig_time: i64,
    pub signature: ZnodeSignature,
}

/// The parts of a record that ping validation reads. Taken under the record
/// lock, then used without it.
#[derive(Debug, Clone)]
pub(crate) struct PingTarget {
    pub state: ZnodeState,
    pub znode_pubkey: ZnodePublicKey,
    pub last_ping_time: Option<i64>,
}

impl ZnodePing {
    /// Unsigned ping for `outpoint`, anchored `PING_ANCHOR_DEPTH` blocks
    /// below the tip.
    pub fn new<C: ChainStateOracle + ?Sized>(
        outpoint: OutPoint,
        chain: &C,
        clock: &dyn Clock,
    ) -> Result<Self, ZnodeError> {
        let height = chain.current_height().ok_or(ZnodeError::ChainTooShort)?;
        if height < PING_ANCHOR_DEPTH {
            return Err(ZnodeError::ChainTooShort);
        }
        let anchor = chain
            .block_at(height - PING_ANCHOR_DEPTH)
            .ok_or(ZnodeError::ChainTooShort)?;

        Ok(Self {
            outpoint,
            anchor: anchor.hash,
            sig_time: clock.now(),
            signature: ZnodeSignature::default(),
        })
    }

    /// Bytes covered by the signature.
    pub fn message(&self) -> Vec<u8> {
        ping_message(&self.outpoint, &self.anchor, self.sig_time)
    }

    /// Stamps the ping with the current time and signs it.
    pub fn sign(&mut self, key: &ZnodeKeypair, clock: &dyn Clock) -> Result<(), ZnodeError> {
        self.sig_time = clock.now();
        self.signature = key.sign(&self.message()).map_err(|e| {
            warn!(outpoint = %self.outpoint, error = %e, "ping signing failed");
            ZnodeError::SignFailed(SignedMessage::Ping)
        })?;
        Ok(())
    }

    pub fn check_signature(&self, znode_pubkey: &ZnodePublicKey) -> Result<(), ZnodeError> {
        if znode_pubkey.verify(&self.message(), &self.signature) {
            Ok(())
        } else {
            Err(ZnodeError::BadSignature(SignedMessage::Ping))
        }
    }

    /// Gossip identifier. Covers the signature too.
    pub fn hash(&self) -> [u8; 32] {
        message_hash(&[self.message().as_slice(), self.signature.as_bytes()])
    }

    /// Context-free checks: not from the far future, anchored to a known
    /// block. Returns the anchor.
    pub fn simple_check<C: ChainStateOracle + ?Sized>(
        &self,
        chain: &C,
        clock: &dyn Clock,
    ) -> Result<BlockRef, ZnodeError> {
        let now = clock.now();
        if self.sig_time > now + MAX_FUTURE_DRIFT_SECONDS {
            warn!(outpoint = %self.outpoint, sig_time = self.sig_time, now, "ping signed in the future");
            return Err(ZnodeError::ClockSkew {
                sig_time: self.sig_time,
                now,
            });
        }

        chain.block_index_lookup(&self.anchor).ok_or_else(|| {
            debug!(outpoint = %self.outpoint, anchor = %self.anchor, "ping anchor not in block index");
            ZnodeError::UnknownAnchor(self.anchor)
        })
    }

    /// Validates the ping against its record and, when it passes, stores it
    /// and re-evaluates the record.
    ///
    /// `from_broadcast` skips the checks on the record's current state, which
    /// a fresh announcement is about to replace anyway.
    pub fn check_and_update<C: ChainStateOracle>(
        &self,
        znode: Option<&Znode>,
        from_broadcast: bool,
        env: &ZnodeEnv<C>,
        scope: CheckScope<'_>,
    ) -> Result<(), ZnodeError> {
        let (anchor, tip) = self.anchor_and_tip(env)?;
        let znode = znode.ok_or(ZnodeError::UnknownRecord(self.outpoint))?;

        let target = znode.ping_target();
        self.verify_against(&target, &anchor, tip, from_broadcast, env)?;

        let state = {
            let mut record = znode.lock();
            record.accept_ping(self.clone(), env)?;
            record.check(env, scope, true);
            record.state
        };

        if state != ZnodeState::Enabled {
            debug!(outpoint = %self.outpoint, %state, "ping stored for a znode that is not enabled");
            return Err(ZnodeError::NotEnabled(state));
        }

        debug!(outpoint = %self.outpoint, sig_time = self.sig_time, "ping accepted");
        env.relay.relay_ping(self);
        Ok(())
    }

    /// Full validation without touching the record. Used for the ping
    /// embedded in an announcement.
    pub(crate) fn verify_for<C: ChainStateOracle>(
        &self,
        target: &PingTarget,
        from_broadcast: bool,
        env: &ZnodeEnv<C>,
    ) -> Result<(), ZnodeError> {
        let (anchor, tip) = self.anchor_and_tip(env)?;
        self.verify_against(target, &anchor, tip, from_broadcast, env)
    }

    fn anchor_and_tip<C: ChainStateOracle>(
        &self,
        env: &ZnodeEnv<C>,
    ) -> Result<(BlockRef, u32), ZnodeError> {
        let chain = env.chain.view();
        let anchor = self.simple_check(&*chain, env.clock.as_ref())?;
        Ok((anchor, chain.current_height().unwrap_or(0)))
    }

    fn verify_against<C: ChainStateOracle>(
        &self,
        target: &PingTarget,
        anchor: &BlockRef,
        tip: u32,
        from_broadcast: bool,
        env: &ZnodeEnv<C>,
    ) -> Result<(), ZnodeError> {
        if !from_broadcast {
            if target.state == ZnodeState::UpdateRequired {
                return Err(ZnodeError::ProtocolOutdated);
            }
            if target.state == ZnodeState::NewStartRequired {
                return Err(ZnodeError::NewStartRequired);
            }
        }

        if anchor.height + PING_MAX_ANCHOR_AGE < tip {
            warn!(outpoint = %self.outpoint, anchor_height = anchor.height, tip, "ping anchor too old");
            return Err(ZnodeError::AnchorTooOld {
                anchor_height: anchor.height,
                tip_height: tip,
            });
        }

        check_spacing(
            target.last_ping_time,
            self.sig_time,
            env.params.timing.min_ping_interval_secs,
        )?;

        self.check_signature(&target.znode_pubkey).map_err(|e| {
            warn!(outpoint = %self.outpoint, "bad ping signature");
            e
        })
    }
}

/// Rejects a ping signed less than the minimum spacing after `previous`.
pub(crate) fn check_spacing(
    previous: Option<i64>,
    sig_time: i64,
    min_ping_interval: i64,
) -> Result<(), ZnodeError> {
    match previous {
        Some(previous)
            if sig_time.saturating_sub(previous)
                < min_ping_interval - PING_SPACING_TOLERANCE_SECONDS =>
        {
            Err(ZnodeError::TooSoon { previous, sig_time })
        }
        _ => Ok(()),
    }
}
