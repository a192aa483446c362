//! # Znode Records
//!
//! One [`ZnodeRecord`] per announced collateral outpoint. The record is
//! owned by the znode list and guarded by the mutex inside [`Znode`]; every
//! mutation (lifecycle checks, accepted pings, accepted re-announcements,
//! PoSe events) happens under that lock.
//!
//! ## Lifecycle
//!
//! [`ZnodeRecord::check`] re-derives the state from the record's timestamps
//! and the chain. It is a first-match guard chain:
//!
//! ```text
//!  throttle (5s) ─► OUTPOINT_SPENT is final ─► collateral gone? ─► OUTPOINT_SPENT
//!       │
//!       ▼
//!  POSE_BAN: wait out the ban height, then unban and fall through
//!  score at max? ─► POSE_BAN for one payment cycle
//!       │
//!       ▼
//!  list still syncing, no recent ping, not us? hold EXPIRED / WATCHDOG_EXPIRED / NEW_START_REQUIRED
//!       │
//!       ▼
//!  no ping in new-start window ─► NEW_START_REQUIRED
//!  watchdog active, vote stale  ─► WATCHDOG_EXPIRED
//!  no ping in 65 minutes        ─► EXPIRED
//!  pinging for < one interval   ─► PRE_ENABLED (not on regtest)
//!  otherwise                    ─► ENABLED
//! ```
//!
//! `UPDATE_REQUIRED` exists for peers that report it, but `check` never
//! assigns it.

use std::fmt;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::chain::{ChainStateOracle, OutPoint};
use crate::config::{
    POSE_BAN_MAX_SCORE, ZNODE_CHECK_SECONDS, ZNODE_EXPIRATION_SECONDS, ZNODE_WATCHDOG_MAX_SECONDS,
};
use crate::crypto::ZnodeSignature;
use crate::znode::ping::{check_spacing, PingTarget};
use crate::znode::{
    CheckScope, NodeIdentity, ZnodeBroadcast, ZnodeEnv, ZnodeError, ZnodePing, ZnodeState,
};

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Everything the node knows about one znode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZnodeRecord {
    pub identity: NodeIdentity,
    pub state: ZnodeState,
    /// Signature time of the announcement currently in effect.
    pub sig_time: i64,
    /// Collateral-key signature of that announcement.
    pub signature: ZnodeSignature,
    pub last_ping: Option<ZnodePing>,
    pub last_checked: i64,
    pub last_paid_time: i64,
    pub last_paid_block: u32,
    pub last_watchdog_vote: i64,
    pub pose_ban_score: i32,
    /// Height until which a PoSe ban lasts.
    pub pose_ban_height: u32,
    /// Height that confirmed the collateral. 0 until first looked up.
    pub collateral_block: u32,
    pub allow_mixing: bool,
    pub last_dsq: i64,
}

impl ZnodeRecord {
    /// Record for a freshly accepted announcement. The embedded ping is kept
    /// only if the announced operating key signed it.
    pub fn from_broadcast(mnb: &ZnodeBroadcast) -> Self {
        let last_ping = mnb
            .last_ping
            .as_ref()
            .filter(|p| p.check_signature(&mnb.identity.znode_pubkey).is_ok())
            .cloned();
        if last_ping.is_none() && mnb.last_ping.is_some() {
            debug!(outpoint = %mnb.identity.outpoint, "dropping unverifiable embedded ping");
        }

        Self {
            identity: mnb.identity.clone(),
            state: mnb.provisional_state,
            sig_time: mnb.sig_time,
            signature: mnb.signature.clone(),
            last_ping,
            last_checked: 0,
            last_paid_time: 0,
            last_paid_block: 0,
            last_watchdog_vote: mnb.sig_time,
            pose_ban_score: 0,
            pose_ban_height: 0,
            collateral_block: 0,
            allow_mixing: true,
            last_dsq: 0,
        }
    }

    /// The announcement this record currently stands for.
    pub fn to_broadcast(&self) -> ZnodeBroadcast {
        ZnodeBroadcast {
            identity: self.identity.clone(),
            script_sig: Vec::new(),
            last_ping: self.last_ping.clone(),
            signature: self.signature.clone(),
            sig_time: self.sig_time,
            recovery: false,
            provisional_state: self.state,
        }
    }

    /// Re-evaluates the lifecycle state. See the module docs for the rules.
    pub fn check<C: ChainStateOracle>(
        &mut self,
        env: &ZnodeEnv<C>,
        scope: CheckScope<'_>,
        force: bool,
    ) {
        let now = env.now();
        if !force && now.saturating_sub(self.last_checked) < ZNODE_CHECK_SECONDS {
            return;
        }
        self.last_checked = now;

        if self.state == ZnodeState::OutpointSpent {
            return;
        }

        let mut height = 0;
        if !env.unit_test {
            let Some(chain) = env.chain.try_view() else {
                trace!(outpoint = %self.identity.outpoint, "chain busy, check deferred");
                return;
            };
            let unspent = chain
                .get_coin(&self.identity.outpoint)
                .map_or(false, |coin| !coin.spent);
            if !unspent {
                self.transition(ZnodeState::OutpointSpent);
                return;
            }
            height = chain.current_height().unwrap_or(0);
        }

        if self.state == ZnodeState::PoseBan {
            if height < self.pose_ban_height {
                return;
            }
            info!(outpoint = %self.identity.outpoint, height, "znode unbanned");
            self.decrease_pose_ban_score();
        } else if self.pose_ban_score >= POSE_BAN_MAX_SCORE {
            self.transition(ZnodeState::PoseBan);
            self.pose_ban_height = height + scope.payment_cycle;
            info!(
                outpoint = %self.identity.outpoint,
                until = self.pose_ban_height,
                "znode banned by proof-of-service"
            );
            return;
        }

        let min_ping = env.params.timing.min_ping_interval_secs;
        let is_self = scope.is_local(&self.identity);
        let waiting_for_ping = !env.sync.is_list_synced() && !self.is_pinged_within(min_ping, now);

        if waiting_for_ping && !is_self && self.state.holds_while_syncing() {
            return;
        }

        if !waiting_for_ping || is_self {
            if !self.is_pinged_within(env.params.timing.new_start_required_secs, now) {
                self.transition(ZnodeState::NewStartRequired);
                return;
            }

            let watchdog_expired = scope.watchdog_active
                && env.sync.is_synced()
                && now.saturating_sub(self.last_watchdog_vote) > ZNODE_WATCHDOG_MAX_SECONDS;
            if watchdog_expired {
                self.transition(ZnodeState::WatchdogExpired);
                return;
            }

            if !self.is_pinged_within(ZNODE_EXPIRATION_SECONDS, now) {
                self.transition(ZnodeState::Expired);
                return;
            }
        }

        let last_ping_time = self.last_ping.as_ref().map_or(0, |p| p.sig_time);
        if !env.params.is_regtest() && last_ping_time.saturating_sub(self.sig_time) < min_ping {
            self.transition(ZnodeState::PreEnabled);
            return;
        }

        self.transition(ZnodeState::Enabled);
    }

    fn transition(&mut self, next: ZnodeState) {
        if self.state != next {
            debug!(
                outpoint = %self.identity.outpoint,
                from = %self.state,
                to = %next,
                "znode state changed"
            );
            self.state = next;
        }
    }

    /// Stores a validated ping. Re-checks the spacing rule under the lock,
    /// since another ping may have landed since validation.
    pub(crate) fn accept_ping<C: ChainStateOracle>(
        &mut self,
        ping: ZnodePing,
        env: &ZnodeEnv<C>,
    ) -> Result<(), ZnodeError> {
        check_spacing(
            self.last_ping.as_ref().map(|p| p.sig_time),
            ping.sig_time,
            env.params.timing.min_ping_interval_secs,
        )?;

        let now = env.now();
        if !env.sync.is_list_synced() && !self.is_pinged_within(ZNODE_EXPIRATION_SECONDS / 2, now) {
            env.sync.bump_list_timeout();
        }
        self.last_ping = Some(ping);
        Ok(())
    }

    /// Replaces the announcement-derived fields with those of a newer
    /// announcement for the same collateral.
    pub(crate) fn apply_broadcast<C: ChainStateOracle>(
        &mut self,
        mnb: &ZnodeBroadcast,
        ping_verified: bool,
        env: &ZnodeEnv<C>,
    ) -> Result<(), ZnodeError> {
        if mnb.sig_time < self.sig_time {
            return Err(ZnodeError::Backdated {
                sig_time: mnb.sig_time,
                current: self.sig_time,
            });
        }
        if mnb.sig_time == self.sig_time && !mnb.recovery {
            return Err(ZnodeError::Duplicate);
        }

        self.identity.znode_pubkey = mnb.identity.znode_pubkey;
        self.identity.addr = mnb.identity.addr;
        self.identity.protocol_version = mnb.identity.protocol_version;
        self.sig_time = mnb.sig_time;
        self.signature = mnb.signature.clone();
        self.pose_ban_score = 0;
        self.pose_ban_height = 0;
        self.last_checked = 0;

        if let (true, Some(ping)) = (ping_verified, mnb.last_ping.as_ref()) {
            if let Err(e) = self.accept_ping(ping.clone(), env) {
                debug!(outpoint = %self.identity.outpoint, error = %e, "embedded ping not adopted");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Time predicates
    // -----------------------------------------------------------------------

    /// Time the node was last heard from: its last ping, or the
    /// announcement itself before the first ping lands.
    pub fn last_seen(&self) -> i64 {
        self.last_ping.as_ref().map_or(self.sig_time, |p| p.sig_time)
    }

    /// Whether the node was last heard from less than `seconds` before `at`.
    /// A last-seen time after `at` counts as within.
    pub fn is_pinged_within(&self, seconds: i64, at: i64) -> bool {
        at.saturating_sub(self.last_seen()) < seconds
    }

    pub fn is_broadcasted_within(&self, seconds: i64, now: i64) -> bool {
        now.saturating_sub(self.sig_time) < seconds
    }

    // -----------------------------------------------------------------------
    // State predicates
    // -----------------------------------------------------------------------

    pub fn is_enabled(&self) -> bool {
        self.state == ZnodeState::Enabled
    }

    pub fn is_pre_enabled(&self) -> bool {
        self.state == ZnodeState::PreEnabled
    }

    pub fn is_pose_banned(&self) -> bool {
        self.state == ZnodeState::PoseBan
    }

    pub fn is_expired(&self) -> bool {
        self.state == ZnodeState::Expired
    }

    pub fn is_outpoint_spent(&self) -> bool {
        self.state == ZnodeState::OutpointSpent
    }

    pub fn is_update_required(&self) -> bool {
        self.state == ZnodeState::UpdateRequired
    }

    pub fn is_watchdog_expired(&self) -> bool {
        self.state == ZnodeState::WatchdogExpired
    }

    pub fn is_new_start_required(&self) -> bool {
        self.state == ZnodeState::NewStartRequired
    }

    pub fn is_valid_for_payment(&self) -> bool {
        self.is_enabled()
    }

    // -----------------------------------------------------------------------
    // Proof of service
    // -----------------------------------------------------------------------

    pub fn increase_pose_ban_score(&mut self) {
        if self.pose_ban_score < POSE_BAN_MAX_SCORE {
            self.pose_ban_score += 1;
        }
    }

    pub fn decrease_pose_ban_score(&mut self) {
        if self.pose_ban_score > 0 {
            self.pose_ban_score -= 1;
        }
    }

    /// Maxes the score out. The ban itself takes effect on the next check.
    pub fn pose_ban(&mut self) {
        self.pose_ban_score = POSE_BAN_MAX_SCORE;
    }

    pub fn status(&self) -> &'static str {
        self.state.as_str()
    }

    pub fn info(&self) -> ZnodeInfo {
        ZnodeInfo {
            identity: self.identity.clone(),
            state: self.state,
            sig_time: self.sig_time,
            last_ping_time: self.last_ping.as_ref().map(|p| p.sig_time),
            last_checked: self.last_checked,
            last_paid_time: self.last_paid_time,
            last_paid_block: self.last_paid_block,
            last_watchdog_vote: self.last_watchdog_vote,
            pose_ban_score: self.pose_ban_score,
            pose_ban_height: self.pose_ban_height,
            allow_mixing: self.allow_mixing,
            last_dsq: self.last_dsq,
        }
    }
}

impl fmt::Display for ZnodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last_seen = self.last_ping.as_ref().map_or(0, |p| p.sig_time);
        let active = if last_seen == 0 {
            0
        } else {
            last_seen.saturating_sub(self.sig_time)
        };
        write!(
            f,
            "znode{{{} {} {} {} {} {} {}}}",
            self.identity.addr,
            self.identity.protocol_version,
            self.identity.outpoint,
            self.identity.collateral_pubkey.key_id(),
            last_seen,
            active,
            self.last_paid_block
        )
    }
}

// ---------------------------------------------------------------------------
// Info snapshot
// ---------------------------------------------------------------------------

/// Read-only copy of a record, for RPC and metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZnodeInfo {
    pub identity: NodeIdentity,
    pub state: ZnodeState,
    pub sig_time: i64,
    pub last_ping_time: Option<i64>,
    pub last_checked: i64,
    pub last_paid_time: i64,
    pub last_paid_block: u32,
    pub last_watchdog_vote: i64,
    pub pose_ban_score: i32,
    pub pose_ban_height: u32,
    pub allow_mixing: bool,
    pub last_dsq: i64,
}

// ---------------------------------------------------------------------------
// Znode
// ---------------------------------------------------------------------------

/// A record behind its own lock. This is what the znode list stores.
pub struct Znode {
    outpoint: OutPoint,
    inner: Mutex<ZnodeRecord>,
}

impl Znode {
    pub fn new(record: ZnodeRecord) -> Self {
        Self {
            outpoint: record.identity.outpoint,
            inner: Mutex::new(record),
        }
    }

    pub fn from_broadcast(mnb: &ZnodeBroadcast) -> Self {
        Self::new(ZnodeRecord::from_broadcast(mnb))
    }

    pub fn outpoint(&self) -> OutPoint {
        self.outpoint
    }

    /// Locks the record. Keep the guard short-lived and never call back into
    /// `Znode` methods while holding it.
    pub fn lock(&self) -> MutexGuard<'_, ZnodeRecord> {
        self.inner.lock()
    }

    pub fn check<C: ChainStateOracle>(
        &self,
        env: &ZnodeEnv<C>,
        scope: CheckScope<'_>,
        force: bool,
    ) {
        self.lock().check(env, scope, force);
    }

    pub fn state(&self) -> ZnodeState {
        self.lock().state
    }

    pub fn is_valid_for_payment(&self) -> bool {
        self.lock().is_valid_for_payment()
    }

    pub fn identity(&self) -> NodeIdentity {
        self.lock().identity.clone()
    }

    pub fn info(&self) -> ZnodeInfo {
        self.lock().info()
    }

    pub fn to_broadcast(&self) -> ZnodeBroadcast {
        self.lock().to_broadcast()
    }

    pub(crate) fn ping_target(&self) -> PingTarget {
        let record = self.lock();
        PingTarget {
            state: record.state,
            znode_pubkey: record.identity.znode_pubkey,
            last_ping_time: record.last_ping.as_ref().map(|p| p.sig_time),
        }
    }

    pub fn increase_pose_ban_score(&self) -> i32 {
        let mut record = self.lock();
        record.increase_pose_ban_score();
        record.pose_ban_score
    }

    pub fn decrease_pose_ban_score(&self) -> i32 {
        let mut record = self.lock();
        record.decrease_pose_ban_score();
        record.pose_ban_score
    }

    pub fn pose_ban(&self) {
        self.lock().pose_ban();
        info!(outpoint = %self.outpoint, "znode PoSe score maxed out");
    }

    pub fn update_watchdog_vote_time(&self, now: i64) {
        self.lock().last_watchdog_vote = now;
    }

    pub fn set_last_paid(&self, height: u32, time: i64) {
        let mut record = self.lock();
        record.last_paid_block = height;
        record.last_paid_time = time;
    }

    /// Blocks since the collateral confirmed. `None` while the chain is busy
    /// or when the collateral is gone.
    pub fn collateral_age<C: ChainStateOracle>(&self, env: &ZnodeEnv<C>) -> Option<u32> {
        let cached = self.lock().collateral_block;
        let (height, collateral_block) = {
            let chain = env.chain.try_view()?;
            let height = chain.current_height()?;
            let block = if cached == 0 {
                chain
                    .get_coin(&self.outpoint)
                    .filter(|coin| !coin.spent)?
                    .height
            } else {
                cached
            };
            (height, block)
        };

        if cached == 0 {
            self.lock().collateral_block = collateral_block;
        }
        Some(height.saturating_sub(collateral_block))
    }
}

impl fmt::Display for Znode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.lock(), f)
    }
}

impl fmt::Debug for Znode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Znode")
            .field("outpoint", &self.outpoint)
            .field("state", &self.state())
            .finish()
    }
}
