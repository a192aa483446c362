//! # Znode List
//!
//! The node's view of every announced znode, keyed by collateral outpoint.
//! This is where gossip enters the znode core: the P2P layer hands each
//! received announcement to [`ZnodeList::process_broadcast`] and each ping
//! to [`ZnodeList::process_ping`], then charges the sender the
//! [`dos_weight`](ZnodeError::dos_weight) of any error.
//!
//! ## Concurrency
//!
//! Records live in a `DashMap`; each one carries its own lock. A record is
//! created through the map's entry API, so when two first announcements for
//! the same outpoint race, exactly one creates the record and the other is
//! merged into it as an update.
//!
//! ## Seen caches
//!
//! Message hashes are remembered in bounded caches so that the same
//! announcement or ping relayed by many peers is validated once. Messages
//! that failed for a reason that may go away (busy chain, immature
//! collateral, unknown anchor) are forgotten again so a later copy gets a
//! fresh look. Message hashes cover the signatures, so a tampered copy
//! lands under its own hash and never hides the genuine message.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, trace};

use crate::chain::{ChainStateOracle, OutPoint};
use crate::config::ZNODE_WATCHDOG_MAX_SECONDS;
use crate::znode::{
    CheckScope, CollateralCheck, NodeIdentity, UpdateOutcome, Znode, ZnodeBroadcast, ZnodeEnv,
    ZnodeError, ZnodeInfo, ZnodePing, ZnodeState,
};

/// Default bound on each seen-message cache.
pub const DEFAULT_SEEN_CACHE_SIZE: usize = 50_000;

/// What happened to an accepted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// A new record was created.
    Created,
    /// An existing record took the announcement.
    Updated,
    /// Valid announcement for a record that was re-announced too recently.
    Throttled,
    /// The ping was stored and the znode is enabled.
    Pinged,
    /// Already processed this exact message.
    AlreadySeen,
    /// Our own announcement, echoed back.
    LocalNode,
}

impl Acceptance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Acceptance::Created => "created",
            Acceptance::Updated => "updated",
            Acceptance::Throttled => "throttled",
            Acceptance::Pinged => "pinged",
            Acceptance::AlreadySeen => "already_seen",
            Acceptance::LocalNode => "local_node",
        }
    }
}

/// Registry of known znodes.
pub struct ZnodeList {
    nodes: DashMap<OutPoint, Arc<Znode>>,
    seen_broadcasts: DashMap<[u8; 32], i64>,
    seen_pings: DashMap<[u8; 32], i64>,
    /// Time of the most recent watchdog vote for any znode.
    last_watchdog_vote: AtomicI64,
    seen_cache_size: usize,
}

impl ZnodeList {
    pub fn new(seen_cache_size: usize) -> Self {
        Self {
            nodes: DashMap::new(),
            seen_broadcasts: DashMap::new(),
            seen_pings: DashMap::new(),
            last_watchdog_vote: AtomicI64::new(0),
            seen_cache_size: seen_cache_size.max(1),
        }
    }

    /// Check scope for the current registry size. One payment cycle is one
    /// block per known znode.
    pub fn scope<'a>(&self, local: Option<&'a NodeIdentity>, now: i64) -> CheckScope<'a> {
        CheckScope::new(local, self.nodes.len() as u32).with_watchdog(self.is_watchdog_active(now))
    }

    /// Validates an announcement received from a peer and applies it.
    pub fn process_broadcast<C: ChainStateOracle>(
        &self,
        mut mnb: ZnodeBroadcast,
        env: &ZnodeEnv<C>,
        local: Option<&NodeIdentity>,
    ) -> Result<Acceptance, ZnodeError> {
        let now = env.now();
        let hash = mnb.hash();

        if self.seen_broadcasts.contains_key(&hash) {
            trace!(outpoint = %mnb.identity.outpoint, "announcement already seen");
            return Ok(Acceptance::AlreadySeen);
        }
        self.remember(&self.seen_broadcasts, hash, now);

        let result = self.apply_broadcast(&mut mnb, hash, env, local, now);
        if let Err(e) = &result {
            if e.is_retryable() {
                self.seen_broadcasts.remove(&hash);
            }
        }
        result
    }

    fn apply_broadcast<C: ChainStateOracle>(
        &self,
        mnb: &mut ZnodeBroadcast,
        hash: [u8; 32],
        env: &ZnodeEnv<C>,
        local: Option<&NodeIdentity>,
        now: i64,
    ) -> Result<Acceptance, ZnodeError> {
        let outpoint = mnb.identity.outpoint;
        let scope = self.scope(local, now);

        if let Err(e) = mnb.simple_check(env) {
            debug!(%outpoint, error = %e, dos = e.dos_weight(), "announcement rejected");
            return Err(e);
        }

        if let Some(existing) = self.get(&outpoint) {
            return Self::merge(mnb, &existing, env, scope);
        }

        match mnb.check_outpoint(env, scope) {
            Ok(CollateralCheck::LocalNode) => return Ok(Acceptance::LocalNode),
            Ok(CollateralCheck::Verified) => {}
            Err(e) => {
                if e.dos_weight() == 0 {
                    self.seen_broadcasts.remove(&hash);
                }
                debug!(%outpoint, error = %e, dos = e.dos_weight(), "announcement collateral rejected");
                return Err(e);
            }
        }

        let created = match self.nodes.entry(outpoint) {
            Entry::Occupied(entry) => Err(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let znode = Arc::new(Znode::from_broadcast(mnb));
                entry.insert(Arc::clone(&znode));
                Ok(znode)
            }
        };

        match created {
            Ok(znode) => {
                znode.check(env, scope, true);
                info!(%outpoint, addr = %mnb.identity.addr, state = %znode.state(), "new znode");
                env.sync.bump_list_timeout();
                env.relay.relay_broadcast(mnb);
                Ok(Acceptance::Created)
            }
            // Lost the race to another first announcement.
            Err(existing) => Self::merge(mnb, &existing, env, scope),
        }
    }

    fn merge<C: ChainStateOracle>(
        mnb: &ZnodeBroadcast,
        existing: &Znode,
        env: &ZnodeEnv<C>,
        scope: CheckScope<'_>,
    ) -> Result<Acceptance, ZnodeError> {
        match mnb.update(existing, env, scope) {
            Ok(UpdateOutcome::Applied) => Ok(Acceptance::Updated),
            Ok(UpdateOutcome::Throttled) => Ok(Acceptance::Throttled),
            Err(e) => {
                debug!(outpoint = %mnb.identity.outpoint, error = %e, dos = e.dos_weight(), "announcement update rejected");
                Err(e)
            }
        }
    }

    /// Validates a ping received from a peer and applies it.
    pub fn process_ping<C: ChainStateOracle>(
        &self,
        ping: &ZnodePing,
        env: &ZnodeEnv<C>,
        local: Option<&NodeIdentity>,
    ) -> Result<Acceptance, ZnodeError> {
        let now = env.now();
        let hash = ping.hash();
        if self.seen_pings.contains_key(&hash) {
            trace!(outpoint = %ping.outpoint, "ping already seen");
            return Ok(Acceptance::AlreadySeen);
        }
        self.remember(&self.seen_pings, hash, now);

        let scope = self.scope(local, now);
        let znode = self.get(&ping.outpoint);
        match ping.check_and_update(znode.as_deref(), false, env, scope) {
            Ok(()) => Ok(Acceptance::Pinged),
            Err(e) => {
                if e.is_retryable() {
                    self.seen_pings.remove(&hash);
                }
                debug!(outpoint = %ping.outpoint, error = %e, dos = e.dos_weight(), "ping rejected");
                Err(e)
            }
        }
    }

    /// Runs the (throttled) lifecycle check on every record.
    pub fn check_all<C: ChainStateOracle>(&self, env: &ZnodeEnv<C>, local: Option<&NodeIdentity>) {
        let scope = self.scope(local, env.now());
        for znode in self.snapshot() {
            znode.check(env, scope, false);
        }
    }

    /// Adds one PoSe point to a znode. Returns the new score.
    pub fn report_misbehavior(&self, outpoint: &OutPoint) -> Option<i32> {
        let znode = self.get(outpoint)?;
        let score = znode.increase_pose_ban_score();
        debug!(%outpoint, score, "znode PoSe score increased");
        Some(score)
    }

    /// Records a watchdog vote from `outpoint`.
    pub fn record_watchdog_vote(&self, outpoint: &OutPoint, now: i64) -> bool {
        match self.get(outpoint) {
            Some(znode) => {
                znode.update_watchdog_vote_time(now);
                self.last_watchdog_vote.fetch_max(now, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Whether any watchdog vote arrived within the watchdog window.
    pub fn is_watchdog_active(&self, now: i64) -> bool {
        let last = self.last_watchdog_vote.load(Ordering::SeqCst);
        last > 0 && now.saturating_sub(last) <= ZNODE_WATCHDOG_MAX_SECONDS
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<Arc<Znode>> {
        self.nodes.get(outpoint).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn count_enabled(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|z| z.state() == ZnodeState::Enabled)
            .count()
    }

    /// Number of records in each state, in `ZnodeState::ALL` order.
    pub fn count_by_state(&self) -> Vec<(ZnodeState, usize)> {
        let states: Vec<ZnodeState> = self.snapshot().iter().map(|z| z.state()).collect();
        ZnodeState::ALL
            .iter()
            .map(|s| (*s, states.iter().filter(|x| *x == s).count()))
            .collect()
    }

    pub fn infos(&self) -> Vec<ZnodeInfo> {
        let mut infos: Vec<ZnodeInfo> = self.snapshot().iter().map(|z| z.info()).collect();
        infos.sort_by_key(|i| i.identity.outpoint);
        infos
    }

    pub fn seen_broadcast_count(&self) -> usize {
        self.seen_broadcasts.len()
    }

    pub fn seen_ping_count(&self) -> usize {
        self.seen_pings.len()
    }

    /// Clones the record handles out so no map shard stays locked while
    /// records are checked.
    fn snapshot(&self) -> Vec<Arc<Znode>> {
        self.nodes.iter().map(|e| Arc::clone(e.value())).collect()
    }

    fn remember(&self, cache: &DashMap<[u8; 32], i64>, hash: [u8; 32], now: i64) {
        cache.insert(hash, now);
        if cache.len() <= self.seen_cache_size {
            return;
        }

        let target = self.seen_cache_size * 3 / 4;
        let mut entries: Vec<([u8; 32], i64)> =
            cache.iter().map(|e| (*e.key(), *e.value())).collect();
        entries.sort_by_key(|(_, ts)| *ts);

        let to_remove = entries.len().saturating_sub(target);
        for (hash, _) in entries.iter().take(to_remove) {
            cache.remove(hash);
        }
    }
}

impl Default for ZnodeList {
    fn default() -> Self {
        Self::new(DEFAULT_SEEN_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainHandle, MemoryChain};
    use crate::clock::ManualClock;
    use crate::config::{NetworkMode, NetworkParams, ZNODE_COLLATERAL};
    use crate::crypto::ZnodeKeypair;
    use crate::network::{RelayQueue, ZnodeSync};
    use crate::wallet::KeyringWallet;
    use crate::znode::AnnounceRequest;

    const T0: i64 = 1_700_000_000;

    fn env() -> (ZnodeEnv<MemoryChain>, Arc<RelayQueue>) {
        let (env, relay, _) = env_with_clock();
        (env, relay)
    }

    fn env_with_clock() -> (ZnodeEnv<MemoryChain>, Arc<RelayQueue>, Arc<ManualClock>) {
        let chain = MemoryChain::with_blocks(200, T0 - 199 * 150, 150);
        let relay = Arc::new(RelayQueue::default());
        let clock = Arc::new(ManualClock::new(T0));
        let env = ZnodeEnv::new(
            ChainHandle::new(chain),
            NetworkParams::for_mode(NetworkMode::Mainnet),
            clock.clone(),
            Arc::new(ZnodeSync::synced()),
            relay.clone(),
        );
        (env, relay, clock)
    }

    fn announcement(env: &ZnodeEnv<MemoryChain>, seed: u8) -> ZnodeBroadcast {
        let outpoint = OutPoint::new([seed; 32], 0);
        env.chain.write().add_coin(outpoint, ZNODE_COLLATERAL, 100);
        let wallet = KeyringWallet::new();
        wallet.insert(outpoint, ZnodeKeypair::generate());
        let znode_key = ZnodeKeypair::generate();
        let tx = hex::encode([seed; 32]);
        ZnodeBroadcast::create(
            AnnounceRequest {
                service: format!("8.8.{seed}.8:8168").parse().unwrap(),
                collateral_tx: &tx,
                collateral_index: 0,
                znode_key: &znode_key,
            },
            &wallet,
            env,
            false,
        )
        .unwrap()
    }

    #[test]
    fn first_announcement_creates_a_record() {
        let (env, relay) = env();
        let list = ZnodeList::default();
        let mnb = announcement(&env, 1);

        assert_eq!(list.process_broadcast(mnb.clone(), &env, None), Ok(Acceptance::Created));
        assert_eq!(list.len(), 1);
        assert_eq!(
            list.get(&mnb.identity.outpoint).unwrap().state(),
            ZnodeState::PreEnabled
        );
        assert_eq!(relay.drain().len(), 1);

        assert_eq!(list.process_broadcast(mnb, &env, None), Ok(Acceptance::AlreadySeen));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn immature_collateral_is_retried() {
        let (env, _) = env();
        let list = ZnodeList::default();
        let mnb = announcement(&env, 2);
        env.chain.write().add_coin(mnb.identity.outpoint, ZNODE_COLLATERAL, 195);

        let err = list.process_broadcast(mnb.clone(), &env, None).unwrap_err();
        assert!(matches!(err, ZnodeError::InsufficientConfirmations { .. }));
        assert_eq!(list.seen_broadcast_count(), 0);

        for _ in 0..10 {
            env.chain.write().push_block(T0);
        }
        assert_eq!(list.process_broadcast(mnb, &env, None), Ok(Acceptance::Created));
    }

    #[test]
    fn forged_announcement_stays_seen() {
        let (env, _) = env();
        let list = ZnodeList::default();
        let mut mnb = announcement(&env, 3);
        mnb.identity.protocol_version += 1;

        let err = list.process_broadcast(mnb.clone(), &env, None).unwrap_err();
        assert_eq!(err.dos_weight(), 100);
        assert_eq!(list.seen_broadcast_count(), 1);
        assert_eq!(list.process_broadcast(mnb, &env, None), Ok(Acceptance::AlreadySeen));
        assert!(list.is_empty());
    }

    #[test]
    fn tampered_copy_does_not_shadow_the_announcement() {
        let (env, _) = env();
        let list = ZnodeList::default();
        let mnb = announcement(&env, 6);

        let mut signed_input = mnb.clone();
        signed_input.script_sig = vec![0x51];
        assert_eq!(
            list.process_broadcast(signed_input, &env, None),
            Err(ZnodeError::NonEmptySigScript)
        );

        let mut bad_signature = mnb.clone();
        bad_signature.signature = crate::crypto::ZnodeSignature::from_vec(vec![7; 64]);
        assert!(list.process_broadcast(bad_signature, &env, None).is_err());

        assert_eq!(
            list.process_broadcast(mnb.clone(), &env, None),
            Ok(Acceptance::Created)
        );
        assert!(list.get(&mnb.identity.outpoint).is_some());
    }

    #[test]
    fn tampered_ping_does_not_shadow_the_ping() {
        let (env, _, clock) = env_with_clock();
        let list = ZnodeList::default();
        let znode_key = ZnodeKeypair::from_seed(&[7; 32]);
        let outpoint = OutPoint::new([7; 32], 0);
        env.chain.write().add_coin(outpoint, ZNODE_COLLATERAL, 100);
        let wallet = KeyringWallet::new();
        wallet.insert(outpoint, ZnodeKeypair::generate());
        let tx = hex::encode([7u8; 32]);
        let mnb = ZnodeBroadcast::create(
            AnnounceRequest {
                service: "8.8.7.8:8168".parse().unwrap(),
                collateral_tx: &tx,
                collateral_index: 0,
                znode_key: &znode_key,
            },
            &wallet,
            &env,
            false,
        )
        .unwrap();
        list.process_broadcast(mnb, &env, None).unwrap();

        clock.advance(600);
        env.chain.write().push_block(T0 + 600);
        let mut ping = {
            let chain = env.chain.view();
            ZnodePing::new(outpoint, &*chain, env.clock.as_ref()).unwrap()
        };
        ping.sign(&znode_key, env.clock.as_ref()).unwrap();

        let mut forged = ping.clone();
        forged.signature = crate::crypto::ZnodeSignature::from_vec(vec![7; 64]);
        assert!(matches!(
            list.process_ping(&forged, &env, None),
            Err(ZnodeError::BadSignature(_))
        ));

        assert_eq!(list.process_ping(&ping, &env, None), Ok(Acceptance::Pinged));
        let znode = list.get(&outpoint).unwrap();
        assert_eq!(znode.state(), ZnodeState::Enabled);
        assert_eq!(list.process_ping(&ping, &env, None), Ok(Acceptance::AlreadySeen));
    }

    #[test]
    fn ping_from_the_distant_past_is_rejected_cleanly() {
        let (env, _) = env();
        let list = ZnodeList::default();
        let mnb = announcement(&env, 8);
        let outpoint = mnb.identity.outpoint;
        list.process_broadcast(mnb, &env, None).unwrap();

        let mut ping = {
            let chain = env.chain.view();
            ZnodePing::new(outpoint, &*chain, env.clock.as_ref()).unwrap()
        };
        ping.sig_time = i64::MIN;
        assert!(matches!(
            list.process_ping(&ping, &env, None),
            Err(ZnodeError::TooSoon { .. })
        ));
        assert_eq!(list.get(&outpoint).unwrap().state(), ZnodeState::PreEnabled);
    }

    #[test]
    fn local_echo_is_not_inserted() {
        let (env, _) = env();
        let list = ZnodeList::default();
        let mnb = announcement(&env, 4);
        let local = mnb.identity.clone();
        assert_eq!(
            list.process_broadcast(mnb, &env, Some(&local)),
            Ok(Acceptance::LocalNode)
        );
        assert!(list.is_empty());
    }

    #[test]
    fn misbehavior_and_watchdog_bookkeeping() {
        let (env, _) = env();
        let list = ZnodeList::default();
        let mnb = announcement(&env, 5);
        let outpoint = mnb.identity.outpoint;
        list.process_broadcast(mnb, &env, None).unwrap();

        assert_eq!(list.report_misbehavior(&outpoint), Some(1));
        assert_eq!(list.report_misbehavior(&OutPoint::new([9; 32], 9)), None);

        assert!(!list.is_watchdog_active(T0));
        assert!(list.record_watchdog_vote(&outpoint, T0));
        assert!(list.is_watchdog_active(T0 + 100));
        assert!(!list.is_watchdog_active(T0 + ZNODE_WATCHDOG_MAX_SECONDS + 1));
        assert_eq!(list.get(&outpoint).unwrap().info().last_watchdog_vote, T0);
    }

    #[test]
    fn counts_and_infos() {
        let (env, _) = env();
        let list = ZnodeList::default();
        for seed in 1..=3 {
            list.process_broadcast(announcement(&env, seed), &env, None).unwrap();
        }
        assert_eq!(list.infos().len(), 3);
        assert_eq!(list.count_enabled(), 0);
        let counts = list.count_by_state();
        assert_eq!(counts.len(), ZnodeState::ALL.len());
        assert!(counts.contains(&(ZnodeState::PreEnabled, 3)));
        assert_eq!(list.scope(None, T0).payment_cycle, 3);
    }

    #[test]
    fn seen_cache_is_bounded() {
        let list = ZnodeList::new(4);
        for i in 0..10u8 {
            list.remember(&list.seen_pings, [i; 32], i as i64);
        }
        assert!(list.seen_ping_count() <= 4);
        assert!(list.seen_pings.contains_key(&[9; 32]));
    }
}
