//! # Protocol Configuration & Constants
//!
//! Every znode timing window, collateral rule and PoSe threshold lives
//! here. Network-dependent values are resolved exactly once at startup into
//! a [`NetworkParams`] value that is then passed by reference to every
//! component that needs it. There is no process-wide singleton.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Protocol version carried by freshly created announcements.
pub const PROTOCOL_VERSION: u32 = 90_026;

/// Version stamped on legacy znode announcements.
pub const LEGACY_ZNODES_PROTOCOL_VERSION: u32 = 90_023;

// ---------------------------------------------------------------------------
// Collateral
// ---------------------------------------------------------------------------

/// Smallest currency unit per coin.
pub const COIN: u64 = 100_000_000;

/// Exact value a collateral output must carry. Not "at least", exactly.
pub const ZNODE_COLLATERAL: u64 = 1_000 * COIN;

// ---------------------------------------------------------------------------
// Znode Timing
// ---------------------------------------------------------------------------

/// Minimum seconds between two unforced `check()` evaluations of a record.
pub const ZNODE_CHECK_SECONDS: i64 = 5;

/// Minimum seconds between two applied announcements for the same record.
pub const ZNODE_MIN_MNB_SECONDS: i64 = 5 * 60;

/// A record without a ping for this long is `Expired`.
pub const ZNODE_EXPIRATION_SECONDS: i64 = 65 * 60;

/// A record without a watchdog vote for this long is `WatchdogExpired`.
pub const ZNODE_WATCHDOG_MAX_SECONDS: i64 = 120 * 60;

/// Tolerance subtracted from the minimum ping interval when rejecting early
/// pings. Clocks jitter; peers should not be punished for it.
pub const PING_SPACING_TOLERANCE_SECONDS: i64 = 60;

/// Signatures dated further than this into the future are rejected.
pub const MAX_FUTURE_DRIFT_SECONDS: i64 = 60 * 60;

/// Pings anchor to the block this many confirmations behind the tip.
pub const PING_ANCHOR_DEPTH: u32 = 12;

/// Anchors deeper than this behind the tip are considered stale.
pub const PING_MAX_ANCHOR_AGE: u32 = 24;

/// Ban score at which a record is forced into `PoseBan`.
pub const POSE_BAN_MAX_SCORE: i32 = 5;

// ---------------------------------------------------------------------------
// Network Mode
// ---------------------------------------------------------------------------

/// Which chain the process is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// The production network.
    Mainnet,
    /// The public test network. Same timings as mainnet.
    Testnet,
    /// Local regression-test network. Short timings, relaxed address rules.
    Regtest,
}

impl NetworkMode {
    /// Lowercase name used in logs, config files and CLI flags.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Mainnet => "mainnet",
            NetworkMode::Testnet => "testnet",
            NetworkMode::Regtest => "regtest",
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(NetworkMode::Mainnet),
            "testnet" | "test" => Ok(NetworkMode::Testnet),
            "regtest" => Ok(NetworkMode::Regtest),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Timing Policy
// ---------------------------------------------------------------------------

/// Network-dependent ping cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingPolicy {
    /// Minimum spacing between accepted pings, and the age a record must
    /// reach past its announcement before it leaves `PreEnabled`.
    pub min_ping_interval_secs: i64,
    /// Without a ping for this long the operator must re-announce.
    pub new_start_required_secs: i64,
}

impl TimingPolicy {
    /// Resolves the timing policy for a network. Pure; call once at startup.
    pub fn resolve(mode: NetworkMode) -> Self {
        match mode {
            NetworkMode::Regtest => Self {
                min_ping_interval_secs: 30,
                new_start_required_secs: 3 * 60,
            },
            NetworkMode::Mainnet | NetworkMode::Testnet => Self {
                min_ping_interval_secs: 10 * 60,
                new_start_required_secs: 180 * 60,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Default P2P port on mainnet. Announcements on other networks must not use it.
pub const MAINNET_DEFAULT_PORT: u16 = 8168;

/// Default P2P port on testnet.
pub const TESTNET_DEFAULT_PORT: u16 = 18168;

/// Default P2P port on regtest.
pub const REGTEST_DEFAULT_PORT: u16 = 18444;

/// Everything network-dependent the znode core reads, resolved once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    /// Network this process runs on.
    pub mode: NetworkMode,
    /// Ping cadence for this network.
    pub timing: TimingPolicy,
    /// Default P2P port of this network.
    pub default_port: u16,
    /// Confirmations a collateral output needs before it can back a znode.
    pub min_collateral_confirmations: u32,
    /// Exact collateral value.
    pub collateral_amount: u64,
}

impl NetworkParams {
    /// Builds the parameter set for a network.
    pub fn for_mode(mode: NetworkMode) -> Self {
        let (default_port, min_collateral_confirmations) = match mode {
            NetworkMode::Mainnet => (MAINNET_DEFAULT_PORT, 15),
            NetworkMode::Testnet => (TESTNET_DEFAULT_PORT, 1),
            NetworkMode::Regtest => (REGTEST_DEFAULT_PORT, 1),
        };

        Self {
            mode,
            timing: TimingPolicy::resolve(mode),
            default_port,
            min_collateral_confirmations,
            collateral_amount: ZNODE_COLLATERAL,
        }
    }

    /// `true` on the regression-test network.
    pub fn is_regtest(&self) -> bool {
        self.mode == NetworkMode::Regtest
    }

    /// Mainnet only accepts the mainnet port; every other network must avoid it
    /// so that an announcement cannot be replayed across networks.
    pub fn is_valid_service_port(&self, port: u16) -> bool {
        match self.mode {
            NetworkMode::Mainnet => port == MAINNET_DEFAULT_PORT,
            NetworkMode::Testnet | NetworkMode::Regtest => port != MAINNET_DEFAULT_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regtest_timings_are_shorter() {
        let main = TimingPolicy::resolve(NetworkMode::Mainnet);
        let reg = TimingPolicy::resolve(NetworkMode::Regtest);
        assert!(reg.min_ping_interval_secs < main.min_ping_interval_secs);
        assert!(reg.new_start_required_secs < main.new_start_required_secs);
    }

    #[test]
    fn test_testnet_uses_production_timings() {
        assert_eq!(
            TimingPolicy::resolve(NetworkMode::Testnet),
            TimingPolicy::resolve(NetworkMode::Mainnet)
        );
    }

    #[test]
    fn test_timing_windows_are_ordered() {
        // A record must be able to ping several times before it expires,
        // and expiry must come before the new-start requirement.
        let t = TimingPolicy::resolve(NetworkMode::Mainnet);
        assert!(t.min_ping_interval_secs > PING_SPACING_TOLERANCE_SECONDS);
        assert!(t.min_ping_interval_secs < ZNODE_EXPIRATION_SECONDS);
        assert!(ZNODE_EXPIRATION_SECONDS < t.new_start_required_secs);
    }

    #[test]
    fn test_port_rules() {
        let main = NetworkParams::for_mode(NetworkMode::Mainnet);
        assert!(main.is_valid_service_port(MAINNET_DEFAULT_PORT));
        assert!(!main.is_valid_service_port(TESTNET_DEFAULT_PORT));

        let test = NetworkParams::for_mode(NetworkMode::Testnet);
        assert!(test.is_valid_service_port(TESTNET_DEFAULT_PORT));
        assert!(!test.is_valid_service_port(MAINNET_DEFAULT_PORT));
    }

    #[test]
    fn test_network_mode_parsing() {
        assert_eq!("MAINNET".parse::<NetworkMode>(), Ok(NetworkMode::Mainnet));
        assert_eq!("regtest".parse::<NetworkMode>(), Ok(NetworkMode::Regtest));
        assert!("devnet".parse::<NetworkMode>().is_err());
        assert_eq!(NetworkMode::Testnet.to_string(), "testnet");
    }

    #[test]
    fn test_collateral_amount() {
        assert_eq!(ZNODE_COLLATERAL, 100_000_000_000);
        assert_eq!(
            NetworkParams::for_mode(NetworkMode::Regtest).collateral_amount,
            ZNODE_COLLATERAL
        );
    }
}
