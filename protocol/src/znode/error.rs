//! Error types for znode message validation.
//!
//! Every rejection carries two extra pieces of information besides its
//! message: an [`ErrorClass`] describing what kind of problem it is, and a
//! DoS weight (0, 1, 33 or 100) the peer layer adds to the sender's
//! misbehavior score. Zero means "not the sender's fault" and is the
//! common case.

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

use crate::chain::{BlockHash, OutPoint};
use crate::config::NetworkMode;
use crate::znode::ZnodeState;

/// DoS weight for outright forgeries.
pub const DOS_FORGERY: u32 = 100;
/// DoS weight for a bad ping signature or a collateral key mismatch.
pub const DOS_SUSPICIOUS: u32 = 33;
/// DoS weight for timestamps too far in the future.
pub const DOS_CLOCK: u32 = 1;

/// Which message a signature failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedMessage {
    Ping,
    Broadcast,
}

impl fmt::Display for SignedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ping => f.write_str("ping"),
            Self::Broadcast => f.write_str("broadcast"),
        }
    }
}

/// Which of the two identity keys a check refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Collateral,
    Operating,
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collateral => f.write_str("collateral"),
            Self::Operating => f.write_str("operating"),
        }
    }
}

/// Broad category of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed or forged content.
    Structural,
    /// Wrong time: too early, too late, replayed.
    Temporal,
    /// Disagrees with what we already know about the node.
    Consistency,
    /// A local resource was unavailable. Retry later.
    Availability,
    /// The collateral is gone for good.
    Terminal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Structural => "structural",
            ErrorClass::Temporal => "temporal",
            ErrorClass::Consistency => "consistency",
            ErrorClass::Availability => "availability",
            ErrorClass::Terminal => "terminal",
        }
    }
}

/// Why a ping or announcement was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZnodeError {
    #[error("ping signed at {sig_time}, more than an hour ahead of network time {now}")]
    ClockSkew { sig_time: i64, now: i64 },

    #[error("announcement signed at {sig_time}, more than an hour ahead of network time {now}")]
    FutureSignature { sig_time: i64, now: i64 },

    #[error("ping anchored to unknown block {0}")]
    UnknownAnchor(BlockHash),

    #[error("ping anchor at height {anchor_height} is too old for tip {tip_height}")]
    AnchorTooOld { anchor_height: u32, tip_height: u32 },

    #[error("ping signed at {sig_time} arrived too soon after the previous one at {previous}")]
    TooSoon { previous: i64, sig_time: i64 },

    #[error("announcement signed at {sig_time} is older than the current one at {current}")]
    Backdated { sig_time: i64, current: i64 },

    #[error("announcement duplicates the current one")]
    Duplicate,

    #[error("announcement signed at {sig_time}, before the collateral matured at {matured_at}")]
    SigTimeBeforeConfirmation { sig_time: i64, matured_at: i64 },

    #[error("{0} key does not map to a standard script")]
    BadIdentityScript(KeyRole),

    #[error("collateral input carries a non-empty signature script")]
    NonEmptySigScript,

    #[error("invalid service address {0}")]
    InvalidAddress(SocketAddr),

    #[error("service port {port} is not allowed on {network}")]
    PortMismatch { port: u16, network: NetworkMode },

    #[error("{0} signature verification failed")]
    BadSignature(SignedMessage),

    #[error("failed to sign {0}")]
    SignFailed(SignedMessage),

    #[error("collateral key does not match the known owner of {0}")]
    IdentityMismatch(OutPoint),

    #[error("collateral value {actual} does not equal the required {required}")]
    CollateralValueMismatch { actual: u64, required: u64 },

    #[error("collateral has {confirmations} confirmations, {required} required")]
    InsufficientConfirmations { confirmations: u32, required: u32 },

    #[error("no znode record for {0}")]
    UnknownRecord(OutPoint),

    #[error("znode protocol version is outdated")]
    ProtocolOutdated,

    #[error("znode must be restarted with a new announcement")]
    NewStartRequired,

    #[error("ping stored but znode is {0}")]
    NotEnabled(ZnodeState),

    #[error("znode is banned by proof-of-service")]
    PoseBanned,

    #[error("wallet cannot provide collateral {0}")]
    NoCollateral(String),

    #[error("chain state is busy")]
    ChainBusy,

    #[error("blockchain sync is not finished")]
    SyncIncomplete,

    #[error("chain is too short to anchor a ping")]
    ChainTooShort,

    #[error("collateral {0} is missing or spent")]
    CollateralNotFound(OutPoint),
}

impl ZnodeError {
    pub fn class(&self) -> ErrorClass {
        use ZnodeError::*;
        match self {
            ClockSkew { .. }
            | FutureSignature { .. }
            | UnknownAnchor(_)
            | AnchorTooOld { .. }
            | TooSoon { .. }
            | Backdated { .. }
            | Duplicate
            | SigTimeBeforeConfirmation { .. } => ErrorClass::Temporal,
            BadIdentityScript(_)
            | NonEmptySigScript
            | InvalidAddress(_)
            | PortMismatch { .. }
            | BadSignature(_)
            | SignFailed(_) => ErrorClass::Structural,
            IdentityMismatch(_)
            | CollateralValueMismatch { .. }
            | InsufficientConfirmations { .. }
            | UnknownRecord(_)
            | ProtocolOutdated
            | NewStartRequired
            | NotEnabled(_)
            | PoseBanned
            | NoCollateral(_) => ErrorClass::Consistency,
            ChainBusy | SyncIncomplete | ChainTooShort => ErrorClass::Availability,
            CollateralNotFound(_) => ErrorClass::Terminal,
        }
    }

    /// Misbehavior points to charge the peer that sent the message.
    pub fn dos_weight(&self) -> u32 {
        use ZnodeError::*;
        match self {
            BadSignature(SignedMessage::Broadcast) | BadIdentityScript(_) | NonEmptySigScript => {
                DOS_FORGERY
            }
            BadSignature(SignedMessage::Ping) | IdentityMismatch(_) => DOS_SUSPICIOUS,
            ClockSkew { .. } | FutureSignature { .. } => DOS_CLOCK,
            _ => 0,
        }
    }

    /// Whether the same message may succeed if it is seen again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ZnodeError::ChainBusy
                | ZnodeError::SyncIncomplete
                | ZnodeError::ChainTooShort
                | ZnodeError::UnknownAnchor(_)
                | ZnodeError::UnknownRecord(_)
                | ZnodeError::InsufficientConfirmations { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forgeries_weigh_the_most() {
        assert_eq!(ZnodeError::BadSignature(SignedMessage::Broadcast).dos_weight(), 100);
        assert_eq!(ZnodeError::BadIdentityScript(KeyRole::Operating).dos_weight(), 100);
        assert_eq!(ZnodeError::NonEmptySigScript.dos_weight(), 100);
        assert_eq!(ZnodeError::BadSignature(SignedMessage::Ping).dos_weight(), 33);
        assert_eq!(
            ZnodeError::IdentityMismatch(OutPoint::new([0; 32], 0)).dos_weight(),
            33
        );
    }

    #[test]
    fn clock_errors_weigh_one() {
        assert_eq!(ZnodeError::ClockSkew { sig_time: 10, now: 0 }.dos_weight(), 1);
        assert_eq!(
            ZnodeError::FutureSignature { sig_time: 10, now: 0 }.dos_weight(),
            1
        );
    }

    #[test]
    fn local_conditions_are_free() {
        for err in [
            ZnodeError::ChainBusy,
            ZnodeError::SyncIncomplete,
            ZnodeError::Duplicate,
            ZnodeError::InsufficientConfirmations {
                confirmations: 3,
                required: 15,
            },
            ZnodeError::CollateralNotFound(OutPoint::new([1; 32], 0)),
        ] {
            assert_eq!(err.dos_weight(), 0, "{err}");
        }
    }

    #[test]
    fn classes() {
        assert_eq!(ZnodeError::ChainBusy.class(), ErrorClass::Availability);
        assert_eq!(
            ZnodeError::CollateralNotFound(OutPoint::new([1; 32], 0)).class(),
            ErrorClass::Terminal
        );
        assert_eq!(ZnodeError::Duplicate.class(), ErrorClass::Temporal);
        assert_eq!(ZnodeError::PoseBanned.class(), ErrorClass::Consistency);
        assert!(ZnodeError::ChainBusy.is_retryable());
        assert!(!ZnodeError::PoseBanned.is_retryable());
    }

    #[test]
    fn messages_name_the_signed_message() {
        let msg = ZnodeError::BadSignature(SignedMessage::Ping).to_string();
        assert_eq!(msg, "ping signature verification failed");
    }
}
