use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a znode record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZnodeState {
    PreEnabled,
    Enabled,
    Expired,
    OutpointSpent,
    UpdateRequired,
    WatchdogExpired,
    NewStartRequired,
    PoseBan,
}

impl ZnodeState {
    pub const ALL: [ZnodeState; 8] = [
        ZnodeState::PreEnabled,
        ZnodeState::Enabled,
        ZnodeState::Expired,
        ZnodeState::OutpointSpent,
        ZnodeState::UpdateRequired,
        ZnodeState::WatchdogExpired,
        ZnodeState::NewStartRequired,
        ZnodeState::PoseBan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreEnabled => "PRE_ENABLED",
            Self::Enabled => "ENABLED",
            Self::Expired => "EXPIRED",
            Self::OutpointSpent => "OUTPOINT_SPENT",
            Self::UpdateRequired => "UPDATE_REQUIRED",
            Self::WatchdogExpired => "WATCHDOG_EXPIRED",
            Self::NewStartRequired => "NEW_START_REQUIRED",
            Self::PoseBan => "POSE_BAN",
        }
    }

    /// States a record is held in while the list is still syncing.
    pub fn holds_while_syncing(&self) -> bool {
        matches!(
            self,
            Self::Expired | Self::WatchdogExpired | Self::NewStartRequired
        )
    }
}

impl fmt::Display for ZnodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
