//! Error taxonomy for the sync core.
//!
//! Everything here is contained by the `SyncController`; callers of `refresh()`
//! never see these values. Stale-update rejections and scope cancellation are
//! normal outcomes and are not represented as failures of the cycle.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("not connected to {host}")]
    NotConnected { host: String },

    #[error("connection to {host} failed: {reason}")]
    Connectivity { host: String, reason: String },

    #[error("snapshot fetch failed: {0}")]
    SnapshotFetch(String),

    #[error("subscription broken: {0}")]
    SubscriptionBroken(String),

    #[error("scope terminated")]
    ScopeTerminated,
}

impl SyncError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::NotConnected { .. } => "not_connected",
            Self::Connectivity { .. } => "connectivity",
            Self::SnapshotFetch(_) => "snapshot_fetch",
            Self::SubscriptionBroken(_) => "subscription_broken",
            Self::ScopeTerminated => "scope_terminated",
        }
    }

    /// True when the memoized client for the host can no longer be trusted and
    /// the next refresh must open a fresh connection.
    pub fn invalidates_client(&self) -> bool {
        matches!(
            self,
            Self::Connectivity { .. } | Self::SnapshotFetch(_) | Self::SubscriptionBroken(_)
        )
    }

    /// Cancellation unwinds silently; it is never reported.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::ScopeTerminated)
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
