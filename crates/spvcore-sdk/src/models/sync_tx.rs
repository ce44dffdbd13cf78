use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SyncConfig;

/// Progress of one downstream step of a recorded transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Ready,
    Processing,
    Error,
    Skipped,
    Complete,
    Canceled,
}

impl SyncStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Ready => 1,
            Self::Processing => 2,
            Self::Error => 3,
            Self::Skipped | Self::Complete => 4,
            Self::Canceled => 5,
        }
    }

    /// Statuses only move forward; `Canceled` is reachable from anywhere and final.
    pub fn can_advance_to(self, next: SyncStatus) -> bool {
        if self == Self::Canceled {
            return false;
        }
        next == Self::Canceled || next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Error => "error",
            Self::Skipped => "skipped",
            Self::Complete => "complete",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "processing" => Some(Self::Processing),
            "error" => Some(Self::Error),
            "skipped" => Some(Self::Skipped),
            "complete" => Some(Self::Complete),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

fn ready_or_skipped(enabled: bool) -> SyncStatus {
    if enabled {
        SyncStatus::Ready
    } else {
        SyncStatus::Skipped
    }
}

/// Downstream progress of a transaction, keyed by transaction ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTransaction {
    pub id: String,
    pub broadcast_status: SyncStatus,
    pub p2p_status: SyncStatus,
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncTransaction {
    pub fn new(txid: impl Into<String>, policy: SyncConfig, has_p2p_outputs: bool) -> Self {
        let now = Utc::now();
        Self {
            id: txid.into(),
            broadcast_status: ready_or_skipped(policy.broadcast),
            p2p_status: ready_or_skipped(policy.paymail_p2p && has_p2p_outputs),
            sync_status: ready_or_skipped(policy.sync_on_chain),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn advance_broadcast(&mut self, next: SyncStatus) -> bool {
        advance(&mut self.broadcast_status, next)
    }

    pub fn advance_p2p(&mut self, next: SyncStatus) -> bool {
        advance(&mut self.p2p_status, next)
    }

    pub fn advance_sync(&mut self, next: SyncStatus) -> bool {
        advance(&mut self.sync_status, next)
    }

    /// Cancel all three steps. Returns `true` if anything changed.
    pub fn cancel_all(&mut self) -> bool {
        let b = self.advance_broadcast(SyncStatus::Canceled);
        let p = self.advance_p2p(SyncStatus::Canceled);
        let s = self.advance_sync(SyncStatus::Canceled);
        b || p || s
    }
}

fn advance(field: &mut SyncStatus, next: SyncStatus) -> bool {
    if *field == next || !field.can_advance_to(next) {
        return false;
    }
    *field = next;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_never_regress() {
        let mut sync = SyncTransaction::new("aa", SyncConfig::default(), true);
        assert_eq!(sync.p2p_status, SyncStatus::Ready);
        assert!(sync.advance_broadcast(SyncStatus::Complete));
        assert!(!sync.advance_broadcast(SyncStatus::Ready));
        assert!(!sync.advance_broadcast(SyncStatus::Complete));
        assert_eq!(sync.broadcast_status, SyncStatus::Complete);
    }

    #[test]
    fn cancel_from_anywhere_is_final() {
        let mut sync = SyncTransaction::new("aa", SyncConfig::default(), false);
        assert_eq!(sync.p2p_status, SyncStatus::Skipped);
        sync.advance_sync(SyncStatus::Complete);
        assert!(sync.cancel_all());
        assert_eq!(sync.broadcast_status, SyncStatus::Canceled);
        assert_eq!(sync.p2p_status, SyncStatus::Canceled);
        assert_eq!(sync.sync_status, SyncStatus::Canceled);
        assert!(!sync.cancel_all());
        assert!(!sync.advance_broadcast(SyncStatus::Complete));
    }

    #[test]
    fn disabled_steps_are_skipped() {
        let policy = SyncConfig {
            broadcast: false,
            sync_on_chain: false,
            ..SyncConfig::default()
        };
        let sync = SyncTransaction::new("aa", policy, true);
        assert_eq!(sync.broadcast_status, SyncStatus::Skipped);
        assert_eq!(sync.p2p_status, SyncStatus::Ready);
        assert_eq!(sync.sync_status, SyncStatus::Skipped);
    }
}
