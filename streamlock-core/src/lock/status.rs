//! Remote and local lock statuses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status column of the persisted lock record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    Available,
    Locked,
    AwaitingRelease,
}

/// Local view of the lock held by one client instance.
///
/// A superset of [`RemoteStatus`] plus the phases only a client goes
/// through while its RPCs and feed events are in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockStatus {
    /// No session yet, or the initial read has not completed
    #[default]
    Initial,
    /// Nobody holds the lock
    Available,
    /// request-lock sent, waiting for the feed to confirm
    Requesting,
    /// Another device holds the lock and has been asked to yield
    Pending,
    /// This instance owns the playback slot
    Acquired,
    /// Another device asked for the lock and this instance must yield
    AwaitingMyRelease,
    /// release-lock sent, waiting for the feed to confirm
    Releasing,
    /// Someone else is playing
    LockedByOther,
    /// An RPC or the subscription failed; needs a manual retry
    Error,
}

impl LockStatus {
    /// Whether `play` may be called in this status.
    pub fn allows_play(self) -> bool {
        matches!(
            self,
            LockStatus::Available | LockStatus::Acquired | LockStatus::LockedByOther
        )
    }

    /// Whether a request-lock is already outstanding or pointless.
    pub fn has_request_in_flight(self) -> bool {
        matches!(
            self,
            LockStatus::Requesting
                | LockStatus::Pending
                | LockStatus::Acquired
                | LockStatus::AwaitingMyRelease
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LockStatus::Initial => "INITIAL",
            LockStatus::Available => "AVAILABLE",
            LockStatus::Requesting => "REQUESTING",
            LockStatus::Pending => "PENDING",
            LockStatus::Acquired => "ACQUIRED",
            LockStatus::AwaitingMyRelease => "AWAITING_MY_RELEASE",
            LockStatus::Releasing => "RELEASING",
            LockStatus::LockedByOther => "LOCKED_BY_OTHER",
            LockStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_status_wire_names() {
        let status: RemoteStatus = serde_json::from_str("\"AWAITING_RELEASE\"").unwrap();
        assert_eq!(status, RemoteStatus::AwaitingRelease);
        assert_eq!(
            serde_json::to_string(&RemoteStatus::Locked).unwrap(),
            "\"LOCKED\""
        );
    }

    #[test]
    fn test_local_status_display_matches_wire() {
        for status in [
            LockStatus::Initial,
            LockStatus::AwaitingMyRelease,
            LockStatus::LockedByOther,
        ] {
            let wire = serde_json::to_string(&status).unwrap();
            assert_eq!(wire, format!("\"{status}\""));
        }
    }

    #[test]
    fn test_play_allowed_only_when_slot_reachable() {
        assert!(LockStatus::Acquired.allows_play());
        assert!(LockStatus::Available.allows_play());
        assert!(LockStatus::LockedByOther.allows_play());
        assert!(!LockStatus::Requesting.allows_play());
        assert!(!LockStatus::Error.allows_play());
    }
}
