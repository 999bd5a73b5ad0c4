//! The per-account lock record as stored by the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LockError;
use super::status::RemoteStatus;
use crate::identity::{DeviceId, UserId};

/// One row per account describing who owns the playback slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub user_id: UserId,
    pub status: RemoteStatus,
    #[serde(default)]
    pub locked_by_device_id: Option<DeviceId>,
    #[serde(default)]
    pub requested_by_device_id: Option<DeviceId>,
    /// Advisory liveness stamp written by the holder
    #[serde(default)]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl LockRecord {
    /// An unheld record.
    pub fn available(user_id: UserId) -> Self {
        Self {
            user_id,
            status: RemoteStatus::Available,
            locked_by_device_id: None,
            requested_by_device_id: None,
            last_heartbeat_at: None,
        }
    }

    /// A record held by `holder`.
    pub fn locked(user_id: UserId, holder: DeviceId) -> Self {
        Self {
            status: RemoteStatus::Locked,
            locked_by_device_id: Some(holder),
            ..Self::available(user_id)
        }
    }

    /// A record held by `holder` with `requester` waiting to take over.
    pub fn awaiting_release(user_id: UserId, holder: DeviceId, requester: DeviceId) -> Self {
        Self {
            status: RemoteStatus::AwaitingRelease,
            locked_by_device_id: Some(holder),
            requested_by_device_id: Some(requester),
            ..Self::available(user_id)
        }
    }

    /// Decodes a change-feed payload and checks the status/ownership
    /// invariants.
    ///
    /// # Errors
    ///
    /// - `LockError::MalformedRecord` - Payload has the wrong shape or its
    ///   ownership fields contradict its status
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, LockError> {
        let record = Self::deserialize(payload).map_err(|e| LockError::MalformedRecord {
            reason: e.to_string(),
        })?;
        record.validate()?;
        Ok(record)
    }

    /// Checks that ownership fields agree with the status.
    ///
    /// # Errors
    ///
    /// - `LockError::MalformedRecord` - An invariant does not hold
    pub fn validate(&self) -> Result<(), LockError> {
        let consistent = match self.status {
            RemoteStatus::Available => {
                self.locked_by_device_id.is_none() && self.requested_by_device_id.is_none()
            }
            RemoteStatus::Locked => self.locked_by_device_id.is_some(),
            RemoteStatus::AwaitingRelease => {
                self.locked_by_device_id.is_some() && self.requested_by_device_id.is_some()
            }
        };

        if consistent {
            Ok(())
        } else {
            Err(LockError::MalformedRecord {
                reason: format!(
                    "status {:?} with locked_by={:?} requested_by={:?}",
                    self.status, self.locked_by_device_id, self.requested_by_device_id
                ),
            })
        }
    }

    pub fn is_locked_by(&self, device_id: &DeviceId) -> bool {
        self.locked_by_device_id.as_ref() == Some(device_id)
    }

    pub fn is_requested_by(&self, device_id: &DeviceId) -> bool {
        self.requested_by_device_id.as_ref() == Some(device_id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_payload_with_heartbeat_parses() {
        let payload = json!({
            "user_id": "user-1",
            "status": "LOCKED",
            "locked_by_device_id": "device-a",
            "requested_by_device_id": null,
            "last_heartbeat_at": "2026-10-16T12:00:00Z",
        });

        let record = LockRecord::from_payload(&payload).unwrap();

        assert_eq!(record.status, RemoteStatus::Locked);
        assert!(record.is_locked_by(&DeviceId::new("device-a")));
        assert!(record.last_heartbeat_at.is_some());
    }

    #[test]
    fn test_missing_optional_columns_default_to_none() {
        let payload = json!({ "user_id": "user-1", "status": "AVAILABLE" });
        let record = LockRecord::from_payload(&payload).unwrap();
        assert_eq!(record, LockRecord::available(UserId::new("user-1")));
    }

    #[test]
    fn test_unknown_status_is_malformed() {
        let payload = json!({ "user_id": "user-1", "status": "STOLEN" });
        assert!(matches!(
            LockRecord::from_payload(&payload),
            Err(LockError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_locked_without_holder_is_malformed() {
        let payload = json!({ "user_id": "user-1", "status": "LOCKED" });
        assert!(matches!(
            LockRecord::from_payload(&payload),
            Err(LockError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_awaiting_release_needs_requester() {
        let mut record = LockRecord::awaiting_release(
            UserId::new("user-1"),
            DeviceId::new("a"),
            DeviceId::new("b"),
        );
        assert!(record.validate().is_ok());

        record.requested_by_device_id = None;
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_available_with_owner_is_malformed() {
        let mut record = LockRecord::available(UserId::new("user-1"));
        record.locked_by_device_id = Some(DeviceId::new("a"));
        assert!(record.validate().is_err());
    }
}
