//! Device, instance and account identities.
//!
//! A device id is stable across restarts and is what the lock record names
//! as owner. An instance id is minted per running process, so two instances
//! of the same device can tell which one of them is actually playing.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Account identifier, the key of the lock record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable installation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a random device id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one running instance of a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a random instance id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The pair of identifiers every reconciliation decision compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub device_id: DeviceId,
    pub instance_id: InstanceId,
}

impl Identity {
    pub fn new(device_id: DeviceId, instance_id: InstanceId) -> Self {
        Self {
            device_id,
            instance_id,
        }
    }

    /// Creates an identity for a new instance of the given device.
    pub fn for_device(device_id: DeviceId) -> Self {
        Self::new(device_id, InstanceId::generate())
    }

    /// Loads the persisted device id from `path`, creating and saving a new
    /// one if the file is missing or empty. The instance id is always fresh.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - If the file exists but cannot be read, or a new
    ///   id cannot be written
    pub fn load_or_create(path: &Path) -> std::io::Result<Self> {
        let existing = match std::fs::read_to_string(path) {
            Ok(contents) => Some(contents.trim().to_string()).filter(|id| !id.is_empty()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        let device_id = match existing {
            Some(id) => DeviceId::new(id),
            None => {
                let device_id = DeviceId::generate();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, device_id.as_str())?;
                tracing::info!("Created device id {} at {}", device_id, path.display());
                device_id
            }
        };

        Ok(Self::for_device(device_id))
    }
}

/// Authenticated session handed over by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    /// Bearer token for the hosted coordinator; unused by in-process ones
    pub access_token: String,
}

impl Session {
    pub fn new(user_id: UserId, access_token: impl Into<String>) -> Self {
        Self {
            user_id,
            access_token: access_token.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("device-id");

        let first = Identity::load_or_create(&path).unwrap();
        let second = Identity::load_or_create(&path).unwrap();

        assert_eq!(first.device_id, second.device_id);
        assert_ne!(first.instance_id, second.instance_id);
    }

    #[test]
    fn test_empty_device_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device-id");
        std::fs::write(&path, "  \n").unwrap();

        let identity = Identity::load_or_create(&path).unwrap();

        assert!(!identity.device_id.as_str().is_empty());
        let saved = std::fs::read_to_string(&path).unwrap();
        assert_eq!(saved, identity.device_id.as_str());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let device = DeviceId::new("tv-livingroom");
        assert_eq!(
            serde_json::to_string(&device).unwrap(),
            "\"tv-livingroom\""
        );
    }
}
