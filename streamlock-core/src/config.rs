//! Centralized configuration for Streamlock.
//!
//! All tunable parameters are defined here to avoid hard-coded values
//! scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Central configuration for all Streamlock components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct StreamLockConfig {
    pub lock: LockConfig,
    pub coordinator: CoordinatorConfig,
    pub identity: IdentityConfig,
}

/// What a freshly subscribed client does when the lock record is already
/// held by its own device.
///
/// A new instance cannot be the one playing, so a record naming this device
/// at subscribe time is either left over from a crashed run or held by a
/// sibling instance (another tab or process of the same installation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleLockPolicy {
    /// Release the lock so the account becomes available again.
    #[default]
    Release,
    /// Leave the record alone and report `LOCKED_BY_OTHER`.
    Observe,
}

impl std::str::FromStr for StaleLockPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "release" => Ok(StaleLockPolicy::Release),
            "observe" => Ok(StaleLockPolicy::Observe),
            _ => Err(format!("Invalid stale lock policy: {s}")),
        }
    }
}

/// Lock client behaviour.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Liveness ping period while holding the lock
    pub heartbeat_interval: Duration,
    /// Capacity of the client command channel
    pub command_buffer: usize,
    /// Handling of a record held by this device at subscribe time
    pub stale_lock_policy: StaleLockPolicy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(8),
            command_buffer: 64,
            stale_lock_policy: StaleLockPolicy::Release,
        }
    }
}

/// Hosted coordinator connection settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Project base URL; `None` means no hosted coordinator is configured
    pub base_url: Option<Url>,
    /// Public API key sent with every request
    pub api_key: String,
    /// HTTP request timeout
    pub request_timeout: Duration,
    /// Polling period for the REST-backed change feed
    pub poll_interval: Duration,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: String::new(),
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            user_agent: "streamlock/0.1.0",
        }
    }
}

/// Where the stable device identity lives.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// File holding the persisted device id
    pub device_id_path: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            device_id_path: PathBuf::from(".streamlock/device-id"),
        }
    }
}

impl StreamLockConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Values that fail to parse keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(secs) = std::env::var("STREAMLOCK_HEARTBEAT_SECS") {
            if let Ok(seconds) = secs.parse::<u64>() {
                config.lock.heartbeat_interval = Duration::from_secs(seconds);
            }
        }

        if let Ok(policy) = std::env::var("STREAMLOCK_STALE_LOCK_POLICY") {
            if let Ok(policy) = policy.parse::<StaleLockPolicy>() {
                config.lock.stale_lock_policy = policy;
            }
        }

        if let Ok(base_url) = std::env::var("STREAMLOCK_COORDINATOR_URL") {
            match Url::parse(&base_url) {
                Ok(url) => config.coordinator.base_url = Some(url),
                Err(e) => tracing::warn!("Ignoring STREAMLOCK_COORDINATOR_URL: {e}"),
            }
        }

        if let Ok(api_key) = std::env::var("STREAMLOCK_API_KEY") {
            config.coordinator.api_key = api_key;
        }

        if let Ok(millis) = std::env::var("STREAMLOCK_POLL_INTERVAL_MS") {
            if let Ok(millis) = millis.parse::<u64>() {
                config.coordinator.poll_interval = Duration::from_millis(millis);
            }
        }

        if let Ok(path) = std::env::var("STREAMLOCK_DEVICE_ID_PATH") {
            config.identity.device_id_path = PathBuf::from(path);
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Short intervals keep heartbeat and polling tests fast.
    pub fn for_testing() -> Self {
        Self {
            lock: LockConfig {
                heartbeat_interval: Duration::from_millis(20),
                ..Default::default()
            },
            coordinator: CoordinatorConfig {
                request_timeout: Duration::from_secs(2),
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_heartbeat_interval() {
        let config = StreamLockConfig::default();
        assert_eq!(config.lock.heartbeat_interval, Duration::from_secs(8));
        assert_eq!(config.lock.stale_lock_policy, StaleLockPolicy::Release);
        assert!(config.coordinator.base_url.is_none());
    }

    #[test]
    fn test_stale_lock_policy_parsing() {
        assert_eq!(
            "Observe".parse::<StaleLockPolicy>(),
            Ok(StaleLockPolicy::Observe)
        );
        assert_eq!(
            "release".parse::<StaleLockPolicy>(),
            Ok(StaleLockPolicy::Release)
        );
        assert!("ignore".parse::<StaleLockPolicy>().is_err());
    }

    #[test]
    fn test_testing_config_is_fast() {
        let config = StreamLockConfig::for_testing();
        assert!(config.lock.heartbeat_interval < Duration::from_secs(1));
        assert!(config.coordinator.poll_interval < Duration::from_secs(1));
    }
}
