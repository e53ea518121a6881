//! Configuration for transport selection, legacy migration and retries
//!
//! This module provides the configuration structures used to wire a
//! [`StateManager`](crate::StateManager) for a session: which transport holds
//! the current document, where the legacy preferences live, and how hard to
//! retry writes.

use crate::legacy::{FilePreferences, LegacyMigration, APP_STATE};
use crate::transport::{LocalFileTransport, MemoryTransport, StateTransport};
use crate::{AppStateError, ProviderRegistry, Result, SessionKey, StateManager};
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Enumeration of supported transports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportBackend {
    /// One file per session under a base directory
    Local,
    /// Process memory only; nothing survives the process
    Memory,
}

/// Retry settings for transport writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: usize,
    /// Delay before the first retry, in milliseconds
    pub initial_interval_ms: u64,
    /// Upper bound for a single delay, in milliseconds
    pub max_interval_ms: u64,
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Local storage policy with this config's intervals
    pub fn to_policy(&self) -> ExponentialBackoff {
        let mut policy = appstate_retry::local_storage_backoff_policy();
        policy.initial_interval = Duration::from_millis(self.initial_interval_ms);
        policy.current_interval = policy.initial_interval;
        policy.max_interval = Duration::from_millis(self.max_interval_ms);
        policy
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(AppStateError::validation(
                "Retry max_attempts must be at least 1",
            ));
        }
        if self.initial_interval_ms > self.max_interval_ms {
            return Err(AppStateError::validation(
                "Retry initial interval must not exceed the max interval",
            ));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = appstate_retry::local_storage_backoff_policy();
        Self {
            max_attempts: appstate_retry::DEFAULT_MAX_ATTEMPTS,
            initial_interval_ms: policy.initial_interval.as_millis() as u64,
            max_interval_ms: policy.max_interval.as_millis() as u64,
        }
    }
}

/// Configuration for a session's state manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStateConfig {
    /// The transport holding the current document
    pub backend: TransportBackend,
    /// Base directory for the local transport (defaults to the current directory)
    pub local_base_path: Option<PathBuf>,
    /// Legacy preferences file to migrate from, if any
    pub legacy_preferences_path: Option<PathBuf>,
    /// Preferences key the legacy states were stored under
    pub legacy_key: String,
    /// Retry settings for transport writes
    #[serde(default)]
    pub retry: RetryConfig,
}

impl AppStateConfig {
    /// Local transport rooted at the current directory, no legacy migration
    pub fn default_local() -> Self {
        AppStateConfig {
            backend: TransportBackend::Local,
            local_base_path: None,
            legacy_preferences_path: None,
            legacy_key: APP_STATE.to_string(),
            retry: RetryConfig::default(),
        }
    }

    /// Local transport rooted at `base`
    pub fn local_with_base<P: Into<PathBuf>>(base: P) -> Self {
        AppStateConfig {
            local_base_path: Some(base.into()),
            ..Self::default_local()
        }
    }

    /// In-memory transport, no legacy migration
    pub fn memory() -> Self {
        AppStateConfig {
            backend: TransportBackend::Memory,
            ..Self::default_local()
        }
    }

    /// Enable migration from a legacy preferences file
    pub fn with_legacy_preferences<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.legacy_preferences_path = Some(path.into());
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.legacy_key.trim().is_empty() {
            return Err(AppStateError::validation(
                "Legacy preferences key must not be empty",
            ));
        }
        if let Some(base) = &self.local_base_path {
            if base.as_os_str().is_empty() {
                return Err(AppStateError::validation(
                    "Local base path must not be empty when set",
                ));
            }
        }
        self.retry.validate()
    }
}

impl Default for AppStateConfig {
    fn default() -> Self {
        Self::default_local()
    }
}

/// Build a state manager for `session` from configuration
///
/// The transport is boxed so that every backend yields the same manager type.
///
/// # Example
/// ```rust
/// use appstate_core::{create_manager_from_config, AppStateConfig, ProviderRegistry, SessionKey};
///
/// let session = SessionKey::new("ws-42")?;
/// let manager = create_manager_from_config(
///     AppStateConfig::memory(),
///     session,
///     ProviderRegistry::new(),
/// )?;
/// # Ok::<(), appstate_core::AppStateError>(())
/// ```
pub fn create_manager_from_config(
    config: AppStateConfig,
    session: SessionKey,
    registry: ProviderRegistry,
) -> Result<StateManager<Box<dyn StateTransport>>> {
    config.validate()?;

    let transport: Box<dyn StateTransport> = match config.backend {
        TransportBackend::Local => {
            let transport = match &config.local_base_path {
                Some(base) => LocalFileTransport::with_base_dir(base),
                None => LocalFileTransport::new(),
            };
            Box::new(transport.with_retry(config.retry.clone()))
        }
        TransportBackend::Memory => Box::new(MemoryTransport::new()),
    };

    let mut manager = StateManager::new(session, transport, registry);
    if let Some(path) = config.legacy_preferences_path {
        let store = FilePreferences::new(path);
        manager = manager.with_legacy(LegacyMigration::with_key(
            Box::new(store),
            config.legacy_key,
        ));
    }
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_local_config() {
        let config = AppStateConfig::default_local();
        assert_eq!(config.backend, TransportBackend::Local);
        assert!(config.local_base_path.is_none());
        assert!(config.legacy_preferences_path.is_none());
        assert_eq!(config.legacy_key, "IdeAppStates");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_local_with_base_and_legacy() {
        let config = AppStateConfig::local_with_base("/tmp/appstate")
            .with_legacy_preferences("/tmp/prefs.json");
        assert_eq!(config.local_base_path, Some(PathBuf::from("/tmp/appstate")));
        assert_eq!(
            config.legacy_preferences_path,
            Some(PathBuf::from("/tmp/prefs.json"))
        );
    }

    #[test]
    fn test_validate_rejects_blank_legacy_key() {
        let mut config = AppStateConfig::memory();
        config.legacy_key = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_retry_settings() {
        let mut config = AppStateConfig::memory();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        config.retry = RetryConfig {
            max_attempts: 2,
            initial_interval_ms: 500,
            max_interval_ms: 100,
        };
        assert!(config.validate().is_err());

        assert!(RetryConfig::disabled().validate().is_ok());
    }

    #[test]
    fn test_retry_policy_follows_local_storage_defaults() {
        let local = appstate_retry::local_storage_backoff_policy();
        let policy = RetryConfig::default().to_policy();
        assert_eq!(policy.initial_interval, local.initial_interval);
        assert_eq!(policy.max_interval, local.max_interval);
        assert_eq!(policy.max_elapsed_time, local.max_elapsed_time);

        let tuned = RetryConfig {
            max_attempts: 5,
            initial_interval_ms: 10,
            max_interval_ms: 40,
        }
        .to_policy();
        assert_eq!(tuned.initial_interval, Duration::from_millis(10));
        assert_eq!(tuned.current_interval, Duration::from_millis(10));
        assert_eq!(tuned.max_interval, Duration::from_millis(40));
        assert_eq!(tuned.max_elapsed_time, local.max_elapsed_time);
    }

    #[test]
    fn test_config_deserializes_without_retry_section() {
        let config: AppStateConfig = serde_json::from_str(
            r#"{
                "backend": "Local",
                "local_base_path": "/srv/state",
                "legacy_preferences_path": null,
                "legacy_key": "IdeAppStates"
            }"#,
        )
        .unwrap();
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.local_base_path, Some(PathBuf::from("/srv/state")));
    }

    #[test]
    fn test_create_manager_from_config() {
        let session = SessionKey::new("ws1").unwrap();
        let manager =
            create_manager_from_config(AppStateConfig::memory(), session, ProviderRegistry::new())
                .unwrap();
        assert_eq!(manager.session().as_str(), "ws1");
        assert!(!manager.has_legacy());
    }

    #[test]
    fn test_create_manager_rejects_invalid_config() {
        let session = SessionKey::new("ws1").unwrap();
        let mut config = AppStateConfig::memory();
        config.retry.max_attempts = 0;
        assert!(create_manager_from_config(config, session, ProviderRegistry::new()).is_err());
    }
}
