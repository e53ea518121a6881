/*!
Migration of session state out of legacy user preferences.

Older clients kept every workspace's state inside a single user preference,
`IdeAppStates`, whose value is a JSON object keyed by workspace id:

```json
{"ws1": {"workspace": {"perspectives": {}}}, "ws2": {"workspace": {}}}
```

[`LegacyMigration`] reads one workspace's entry out of that blob and, once the
state has been saved in the current location, removes the entry so it is not
migrated again.
*/

use crate::document::WORKSPACE;
use crate::{AppStateError, Result, SessionKey};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Preference key holding the states of all workspaces
pub const APP_STATE: &str = "IdeAppStates";

/// Keyed string storage of user preferences
///
/// Writes may be buffered until [`flush`](PreferencesStore::flush).
#[async_trait]
pub trait PreferencesStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>>;

    async fn write(&self, key: &str, value: &str) -> Result<()>;

    async fn flush(&self) -> Result<()>;
}

/// Preferences kept in a JSON file mapping keys to string values
///
/// The file is read on first access and rewritten on flush.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<Option<Map<String, Value>>>,
}

impl FilePreferences {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            values: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_loaded(&self) -> Result<()> {
        if self.lock().is_some() {
            return Ok(());
        }

        let values = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => match serde_json::from_str::<Value>(&text)? {
                Value::Object(map) => map,
                _ => {
                    return Err(AppStateError::legacy(format!(
                        "Preferences file {} is not a JSON object",
                        self.path.display()
                    )))
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => {
                return Err(AppStateError::legacy(format!(
                    "Failed to read preferences {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        self.lock().get_or_insert(values);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Map<String, Value>>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PreferencesStore for FilePreferences {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        self.ensure_loaded().await?;
        Ok(self
            .lock()
            .as_ref()
            .and_then(|values| values.get(key))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_loaded().await?;
        if let Some(values) = self.lock().as_mut() {
            values.insert(key.to_string(), Value::String(value.to_string()));
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let json = match self.lock().as_ref() {
            Some(values) => serde_json::to_string_pretty(values)?,
            None => return Ok(()),
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, json).await.map_err(|e| {
            AppStateError::legacy(format!(
                "Failed to write preferences {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// In-process preferences with writes staged until flush
///
/// Clones share storage. Flushing can be made to fail, which leaves staged
/// writes uncommitted.
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferences {
    committed: Arc<Mutex<HashMap<String, String>>>,
    staged: Arc<Mutex<HashMap<String, String>>>,
    fail_flush: Arc<AtomicBool>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a committed value
    pub fn with_value(self, key: &str, value: impl Into<String>) -> Self {
        lock(&self.committed).insert(key.to_string(), value.into());
        self
    }

    /// Committed value for a key
    pub fn value(&self, key: &str) -> Option<String> {
        lock(&self.committed).get(key).cloned()
    }

    pub fn set_fail_flush(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::SeqCst);
    }
}

fn lock(
    map: &Mutex<HashMap<String, String>>,
) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl PreferencesStore for MemoryPreferences {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = lock(&self.staged).get(key) {
            return Ok(Some(value.clone()));
        }
        Ok(lock(&self.committed).get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.staged).insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        if self.fail_flush.load(Ordering::SeqCst) {
            lock(&self.staged).clear();
            return Err(AppStateError::legacy("preferences service unavailable"));
        }
        let staged: Vec<(String, String)> = lock(&self.staged).drain().collect();
        lock(&self.committed).extend(staged);
        Ok(())
    }
}

/// One-shot reader and cleaner for states kept in legacy preferences
pub struct LegacyMigration {
    store: Box<dyn PreferencesStore>,
    key: String,
}

impl LegacyMigration {
    /// Migration reading the default `IdeAppStates` preference
    pub fn new(store: Box<dyn PreferencesStore>) -> Self {
        Self::with_key(store, APP_STATE)
    }

    pub fn with_key<S: Into<String>>(store: Box<dyn PreferencesStore>, key: S) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// States of all workspaces, or `None` when absent or unreadable
    pub async fn read_all_workspaces_state(&self) -> Option<Map<String, Value>> {
        let json = match self.store.read(&self.key).await {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read legacy preference '{}': {}", self.key, e);
                return None;
            }
        };

        match serde_json::from_str::<Value>(&json) {
            Ok(Value::Object(all)) => Some(all),
            Ok(_) => {
                debug!("Legacy preference '{}' is not a JSON object", self.key);
                None
            }
            Err(e) => {
                debug!("Legacy preference '{}' is not valid JSON: {}", self.key, e);
                None
            }
        }
    }

    /// The `workspace` state stored for `session`, if any
    pub async fn read_legacy_state(&self, session: &SessionKey) -> Option<Value> {
        let mut all = self.read_all_workspaces_state().await?;
        match all.shift_remove(session.as_str())? {
            Value::Object(mut settings) => settings
                .shift_remove(WORKSPACE)
                .filter(|state| !state.is_null()),
            _ => None,
        }
    }

    /// Drop `session`'s entry from the legacy preference
    ///
    /// Other workspaces' entries are written back untouched. Failures are
    /// logged; the stale entry then survives until the next attempt.
    pub async fn remove_legacy_state(&self, session: &SessionKey) {
        match self.try_remove(session).await {
            Ok(true) => info!("Removed legacy state for workspace {}", session),
            Ok(false) => debug!("No legacy state to remove for workspace {}", session),
            Err(e) => error!(
                "Failed to store app's state to user's preferences: {}",
                e
            ),
        }
    }

    async fn try_remove(&self, session: &SessionKey) -> Result<bool> {
        let Some(mut all) = self.read_all_workspaces_state().await else {
            return Ok(false);
        };
        if all.shift_remove(session.as_str()).is_none() {
            return Ok(false);
        }

        let json = serde_json::to_string(&all)?;
        self.store.write(&self.key, &json).await?;
        self.store.flush().await?;
        Ok(true)
    }
}

impl std::fmt::Debug for LegacyMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyMigration")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
