/*!
Persistence transports for the session state document.

This module defines the transport abstraction (port) and its adapters. The
manager only ever hands a transport a session key and the document's JSON
text; where the text ends up is the adapter's business.
*/

pub mod local;

use crate::{AppStateError, Result, SessionKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub use local::LocalFileTransport;

/// Read/write boundary for the persisted state document
///
/// # Contract
/// * `load` returns the JSON text last saved for the session, or an empty
///   string when nothing was saved yet. The manager treats invalid text the
///   same way as an empty one.
/// * `save` replaces the stored text for the session.
#[async_trait]
pub trait StateTransport: Send + Sync {
    /// Load the JSON text stored for `session`
    async fn load(&self, session: &SessionKey) -> Result<String>;

    /// Store `json` for `session`
    async fn save(&self, session: &SessionKey, json: &str) -> Result<()>;
}

#[async_trait]
impl<T: StateTransport + ?Sized> StateTransport for Box<T> {
    async fn load(&self, session: &SessionKey) -> Result<String> {
        (**self).load(session).await
    }

    async fn save(&self, session: &SessionKey, json: &str) -> Result<()> {
        (**self).save(session, json).await
    }
}

#[async_trait]
impl<T: StateTransport + ?Sized> StateTransport for Arc<T> {
    async fn load(&self, session: &SessionKey) -> Result<String> {
        (**self).load(session).await
    }

    async fn save(&self, session: &SessionKey, json: &str) -> Result<()> {
        (**self).save(session, json).await
    }
}

/// In-process transport
///
/// Clones share the same storage, so a caller can keep a handle to inspect
/// what the manager wrote. Loads and saves can be made to fail on demand to
/// exercise the manager's recovery paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    data: Arc<Mutex<HashMap<String, String>>>,
    saves: Arc<AtomicUsize>,
    fail_loads: Arc<AtomicBool>,
    fail_saves: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the stored text for a session
    pub fn with_state(self, session: &SessionKey, json: impl Into<String>) -> Self {
        self.lock().insert(session.as_str().to_string(), json.into());
        self
    }

    /// Text currently stored for a session
    pub fn stored(&self, session: &SessionKey) -> Option<String> {
        self.lock().get(session.as_str()).cloned()
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map still holds consistent strings.
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StateTransport for MemoryTransport {
    async fn load(&self, session: &SessionKey) -> Result<String> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(AppStateError::transport(format!(
                "Failed to load state for {session}: transport unavailable"
            )));
        }
        Ok(self.lock().get(session.as_str()).cloned().unwrap_or_default())
    }

    async fn save(&self, session: &SessionKey, json: &str) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AppStateError::transport(format!(
                "Failed to save state for {session}: transport unavailable"
            )));
        }
        self.lock()
            .insert(session.as_str().to_string(), json.to_string());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
