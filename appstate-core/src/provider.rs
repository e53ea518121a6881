/*!
State providers and the registry that holds them.

A provider owns one slice of the session state (a perspective layout, a part
stack, an editor group...) and knows how to capture and re-apply it. The
registry keeps providers in registration order, which becomes the key order of
every persisted document and so the restore order of the next session.
*/

use crate::{AppStateError, Result};
use async_trait::async_trait;
use serde_json::Value;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::debug;

/// A pluggable unit owning one component of the session state
///
/// Implementations use interior mutability for whatever they restore; the
/// manager only ever holds shared references.
#[async_trait]
pub trait StateProvider: Send + Sync {
    /// Stable id used as the document key
    fn id(&self) -> &str;

    /// Snapshot the current state of this component
    ///
    /// Must not block on I/O. Errors (and panics) are caught by the manager,
    /// which then leaves this component out of the persisted document.
    fn capture_state(&self) -> Result<Value>;

    /// Re-apply a previously captured state
    ///
    /// Called at most once per restore, after every provider whose key comes
    /// earlier in the document has finished.
    async fn apply_state(&self, state: &Value) -> Result<()>;
}

/// Providers keyed by component id, in registration order
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: IndexMap<String, Arc<dyn StateProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its id
    ///
    /// # Errors
    /// * `AppStateError::Validation` - If the provider id is blank
    /// * `AppStateError::DuplicateProvider` - If the id is already taken
    pub fn register(&mut self, provider: Arc<dyn StateProvider>) -> Result<()> {
        let id = provider.id().to_string();
        if id.trim().is_empty() {
            return Err(AppStateError::validation("Provider id should be defined"));
        }
        if self.providers.contains_key(&id) {
            return Err(AppStateError::DuplicateProvider(id));
        }
        debug!("Registered state provider '{}'", id);
        self.providers.insert(id, provider);
        Ok(())
    }

    /// Builder-style registration for setup code
    pub fn with_provider(mut self, provider: Arc<dyn StateProvider>) -> Result<Self> {
        self.register(provider)?;
        Ok(self)
    }

    pub fn unregister(&mut self, id: &str) -> Option<Arc<dyn StateProvider>> {
        self.providers.shift_remove(id)
    }

    pub fn get_component_by_id(&self, id: &str) -> Option<Arc<dyn StateProvider>> {
        self.providers.get(id).cloned()
    }

    /// All registered providers, in registration order
    pub fn get_components(&self) -> Vec<Arc<dyn StateProvider>> {
        self.providers.values().cloned().collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("ids", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
