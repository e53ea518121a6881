/*!
Session state manager that reads, restores and persists the state document.

This module contains the core orchestration: it loads the session's document
through a transport (falling back to legacy preferences and then to an empty
document), hands each component's sub-document to its provider strictly one
after another, and writes a freshly captured document back only when it
changed.
*/

use crate::document::{StateDocument, WORKSPACE};
use crate::legacy::LegacyMigration;
use crate::provider::{ProviderRegistry, StateProvider};
use crate::transport::StateTransport;
use crate::SessionKey;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[cfg(feature = "metrics")]
use crate::observability::AppStateMetrics;

/// Lifecycle phase of a session's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No document has been read yet
    Uninitialized,
    /// A document is in memory but has not been restored
    Loaded,
    /// Providers are being applied
    Restoring,
    /// Between restore and persist cycles
    Idle,
    /// A capture/save cycle is running
    Persisting,
}

/// Where the in-memory document came from on the last read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSource {
    Transport,
    Legacy,
    Empty,
}

/// A provider that failed to capture or apply its state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub id: String,
    pub message: String,
}

/// Result of applying one document entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Failed(String),
    /// No provider is registered for the key
    Skipped,
}

/// Per-entry outcomes of a restore, in the order they were applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub outcomes: Vec<(String, ApplyOutcome)>,
}

impl RestoreReport {
    fn record(&mut self, id: &str, outcome: ApplyOutcome) {
        self.outcomes.push((id.to_string(), outcome));
    }

    pub fn applied(&self) -> Vec<&str> {
        self.with_outcome(|o| matches!(o, ApplyOutcome::Applied))
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.with_outcome(|o| matches!(o, ApplyOutcome::Skipped))
    }

    pub fn failed(&self) -> Vec<ProviderFailure> {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| match outcome {
                ApplyOutcome::Failed(message) => Some(ProviderFailure {
                    id: id.clone(),
                    message: message.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// True when no provider failed
    pub fn is_clean(&self) -> bool {
        self.failed().is_empty()
    }

    fn with_outcome(&self, pred: impl Fn(&ApplyOutcome) -> bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| pred(outcome))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// What a persist cycle did with the captured document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Saved,
    /// Captured document matched the current one; transport not called
    Unchanged,
    SaveFailed,
}

/// Result of a persist cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReport {
    pub outcome: PersistOutcome,
    /// Ids whose state made it into the captured document
    pub captured: Vec<String>,
    /// Providers left out because their capture failed
    pub failed: Vec<ProviderFailure>,
}

/// Orchestrates reading, restoring and persisting one session's state
///
/// # Example
/// ```rust
/// use appstate_core::{MemoryTransport, ProviderRegistry, SessionKey, StateManager};
///
/// # async fn demo() {
/// let session = SessionKey::new("ws-42").unwrap();
/// let mut manager = StateManager::new(session, MemoryTransport::new(), ProviderRegistry::new());
///
/// manager.read_state().await;
/// let report = manager.restore_state(None).await;
/// assert!(report.is_clean());
///
/// manager.persist_state().await;
/// # }
/// ```
pub struct StateManager<T>
where
    T: StateTransport,
{
    session: SessionKey,
    transport: T,
    registry: ProviderRegistry,
    legacy: Option<LegacyMigration>,
    app_state: Option<StateDocument>,
    source: Option<DocumentSource>,
    phase: SessionPhase,
    current_perspective: Option<String>,
    // Set after a failed save so the next persist writes even if unchanged.
    save_pending: bool,
}

impl<T> StateManager<T>
where
    T: StateTransport,
{
    /// Create a manager for `session`
    ///
    /// # Arguments
    /// * `session` - Key scoping every load and save
    /// * `transport` - Where the current-format document lives
    /// * `registry` - Providers populated by the application shell
    pub fn new(session: SessionKey, transport: T, registry: ProviderRegistry) -> Self {
        Self {
            session,
            transport,
            registry,
            legacy: None,
            app_state: None,
            source: None,
            phase: SessionPhase::Uninitialized,
            current_perspective: None,
            save_pending: false,
        }
    }

    /// Seed empty sessions from legacy preferences
    pub fn with_legacy(mut self, legacy: LegacyMigration) -> Self {
        self.legacy = Some(legacy);
        self
    }

    pub fn has_legacy(&self) -> bool {
        self.legacy.is_some()
    }

    pub fn session(&self) -> &SessionKey {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProviderRegistry {
        &mut self.registry
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn source(&self) -> Option<DocumentSource> {
        self.source
    }

    /// The in-memory document, once read, restored or persisted
    pub fn state(&self) -> Option<&StateDocument> {
        self.app_state.as_ref()
    }

    /// Select the perspective [`get_state_for`](Self::get_state_for) looks under
    pub fn set_current_perspective<S: Into<String>>(&mut self, perspective_id: S) {
        self.current_perspective = Some(perspective_id.into());
    }

    pub fn current_perspective(&self) -> Option<&str> {
        self.current_perspective.as_deref()
    }

    /// Load the session document
    ///
    /// An empty or malformed payload falls back to legacy preferences (when
    /// configured) and then to an empty document. A transport error goes
    /// straight to an empty document without consulting legacy. Never fails.
    pub async fn read_state(&mut self) {
        let loaded = match self.transport.load(&self.session).await {
            Ok(json) => match StateDocument::parse(&json) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    if json.trim().is_empty() {
                        debug!("No stored state for session {}", self.session);
                    } else {
                        warn!(
                            "Discarding unreadable state for session {}: {}",
                            self.session, e
                        );
                    }
                    None
                }
            },
            Err(e) => {
                error!("Failed to load state for session {}: {}", self.session, e);
                self.settle_read(StateDocument::new(), DocumentSource::Empty);
                return;
            }
        };

        match loaded {
            Some(doc) => self.settle_read(doc, DocumentSource::Transport),
            None => match self.migrate_legacy().await {
                Some(doc) => self.settle_read(doc, DocumentSource::Legacy),
                None => self.settle_read(StateDocument::new(), DocumentSource::Empty),
            },
        }
    }

    fn settle_read(&mut self, doc: StateDocument, source: DocumentSource) {
        info!(
            "Loaded state for session {} ({} components, source {:?})",
            self.session,
            doc.len(),
            source
        );
        self.app_state = Some(doc);
        self.source = Some(source);
        self.phase = SessionPhase::Loaded;
    }

    /// Copy the legacy workspace state into the current transport
    ///
    /// The legacy entry is removed only after the save succeeded, so a failed
    /// save leaves it in place for the next session start.
    async fn migrate_legacy(&self) -> Option<StateDocument> {
        let legacy = self.legacy.as_ref()?;
        let workspace = legacy.read_legacy_state(&self.session).await?;

        let mut doc = StateDocument::new();
        doc.insert(WORKSPACE, workspace);
        info!("Migrating legacy state for session {}", self.session);

        let saved = match doc.to_json() {
            Ok(json) => self.transport.save(&self.session, &json).await,
            Err(e) => Err(e),
        };
        match saved {
            Ok(()) => legacy.remove_legacy_state(&self.session).await,
            Err(e) => warn!(
                "Failed to save migrated state for session {}, keeping legacy copy: {}",
                self.session, e
            ),
        }
        Some(doc)
    }

    /// Apply the document to the registered providers
    ///
    /// When `document` is given it replaces the in-memory one first. Entries
    /// are applied in document order; each provider's `apply_state` completes
    /// before the next one starts. A provider that errors or panics is recorded
    /// as failed and the remaining entries are still applied. Keys without a
    /// registered provider are skipped.
    pub async fn restore_state(&mut self, document: Option<StateDocument>) -> RestoreReport {
        if let Some(doc) = document {
            self.app_state = Some(doc);
        }

        let mut report = RestoreReport::default();
        let Some(doc) = self.app_state.as_ref() else {
            debug!("No state read for session {}, nothing to restore", self.session);
            return report;
        };

        self.phase = SessionPhase::Restoring;
        for (id, state) in doc.iter() {
            let Some(provider) = self.registry.get_component_by_id(id) else {
                debug!("No provider registered for component ID: {}", id);
                report.record(id, ApplyOutcome::Skipped);
                continue;
            };

            debug!("Restore state for the component ID: {}", id);
            let outcome = apply_isolated(provider, state).await;
            if let ApplyOutcome::Failed(message) = &outcome {
                error!("Failed to restore state for component {}: {}", id, message);
            }
            report.record(id, outcome);
        }
        self.phase = SessionPhase::Idle;

        #[cfg(feature = "metrics")]
        AppStateMetrics::global().record_restore(report.failed().len());

        if !report.is_clean() {
            warn!(
                "Restored session {} with {} failed components",
                self.session,
                report.failed().len()
            );
        }
        report
    }

    /// Parse `json` and restore it as the new document
    ///
    /// Unparsable input is logged and leaves the in-memory document untouched.
    pub async fn import_state(&mut self, json: &str) -> RestoreReport {
        match StateDocument::parse(json) {
            Ok(doc) => self.restore_state(Some(doc)).await,
            Err(e) => {
                error!("Ignoring imported state for session {}: {}", self.session, e);
                RestoreReport::default()
            }
        }
    }

    /// Capture every provider and save the result if it changed
    ///
    /// Capture runs without suspending. A provider whose capture fails is left
    /// out of the new document. If the compact JSON of the new document equals
    /// that of the current one the transport is not called. Save failures are
    /// logged and reported, never returned.
    pub async fn persist_state(&mut self) -> PersistReport {
        self.phase = SessionPhase::Persisting;
        let (new_state, captured, failed) = self.collect_app_state_data();

        let new_json = match new_state.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize state for session {}: {}", self.session, e);
                self.phase = SessionPhase::Idle;
                return PersistReport {
                    outcome: PersistOutcome::SaveFailed,
                    captured,
                    failed,
                };
            }
        };

        let unchanged = !self.save_pending
            && self
                .app_state
                .as_ref()
                .and_then(|current| current.to_json().ok())
                .is_some_and(|current| current == new_json);

        let outcome = if unchanged {
            debug!("State of session {} unchanged, skipping save", self.session);
            #[cfg(feature = "metrics")]
            AppStateMetrics::global().record_save_suppressed();
            PersistOutcome::Unchanged
        } else {
            self.app_state = Some(new_state);
            #[cfg(feature = "metrics")]
            AppStateMetrics::global().record_state_size(new_json.len());
            match self.transport.save(&self.session, &new_json).await {
                Ok(()) => {
                    info!(
                        "Saved state for session {} ({} bytes)",
                        self.session,
                        new_json.len()
                    );
                    self.save_pending = false;
                    #[cfg(feature = "metrics")]
                    AppStateMetrics::global().record_save();
                    PersistOutcome::Saved
                }
                Err(e) => {
                    error!("Failed to save state for session {}: {}", self.session, e);
                    self.save_pending = true;
                    #[cfg(feature = "metrics")]
                    AppStateMetrics::global().record_save_error();
                    PersistOutcome::SaveFailed
                }
            }
        };

        self.phase = SessionPhase::Idle;
        PersistReport {
            outcome,
            captured,
            failed,
        }
    }

    /// Snapshot every registered provider into a new document
    fn collect_app_state_data(&self) -> (StateDocument, Vec<String>, Vec<ProviderFailure>) {
        let mut new_state = StateDocument::new();
        let mut captured = Vec::new();
        let mut failed = Vec::new();

        for provider in self.registry.get_components() {
            let id = provider.id().to_string();
            debug!("Persist state for the component ID: {}", id);
            match capture_isolated(provider.as_ref()) {
                Ok(state) => {
                    new_state.insert(id.clone(), state);
                    captured.push(id);
                }
                Err(message) => {
                    error!("Failed to capture state for component {}: {}", id, message);
                    failed.push(ProviderFailure { id, message });
                }
            }
        }

        #[cfg(feature = "metrics")]
        AppStateMetrics::global().record_provider_failures(failed.len());

        (new_state, captured, failed)
    }

    /// Part stack layout for `scope_key` under the current perspective
    ///
    /// `None` when no perspective is selected, nothing has been read yet, or
    /// any level of the path is missing.
    pub fn get_state_for(&self, scope_key: impl AsRef<str>) -> Option<&Value> {
        let perspective_id = self.current_perspective.as_deref()?;
        self.get_state_in(perspective_id, scope_key)
    }

    /// Part stack layout for `scope_key` under an explicit perspective
    pub fn get_state_in(&self, perspective_id: &str, scope_key: impl AsRef<str>) -> Option<&Value> {
        self.app_state
            .as_ref()?
            .state_for(perspective_id, scope_key.as_ref())
    }
}

async fn apply_isolated(provider: Arc<dyn StateProvider>, state: &Value) -> ApplyOutcome {
    match AssertUnwindSafe(provider.apply_state(state))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => ApplyOutcome::Applied,
        Ok(Err(e)) => ApplyOutcome::Failed(e.to_string()),
        Err(payload) => ApplyOutcome::Failed(panic_message(payload.as_ref())),
    }
}

fn capture_isolated(provider: &dyn StateProvider) -> Result<Value, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| provider.capture_state())) {
        Ok(Ok(state)) => Ok(state),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
