/*!
# appstate core engine

Persists and restores the layout state of an interactive workspace (panel
arrangements, per-perspective part stack sizes...) across client sessions, and
migrates that state out of legacy user preferences.

- One JSON document per session, keyed by component id
- Pluggable [`StateProvider`]s that capture and re-apply their own slice
- Sequential, failure-isolated restore in document key order
- Write suppression when the captured document did not change
- Transports as adapters: local files, in-memory, or your own

## Usage

```rust
use appstate_core::{MemoryTransport, ProviderRegistry, SessionKey, StateManager};

# async fn demo() -> appstate_core::Result<()> {
let registry = ProviderRegistry::new(); // register providers here
let session = SessionKey::new("ws-42")?;
let mut manager = StateManager::new(session, MemoryTransport::new(), registry);

manager.read_state().await;          // never fails; empty document on trouble
manager.restore_state(None).await;   // apply every known component, in order
manager.set_current_perspective("Project Perspective");
let _left = manager.get_state_for("NAVIGATION");
manager.persist_state().await;       // writes only when something changed
# Ok(())
# }
```
*/

pub mod config;
pub mod document;
pub mod error;
pub mod legacy;
pub mod manager;
pub mod observability;
pub mod provider;
pub mod transport;


pub use config::{create_manager_from_config, AppStateConfig, RetryConfig, TransportBackend};
pub use document::{PartStackType, SessionKey, StateDocument};
pub use error::{AppStateError, Result};
pub use legacy::{FilePreferences, LegacyMigration, MemoryPreferences, PreferencesStore};
pub use manager::{
    ApplyOutcome, DocumentSource, PersistOutcome, PersistReport, ProviderFailure, RestoreReport,
    SessionPhase, StateManager,
};
pub use provider::{ProviderRegistry, StateProvider};
pub use transport::{LocalFileTransport, MemoryTransport, StateTransport};
