/*!
Local filesystem transport.
*/

use super::StateTransport;
use crate::config::RetryConfig;
use crate::{AppStateError, Result, SessionKey};
use appstate_retry::{classify, with_custom_backoff, RetryError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Prefix of the per-user directory holding the state file
pub const USER_DIR_PREFIX: &str = "user_";

/// File name of the state document inside the user directory
pub const APP_STATE_HOLDER: &str = "appState";

/// Local filesystem transport
///
/// Each session's document lives at `<base>/user_<session>/appState`. A missing
/// file loads as an empty string. Writes go to a sibling temporary file that is
/// then renamed over the target, and transient I/O failures are retried.
///
/// # Example
/// ```rust,no_run
/// use appstate_core::{LocalFileTransport, SessionKey, StateTransport};
///
/// # async fn demo() -> appstate_core::Result<()> {
/// let transport = LocalFileTransport::with_base_dir("/var/lib/appstate");
/// let session = SessionKey::new("ws-42")?;
/// transport.save(&session, r#"{"workspace":{}}"#).await?;
/// // -> /var/lib/appstate/user_ws-42/appState
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileTransport {
    /// Optional base directory for all state files
    base_dir: Option<PathBuf>,
    retry: RetryConfig,
}

impl LocalFileTransport {
    /// Create a transport rooted at the current directory
    pub fn new() -> Self {
        Self {
            base_dir: None,
            retry: RetryConfig::default(),
        }
    }

    /// Create a transport rooted at `base_dir`
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: Some(base_dir.as_ref().to_path_buf()),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Path of the state file for a session
    pub fn state_path(&self, session: &SessionKey) -> PathBuf {
        let relative = Path::new(&format!("{USER_DIR_PREFIX}{session}")).join(APP_STATE_HOLDER);
        match &self.base_dir {
            Some(base) => base.join(relative),
            None => relative,
        }
    }

    pub async fn exists(&self, session: &SessionKey) -> bool {
        fs::metadata(self.state_path(session))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Remove the stored document for a session, if any
    pub async fn delete(&self, session: &SessionKey) -> Result<()> {
        let path = self.state_path(session);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppStateError::transport(format!(
                "Failed to delete state {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Ensure the parent directory exists, creating it if necessary
    async fn ensure_parent_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    AppStateError::transport(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

impl Default for LocalFileTransport {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_replacing(path: PathBuf, data: String) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data.as_bytes()).await?;
    fs::rename(&tmp, &path).await
}

#[async_trait]
impl StateTransport for LocalFileTransport {
    async fn load(&self, session: &SessionKey) -> Result<String> {
        let path = self.state_path(session);
        match fs::read_to_string(&path).await {
            Ok(json) => Ok(json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}", path.display());
                Ok(String::new())
            }
            Err(e) => Err(AppStateError::transport(format!(
                "Can not get app state for {} from {}: {}",
                session,
                path.display(),
                e
            ))),
        }
    }

    async fn save(&self, session: &SessionKey, json: &str) -> Result<()> {
        let path = self.state_path(session);
        self.ensure_parent_dir(&path).await?;

        let data = json.to_string();
        let target = path.clone();
        with_custom_backoff(
            "save_state",
            self.retry.to_policy(),
            self.retry.max_attempts,
            move |_attempt| {
                let target = target.clone();
                let data = data.clone();
                Box::pin(async move {
                    write_replacing(target, data)
                        .await
                        .map_err(|e| classify("save_state", e))
                })
            },
        )
        .await
        .map_err(|e: RetryError| {
            AppStateError::transport(format!(
                "Can not save app state for {} to {}: {}",
                session,
                path.display(),
                e
            ))
        })?;

        debug!("Saved {} bytes of state to {}", json.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn session() -> SessionKey {
        SessionKey::new("ws1").unwrap()
    }

    #[tokio::test]
    async fn test_local_transport_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let transport = LocalFileTransport::with_base_dir(temp_dir.path());

        assert!(!transport.exists(&session()).await);
        transport.save(&session(), r#"{"a":1}"#).await.unwrap();
        assert!(transport.exists(&session()).await);
        assert_eq!(transport.load(&session()).await.unwrap(), r#"{"a":1}"#);

        transport.delete(&session()).await.unwrap();
        assert!(!transport.exists(&session()).await);
    }

    #[tokio::test]
    async fn test_state_file_layout() {
        let temp_dir = TempDir::new().unwrap();
        let transport = LocalFileTransport::with_base_dir(temp_dir.path());

        transport.save(&session(), "{}").await.unwrap();
        let expected = temp_dir.path().join("user_ws1").join("appState");
        assert_eq!(transport.state_path(&session()), expected);
        assert!(expected.is_file());
        assert!(!expected.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_loads_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let transport = LocalFileTransport::with_base_dir(temp_dir.path());

        assert_eq!(transport.load(&session()).await.unwrap(), "");
        assert!(transport.delete(&session()).await.is_ok());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_state() {
        let temp_dir = TempDir::new().unwrap();
        let transport = LocalFileTransport::with_base_dir(temp_dir.path());

        transport.save(&session(), r#"{"v":1}"#).await.unwrap();
        transport.save(&session(), r#"{"v":2}"#).await.unwrap();
        assert_eq!(transport.load(&session()).await.unwrap(), r#"{"v":2}"#);
    }

    #[tokio::test]
    async fn test_state_files_stay_under_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("base");
        let transport = LocalFileTransport::with_base_dir(&base);

        assert!(SessionKey::new("x/../../escaped").is_err());
        for id in ["ws..1", "...", "user ws"] {
            let session = SessionKey::new(id).unwrap();
            transport.save(&session, "{}").await.unwrap();
            let path = transport.state_path(&session);
            assert_eq!(path.parent().and_then(Path::parent), Some(base.as_path()));
            assert!(path.is_file());
        }
        assert!(!temp_dir.path().join("escaped").exists());
    }

    #[tokio::test]
    async fn test_unreadable_path_is_a_transport_error() {
        let temp_dir = TempDir::new().unwrap();
        let transport = LocalFileTransport::with_base_dir(temp_dir.path());

        // A directory where the state file should be cannot be read as text.
        std::fs::create_dir_all(transport.state_path(&session())).unwrap();
        assert!(matches!(
            transport.load(&session()).await,
            Err(AppStateError::Transport(_))
        ));
    }
}
