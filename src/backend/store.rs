//! File-backed session persistence.
//!
//! Plays the part browser local storage plays for the hosted client library:
//! a single JSON document holding the last signed-in session. A missing file
//! means "signed out".

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{BackendError, Session};

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted session, if any.
    pub async fn load(&self) -> Result<Option<Session>, BackendError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error(&self.path, &e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| BackendError::SessionStore(format!("{}: {e}", self.path.display())))
    }

    /// Persist `session`, creating parent directories as needed.
    pub async fn save(&self, session: &Session) -> Result<(), BackendError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| store_error(parent, &e))?;
        }
        let json = serde_json::to_vec_pretty(session).map_err(|e| BackendError::SessionStore(e.to_string()))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| store_error(&self.path, &e))
    }

    /// Forget the persisted session. Clearing an absent file is not an error.
    pub async fn clear(&self) -> Result<(), BackendError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_error(&self.path, &e)),
        }
    }
}

fn store_error(path: &Path, err: &std::io::Error) -> BackendError {
    BackendError::SessionStore(format!("{}: {err}", path.display()))
}
