//! Credential storage
//!
//! The renewal protocol only needs `get`/`set`/`clear`, so storage is a trait.
//! `FileCredentialStore` persists to a JSON file with atomic writes;
//! `MemoryCredentialStore` keeps everything in process.

use super::types::Credential;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Durable home for the access and refresh tokens
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the stored credential, without tokens that already expired
    async fn get(&self) -> Result<Credential>;

    /// Replace the stored credential
    async fn set(&self, credential: &Credential) -> Result<()>;

    /// Remove both tokens
    async fn clear(&self) -> Result<()>;
}

/// In-process credential store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credential: RwLock<Credential>,
}

impl MemoryCredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `credential`
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(credential),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self) -> Result<Credential> {
        let credential = self.credential.read().await.clone();
        Ok(credential.without_expired(Utc::now()))
    }

    async fn set(&self, credential: &Credential) -> Result<()> {
        *self.credential.write().await = credential.clone();
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.credential.write().await = Credential::default();
        Ok(())
    }
}

/// Credential store backed by a JSON file
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Create a store at `path` (the file is created on first `set`)
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self) -> Result<Credential> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Credential::default());
            }
            Err(e) => {
                return Err(Error::store(format!(
                    "Failed to read credentials file: {e}"
                )))
            }
        };

        let credential: Credential = serde_json::from_str(&contents)
            .map_err(|e| Error::store(format!("Failed to parse credentials file: {e}")))?;

        Ok(credential.without_expired(Utc::now()))
    }

    async fn set(&self, credential: &Credential) -> Result<()> {
        let contents = serde_json::to_string_pretty(credential)
            .map_err(|e| Error::store(format!("Failed to serialize credentials: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::store(format!("Failed to create credentials dir: {e}")))?;
        }

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| Error::store(format!("Failed to write credentials file: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| Error::store(format!("Failed to restrict credentials file: {e}")))?;
        }

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| Error::store(format!("Failed to rename credentials file: {e}")))?;

        debug!(path = %self.path.display(), "Credentials saved");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Credentials removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::store(format!(
                "Failed to remove credentials file: {e}"
            ))),
        }
    }
}
